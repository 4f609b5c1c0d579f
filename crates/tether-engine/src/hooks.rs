//! Lifecycle hooks the loop invokes at key points, and the adapter that
//! turns them into events on an `EventSink`.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use tether_core::content::{Content, FunctionCall};
use tether_core::events::{AgentEvent, StatusOptions};
use tether_core::ids::CallId;
use tether_core::request::GenerateRequest;

use crate::sink::EventSink;

/// Live progress channel for one dispatched call.
pub trait ProgressReporter: Send + Sync {
    fn add_json(&self, title: &str, data: Value, icon: Option<&str>);
    /// Report an error and hand it back so callers can return it.
    fn add_error(&self, error: Value) -> Value;
    fn finish(&self);
}

/// What `on_function_call` hands back: the id to dispatch under, and an
/// optional reporter bound to it.
pub struct CallHandle {
    pub call_id: CallId,
    pub reporter: Option<Arc<dyn ProgressReporter>>,
}

/// Optional lifecycle callbacks. Every method defaults to a no-op.
pub trait LoopHooks: Send + Sync {
    fn on_start(&self, _objective: &Content) {}
    fn on_finish(&self) {}
    fn on_content(&self, _content: &Content) {}
    fn on_thought(&self, _text: &str) {}
    /// `None` lets the loop mint its own call id with no reporter.
    fn on_function_call(
        &self,
        _call: &FunctionCall,
        _icon: Option<&str>,
        _title: Option<&str>,
    ) -> Option<CallHandle> {
        None
    }
    fn on_function_call_update(
        &self,
        _call_id: &CallId,
        _status: Option<&str>,
        _opts: Option<&StatusOptions>,
    ) {
    }
    fn on_function_result(&self, _call_id: &CallId, _content: &Content) {}
    fn on_turn_complete(&self) {}
    fn on_send_request(&self, _model: &str, _body: &GenerateRequest) {}
}

pub struct NoHooks;

impl LoopHooks for NoHooks {}

/// Hooks that forward every lifecycle point to an event sink.
#[derive(Clone)]
pub struct SinkHooks {
    sink: EventSink,
    emit_finish: bool,
}

impl SinkHooks {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            emit_finish: true,
        }
    }

    /// Leave `finish` to the caller, which emits it once the run's
    /// outcome has been reported.
    pub fn defer_finish(mut self) -> Self {
        self.emit_finish = false;
        self
    }

    fn emit(&self, event: AgentEvent) {
        // A closed sink already logged the drop; the run keeps going until
        // its driver notices the abort.
        let _ = self.sink.emit(event);
    }
}

impl LoopHooks for SinkHooks {
    fn on_start(&self, objective: &Content) {
        self.emit(AgentEvent::Start {
            objective: objective.clone(),
        });
    }

    fn on_finish(&self) {
        if self.emit_finish {
            self.emit(AgentEvent::Finish);
        }
    }

    fn on_content(&self, content: &Content) {
        self.emit(AgentEvent::Content {
            content: content.clone(),
        });
    }

    fn on_thought(&self, text: &str) {
        self.emit(AgentEvent::Thought { text: text.into() });
    }

    fn on_function_call(
        &self,
        call: &FunctionCall,
        icon: Option<&str>,
        title: Option<&str>,
    ) -> Option<CallHandle> {
        let call_id = CallId::new();
        self.emit(AgentEvent::FunctionCall {
            call_id: call_id.clone(),
            name: call.name.clone(),
            args: call.args.clone(),
            icon: icon.map(str::to_string),
            title: title.map(str::to_string),
        });
        let reporter = SinkReporter {
            call_id: call_id.clone(),
            sink: self.sink.clone(),
        };
        Some(CallHandle {
            call_id,
            reporter: Some(Arc::new(reporter)),
        })
    }

    fn on_function_call_update(
        &self,
        call_id: &CallId,
        status: Option<&str>,
        opts: Option<&StatusOptions>,
    ) {
        self.emit(AgentEvent::FunctionCallUpdate {
            call_id: call_id.clone(),
            status: status.map(str::to_string),
            opts: opts.cloned(),
        });
    }

    fn on_function_result(&self, call_id: &CallId, content: &Content) {
        self.emit(AgentEvent::FunctionResult {
            call_id: call_id.clone(),
            content: content.clone(),
        });
    }

    fn on_turn_complete(&self) {
        self.emit(AgentEvent::TurnComplete);
    }

    fn on_send_request(&self, model: &str, body: &GenerateRequest) {
        let body = serde_json::to_value(body).unwrap_or_else(|e| {
            warn!(error = %e, "failed to serialize request body for sendRequest");
            Value::Null
        });
        self.emit(AgentEvent::SendRequest {
            model: model.into(),
            body,
        });
    }
}

/// Reporter bound to one call id, emitting `subagent*` events.
pub struct SinkReporter {
    call_id: CallId,
    sink: EventSink,
}

impl ProgressReporter for SinkReporter {
    fn add_json(&self, title: &str, data: Value, icon: Option<&str>) {
        let _ = self.sink.emit(AgentEvent::SubagentAddJson {
            call_id: self.call_id.clone(),
            title: title.into(),
            data,
            icon: icon.map(str::to_string),
        });
    }

    fn add_error(&self, error: Value) -> Value {
        let _ = self.sink.emit(AgentEvent::SubagentError {
            call_id: self.call_id.clone(),
            error: error.clone(),
        });
        error
    }

    fn finish(&self) {
        let _ = self.sink.emit(AgentEvent::SubagentFinish {
            call_id: self.call_id.clone(),
        });
    }
}
