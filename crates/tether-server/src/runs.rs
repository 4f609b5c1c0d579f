//! Active-run table. Each run owns its registry, sink and cancellation
//! token; nothing is shared between runs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use tether_core::content::Content;
use tether_core::events::AgentEvent;
use tether_core::ids::{RequestId, RunId};
use tether_core::provider::ModelClient;
use tether_core::result::{AgentResult, RunOutcome};
use tether_engine::functions::{chat_group, system_group};
use tether_engine::{
    AgentLoop, EventReceiver, EventSink, LoopConfig, LoopController, PendingRequests, RunArgs,
    SinkHooks,
};

use crate::scenarios::Scenario;

const ABORTED: &str = "Run aborted";

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("no active run {0}")]
    UnknownRun(RunId),
    #[error("no pending request {request_id} in run {run_id}")]
    UnknownRequest { run_id: RunId, request_id: RequestId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunKind {
    Scenario(Scenario),
    Agent,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scenario(scenario) => write!(f, "scenario:{scenario}"),
            Self::Agent => f.write_str("agent"),
        }
    }
}

/// What a loop run needs from its caller.
pub struct AgentRequest {
    pub objective: Content,
    pub contents: Option<Vec<Content>>,
    pub credential: SecretString,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: RunId,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub pending_requests: usize,
}

struct RunEntry {
    kind: RunKind,
    sink: EventSink,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct RunTable {
    runs: Arc<DashMap<RunId, RunEntry>>,
}

impl RunTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn contains(&self, run_id: &RunId) -> bool {
        self.runs.contains_key(run_id)
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        let mut summaries: Vec<_> = self
            .runs
            .iter()
            .map(|entry| RunSummary {
                run_id: entry.key().clone(),
                kind: entry.kind.to_string(),
                started_at: entry.started_at,
                pending_requests: entry.sink.pending().len(),
            })
            .collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }

    pub fn start_scenario(&self, scenario: Scenario, delay: Duration) -> (RunId, EventReceiver) {
        self.launch(RunKind::Scenario(scenario), move |sink, _cancel| async move {
            if let Err(e) = scenario.run(sink, delay).await {
                warn!(scenario = %scenario, error = %e, "scenario stopped early");
            }
        })
    }

    pub fn start_agent(
        &self,
        client: Arc<dyn ModelClient>,
        config: LoopConfig,
        request: AgentRequest,
    ) -> (RunId, EventReceiver) {
        self.launch(RunKind::Agent, move |sink, cancel| {
            let controller = LoopController::new();
            let groups = vec![system_group(controller.clone()), chat_group(sink.clone())];
            let agent = AgentLoop::new(client, request.credential, config)
                .with_controller(controller)
                .with_cancel(cancel);
            let mut args = RunArgs::new(request.objective, groups)
                .with_hooks(Arc::new(SinkHooks::new(sink.clone()).defer_finish()));
            args.contents = request.contents;

            async move {
                let outcome = agent.run(args).await;
                report_outcome(&sink, outcome);
            }
        })
    }

    /// Answer a suspended request in `run_id`.
    pub fn resolve(
        &self,
        run_id: &RunId,
        request_id: &RequestId,
        response: Value,
    ) -> Result<(), RunError> {
        let pending = self
            .runs
            .get(run_id)
            .map(|entry| entry.sink.pending().clone())
            .ok_or_else(|| RunError::UnknownRun(run_id.clone()))?;

        if pending.resolve(request_id, response) {
            Ok(())
        } else {
            Err(RunError::UnknownRequest {
                run_id: run_id.clone(),
                request_id: request_id.clone(),
            })
        }
    }

    /// Stop a run: flush a failed result and close its stream, then wake
    /// its suspends and cancel its driver. Once the stream is closed every
    /// later emit from the driver is rejected, so the stream always ends
    /// `error`, `complete`. `false` if the run is unknown.
    pub fn abort(&self, run_id: &RunId) -> bool {
        let Some((_, entry)) = self.runs.remove(run_id) else {
            return false;
        };

        let flushed = entry.sink.finish_with([
            AgentEvent::Error {
                message: ABORTED.into(),
            },
            AgentEvent::Complete {
                result: AgentResult::failed(ABORTED),
            },
        ]);
        if let Err(e) = flushed {
            debug!(run_id = %run_id, error = %e, "abort result not delivered");
        }
        let woken = entry.sink.pending().abort_all();
        entry.cancel.cancel();
        info!(run_id = %run_id, kind = %entry.kind, woken, "run aborted");
        true
    }

    pub fn abort_all(&self) -> usize {
        let ids: Vec<RunId> = self.runs.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.abort(id)).count()
    }

    fn launch<F, Fut>(&self, kind: RunKind, build: F) -> (RunId, EventReceiver)
    where
        F: FnOnce(EventSink, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run_id = RunId::new();
        let (sink, rx) = EventSink::new(PendingRequests::new());
        let cancel = CancellationToken::new();
        let work = build(sink.clone(), cancel.clone());

        self.runs.insert(
            run_id.clone(),
            RunEntry {
                kind,
                sink: sink.clone(),
                cancel: cancel.clone(),
                started_at: Utc::now(),
            },
        );
        info!(run_id = %run_id, kind = %kind, "run started");

        let runs = Arc::clone(&self.runs);
        let id = run_id.clone();
        let span = info_span!("run", run_id = %run_id, kind = %kind);
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => debug!("run driver cancelled"),
                    _ = work => debug!("run driver finished"),
                }
                sink.close();
                runs.remove(&id);
            }
            .instrument(span),
        );

        (run_id, rx)
    }
}

/// Flush the loop's outcome and close the stream: `complete` then `finish`
/// on success, `finish` then `error` and `complete` on failure.
fn report_outcome(sink: &EventSink, outcome: RunOutcome) {
    let tail = match outcome {
        RunOutcome::Finished(result) => vec![AgentEvent::Complete { result }, AgentEvent::Finish],
        RunOutcome::Errored { error } => vec![
            AgentEvent::Finish,
            AgentEvent::Error {
                message: error.clone(),
            },
            AgentEvent::Complete {
                result: AgentResult::failed(error),
            },
        ],
    };
    if let Err(e) = sink.finish_with(tail) {
        debug!(error = %e, "run outcome not delivered");
    }
}
