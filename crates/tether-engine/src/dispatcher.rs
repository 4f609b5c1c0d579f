//! Concurrent execution of one round's function calls.
//!
//! `call` spawns immediately; `get_results` is the fan-in barrier. Results
//! come back in registration order regardless of completion order, and a
//! failing call only ever produces an error payload for itself.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use tether_core::content::{Content, FunctionCall, Part};
use tether_core::ids::CallId;

use crate::function::{CallContext, DefinitionMap, StatusUpdater};
use crate::hooks::ProgressReporter;

/// One finished call: its id and the `functionResponse` part for history.
#[derive(Clone, Debug, PartialEq)]
pub struct CallResult {
    pub call_id: CallId,
    pub response: Part,
}

/// A round's results, ready to append to history.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundResults {
    /// Every response part in one user-role content.
    pub combined: Content,
    pub results: Vec<CallResult>,
}

struct InFlight {
    call_id: CallId,
    name: String,
    handle: JoinHandle<Value>,
}

pub struct FunctionCaller {
    definitions: DefinitionMap,
    in_flight: Vec<InFlight>,
}

impl FunctionCaller {
    pub fn new(definitions: DefinitionMap) -> Self {
        Self {
            definitions,
            in_flight: Vec::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Register one call and start executing it. Does not wait for it.
    pub fn call(
        &mut self,
        call_id: CallId,
        call: &FunctionCall,
        status: StatusUpdater,
        reporter: Option<Arc<dyn ProgressReporter>>,
    ) {
        let name = call.name.clone();
        let definition = self.definitions.get(&name).cloned();
        let args = call.args.clone();
        let ctx = CallContext {
            call_id: call_id.clone(),
            status,
            reporter,
        };
        let fn_name = name.clone();

        let handle = tokio::spawn(async move {
            let Some(definition) = definition else {
                warn!(function = %fn_name, "model called unknown function");
                return json!({ "error": format!("Unknown function: {fn_name}") });
            };

            let outcome = std::panic::AssertUnwindSafe(definition.handler.call(args, ctx))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    debug!(function = %fn_name, error = %e, "function returned an error");
                    json!({ "error": e.to_string() })
                }
                Err(panic) => {
                    let msg = panic_message(&panic);
                    error!(function = %fn_name, panic = %msg, "function panicked during execution");
                    json!({ "error": format!("Function {fn_name} crashed: {msg}") })
                }
            }
        });

        self.in_flight.push(InFlight {
            call_id,
            name,
            handle,
        });
    }

    /// Wait for every call registered since the last retrieval.
    /// `None` when nothing was registered.
    pub async fn get_results(&mut self) -> Option<RoundResults> {
        if self.in_flight.is_empty() {
            return None;
        }

        let mut results = Vec::with_capacity(self.in_flight.len());
        for InFlight {
            call_id,
            name,
            handle,
        } in std::mem::take(&mut self.in_flight)
        {
            let response = match handle.await {
                Ok(response) => response,
                Err(e) => {
                    warn!(function = %name, error = %e, "function task did not complete");
                    json!({ "error": format!("Function {name} did not complete: {e}") })
                }
            };
            results.push(CallResult {
                call_id,
                response: Part::function_response(name, response),
            });
        }

        let combined = Content::user(results.iter().map(|r| r.response.clone()).collect());
        Some(RoundResults { combined, results })
    }
}

impl Drop for FunctionCaller {
    fn drop(&mut self) {
        for call in &self.in_flight {
            call.handle.abort();
        }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
