use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use tether_core::result::AgentResult;

use crate::error::EngineError;

/// One-shot completion signal for a run, settable from any handler.
///
/// The first `terminate` wins; later calls are ignored with a warning.
#[derive(Clone, Default)]
pub struct LoopController {
    result: Arc<Mutex<Option<AgentResult>>>,
}

impl LoopController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.result.lock().is_some()
    }

    /// Store `result` and mark the run terminated. Returns `false` if the
    /// run was already terminated, leaving the first result in place.
    pub fn terminate(&self, result: AgentResult) -> bool {
        let mut slot = self.result.lock();
        if let Some(existing) = slot.as_ref() {
            warn!(
                kept_success = existing.success,
                ignored_success = result.success,
                "terminate called on an already terminated run"
            );
            return false;
        }
        debug!(success = result.success, "run terminated");
        *slot = Some(result);
        true
    }

    /// The stored result. Reading before termination is a programming error.
    pub fn result(&self) -> Result<AgentResult, EngineError> {
        self.result.lock().clone().ok_or(EngineError::NotTerminated)
    }
}
