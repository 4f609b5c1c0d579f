//! The agent loop and its per-run machinery: pending-request registry,
//! event sink, concurrent function dispatcher and termination controller.

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod function;
pub mod functions;
pub mod hooks;
pub mod pending;
pub mod runner;
pub mod sink;

pub use controller::LoopController;
pub use dispatcher::{CallResult, FunctionCaller, RoundResults};
pub use error::{EngineError, FunctionError, SinkError};
pub use function::{
    CallContext, FunctionDefinition, FunctionGroup, FunctionHandler, StatusUpdater, Toolset,
};
pub use hooks::{CallHandle, LoopHooks, NoHooks, ProgressReporter, SinkHooks, SinkReporter};
pub use pending::PendingRequests;
pub use runner::{AgentLoop, LoopConfig, RunArgs, DEFAULT_MODEL};
pub use sink::{EventReceiver, EventSink};
