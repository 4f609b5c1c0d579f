//! HTTP surface: start runs as SSE streams, resume suspended requests and
//! abort runs.

pub mod error;
pub mod runs;
pub mod scenarios;
pub mod server;

pub use error::ApiError;
pub use runs::{AgentRequest, RunError, RunKind, RunSummary, RunTable};
pub use scenarios::Scenario;
pub use server::{build_client, build_router, start, AppState, ServerConfig, ServerHandle};
