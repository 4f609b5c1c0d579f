use tether_core::errors::GatewayError;

/// Failures of the event sink.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("event sink is closed")]
    Closed,
    #[error("event '{0}' carries no request id and cannot suspend")]
    NotSuspendable(&'static str),
}

/// Failures raised by a function handler. Each one stays local to its
/// call and is fed back to the model as an error payload.
#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
    #[error("suspend failed: {0}")]
    Suspend(#[from] SinkError),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("result read before termination")]
    NotTerminated,

    #[error("agent aborted")]
    Aborted,

    #[error("max rounds exceeded: {0}")]
    MaxRoundsExceeded(u32),

    #[error("{0}")]
    Internal(String),
}
