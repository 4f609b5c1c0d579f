/// Typed errors for the upstream model transport.
///
/// Only `EmptyStream` is produced by the retry layer itself; every other
/// variant surfaces immediately and never consumes retry budget.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
    #[error("malformed chunk: {0}")]
    Decode(String),
    #[error("no content after {attempts} attempts")]
    EmptyStream { attempts: u32 },
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn from_status(status: u16, body: String) -> Self {
        Self::Status { status, body }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Network(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Decode(_) => "decode_error",
            Self::EmptyStream { .. } => "empty_stream",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
