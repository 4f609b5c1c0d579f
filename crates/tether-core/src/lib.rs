//! Shared data model for tether: ids, conversation content, upstream wire
//! types, agent events, and the model transport trait.

pub mod content;
pub mod errors;
pub mod events;
pub mod ids;
pub mod provider;
pub mod request;
pub mod result;
pub mod stream;

pub use content::{Content, FunctionCall, FunctionResponse, Part, Role};
pub use errors::GatewayError;
pub use events::AgentEvent;
pub use ids::{CallId, RequestId, RunId};
pub use provider::{ChunkStream, ModelClient};
pub use request::{FunctionDeclaration, GenerateRequest};
pub use result::{AgentResult, RunOutcome};
pub use stream::ResponseChunk;
