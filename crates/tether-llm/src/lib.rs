pub mod gemini;
pub mod reliable;
pub mod sse;

pub mod mock;

pub use gemini::{GeminiClient, GeminiConfig};
pub use mock::{MockModel, MockResponse};
pub use reliable::{ReliableClient, ReliableConfig};
