use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::Value;

use tether_core::content::{Content, Part};
use tether_core::errors::GatewayError;
use tether_core::provider::{ChunkStream, ModelClient};
use tether_core::request::GenerateRequest;
use tether_core::stream::{Candidate, ResponseChunk};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Yield a sequence of chunks.
    Chunks(Vec<ResponseChunk>),
    /// Yield some chunks, then fail mid-stream.
    Broken(Vec<ResponseChunk>, GatewayError),
    /// Return an error from the stream() call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// One model turn made of the given parts.
    pub fn parts(parts: Vec<Part>) -> Self {
        Self::Chunks(vec![ResponseChunk::from_content(Content::model(parts))])
    }

    pub fn text(text: &str) -> Self {
        Self::parts(vec![Part::text(text)])
    }

    pub fn function_call(name: &str, args: Value) -> Self {
        Self::parts(vec![Part::function_call(name, args)])
    }

    /// A stream that ends without yielding anything.
    pub fn empty() -> Self {
        Self::Chunks(Vec::new())
    }

    /// `n` chunks whose candidates carry no parts.
    pub fn keep_alive(n: usize) -> Self {
        let chunk = ResponseChunk {
            candidates: vec![Candidate {
                content: Some(Content::model(Vec::new())),
                finish_reason: None,
            }],
            usage_metadata: None,
        };
        Self::Chunks(vec![chunk; n])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock client that returns pre-programmed responses in sequence and
/// records every request body it receives. Clones share state.
#[derive(Clone, Default)]
pub struct MockModel {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<GenerateRequest>>>,
    call_count: Arc<AtomicUsize>,
}

impl MockModel {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            ..Default::default()
        }
    }

    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(
        &self,
        _model: &str,
        body: &GenerateRequest,
        _credential: &SecretString,
    ) -> Result<ChunkStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(body.clone());

        let next = self.responses.lock().pop_front();
        let mut response = next.ok_or_else(|| {
            GatewayError::Network(format!("MockModel: no response configured for call {idx}"))
        })?;

        loop {
            match response {
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Chunks(chunks) => {
                    return Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))));
                }
                MockResponse::Broken(chunks, error) => {
                    let items = chunks
                        .into_iter()
                        .map(Ok)
                        .chain(std::iter::once(Err(error)));
                    return Ok(Box::pin(futures::stream::iter(items)));
                }
            }
        }
    }
}
