use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::SecretString;
use tracing::{debug, warn};

use tether_core::errors::GatewayError;
use tether_core::provider::{ChunkStream, ModelClient};
use tether_core::request::GenerateRequest;
use tether_core::stream::ResponseChunk;

/// Configuration for the empty-stream retry behavior.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// When every attempt comes back empty: fail with `EmptyStream` instead
    /// of yielding the final attempt's buffer.
    pub fail_on_exhausted: bool,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(700),
            fail_on_exhausted: false,
        }
    }
}

/// Wraps a `ModelClient` and reissues the whole streaming call when an
/// attempt completes without any chunk carrying content.
///
/// - Each attempt is buffered in full; the first attempt with content is
///   yielded as-is and no further attempts are made
/// - Only the empty-stream condition is retried. Any error ends the call at
///   once without consuming retry budget, whether it is a non-success status
///   or a failure while reading the body. A partial attempt is discarded.
pub struct ReliableClient<C: ModelClient> {
    inner: C,
    config: ReliableConfig,
    total_retries: Arc<AtomicU64>,
}

impl<C: ModelClient> ReliableClient<C> {
    pub fn new(inner: C, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_defaults(inner: C) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    async fn attempt(
        &self,
        model: &str,
        body: &GenerateRequest,
        credential: &SecretString,
    ) -> Result<(Vec<ResponseChunk>, bool), GatewayError> {
        let mut stream = self.inner.stream(model, body, credential).await?;
        let mut buffer = Vec::new();
        let mut has_content = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            has_content |= chunk.has_content();
            buffer.push(chunk);
        }
        Ok((buffer, has_content))
    }
}

#[async_trait]
impl<C: ModelClient> ModelClient for ReliableClient<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn stream(
        &self,
        model: &str,
        body: &GenerateRequest,
        credential: &SecretString,
    ) -> Result<ChunkStream, GatewayError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_buffer = Vec::new();

        for attempt in 1..=max_attempts {
            let (buffer, has_content) = self.attempt(model, body, credential).await?;
            if has_content {
                debug!(attempt, chunks = buffer.len(), "upstream stream has content");
                return Ok(replay(buffer));
            }

            last_buffer = buffer;
            if attempt < max_attempts {
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = self.config.retry_delay.as_millis() as u64,
                    "empty upstream stream, retrying"
                );
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        if self.config.fail_on_exhausted {
            return Err(GatewayError::EmptyStream {
                attempts: max_attempts,
            });
        }

        warn!(
            attempts = max_attempts,
            chunks = last_buffer.len(),
            "retries exhausted without content, yielding final attempt"
        );
        Ok(replay(last_buffer))
    }
}

fn replay(chunks: Vec<ResponseChunk>) -> ChunkStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}
