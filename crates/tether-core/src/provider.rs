use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use secrecy::SecretString;

use crate::errors::GatewayError;
use crate::request::GenerateRequest;
use crate::stream::ResponseChunk;

/// Lazy, finite, non-restartable sequence of upstream chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ResponseChunk, GatewayError>> + Send>>;

/// Streaming transport to an upstream completion service.
///
/// The credential is supplied per call by whoever started the run; clients
/// never obtain or refresh credentials themselves.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;

    async fn stream(
        &self,
        model: &str,
        body: &GenerateRequest,
        credential: &SecretString,
    ) -> Result<ChunkStream, GatewayError>;
}

#[async_trait]
impl<T: ModelClient + ?Sized> ModelClient for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn stream(
        &self,
        model: &str,
        body: &GenerateRequest,
        credential: &SecretString,
    ) -> Result<ChunkStream, GatewayError> {
        (**self).stream(model, body, credential).await
    }
}
