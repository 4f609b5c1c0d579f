use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use tether_core::errors::GatewayError;
use tether_core::provider::{ChunkStream, ModelClient};
use tether_core::request::GenerateRequest;
use tether_core::stream::ResponseChunk;

use crate::sse::{self, SseDecoder};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Maximum silence between two reads of the response body.
    pub idle_timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            connect_timeout: CONNECT_TIMEOUT,
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }
}

/// Streaming client for the `streamGenerateContent` endpoint.
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip(self, body, credential), fields(model = %model))]
    async fn stream(
        &self,
        model: &str,
        body: &GenerateRequest,
        credential: &SecretString,
    ) -> Result<ChunkStream, GatewayError> {
        let resp = self
            .client
            .post(self.endpoint(model))
            .bearer_auth(credential.expose_secret())
            .header("accept", "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }

        debug!("upstream stream opened");
        Ok(Box::pin(GeminiStream::with_idle_timeout(
            resp.bytes_stream(),
            self.config.idle_timeout,
        )))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// Wraps a byte stream from reqwest and yields decoded response chunks.
/// If no data arrives within `idle_duration`, yields an error and ends.
struct GeminiStream {
    inner: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<Result<ResponseChunk, GatewayError>>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl GeminiStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            done: false,
        }
    }

    fn enqueue(&mut self, payloads: Vec<Result<String, GatewayError>>) {
        for payload in payloads {
            match payload.and_then(|p| sse::decode_chunk(&p)) {
                Ok(Some(chunk)) => self.pending.push_back(Ok(chunk)),
                Ok(None) => {}
                Err(e) => self.pending.push_back(Err(e)),
            }
        }
    }
}

impl Stream for GeminiStream {
    type Item = Result<ResponseChunk, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);
                    let payloads = self.decoder.push(&bytes);
                    self.enqueue(payloads);
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(GatewayError::StreamInterrupted(e.to_string()))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    let payloads = self.decoder.finish();
                    self.enqueue(payloads);
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.done = true;
                        return Poll::Ready(Some(Err(GatewayError::StreamInterrupted(format!(
                            "idle timeout after {}s",
                            self.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::Router;
    use futures::StreamExt;
    use tether_core::content::Content;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: String) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            base_url,
            ..Default::default()
        })
        .unwrap()
    }

    fn request() -> GenerateRequest {
        GenerateRequest::agent(vec![Content::user_text("hi")], vec![], None)
    }

    #[test]
    fn endpoint_includes_model_and_alt_sse() {
        let client = client_for("http://upstream/v1beta/".into());
        assert_eq!(
            client.endpoint("gemini-3-flash-preview"),
            "http://upstream/v1beta/models/gemini-3-flash-preview:streamGenerateContent?alt=sse"
        );
    }

    #[tokio::test]
    async fn streams_decoded_chunks_with_bearer_credential() {
        let router = Router::new().route(
            "/models/{model}",
            post(|headers: axum::http::HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer secret-token" {
                    return (StatusCode::UNAUTHORIZED, "bad credential").into_response();
                }
                let body = concat!(
                    "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
                    "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]}}]}\n\n",
                );
                ([("content-type", "text/event-stream")], body).into_response()
            }),
        );
        let client = client_for(serve(router).await);

        let credential = SecretString::from("secret-token");
        let stream = client
            .stream("test-model", &request(), &credential)
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        let text: String = chunks
            .iter()
            .map(|c| c.as_ref().unwrap().first_content().unwrap().text())
            .collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn non_success_status_is_hard_error() {
        let router = Router::new().route(
            "/models/{model}",
            post(|| async { (StatusCode::FORBIDDEN, "quota exceeded") }),
        );
        let client = client_for(serve(router).await);

        let result = client
            .stream("m", &request(), &SecretString::from("x"))
            .await;
        match result {
            Err(GatewayError::Status { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "quota exceeded");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected status error"),
        }
    }

    #[tokio::test]
    async fn idle_timeout_fires_when_no_data() {
        tokio::time::pause();

        let byte_stream = futures::stream::pending::<Result<bytes::Bytes, reqwest::Error>>();
        let mut stream = Box::pin(GeminiStream::with_idle_timeout(
            byte_stream,
            Duration::from_secs(5),
        ));

        tokio::time::advance(Duration::from_secs(6)).await;

        let item = stream.next().await;
        assert!(
            matches!(&item, Some(Err(GatewayError::StreamInterrupted(msg))) if msg.contains("idle timeout")),
            "expected idle timeout error, got: {item:?}"
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn idle_timeout_resets_on_data() {
        tokio::time::pause();

        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<bytes::Bytes, reqwest::Error>>();
        let mut stream = Box::pin(GeminiStream::with_idle_timeout(rx, Duration::from_secs(5)));

        tx.unbounded_send(Ok(bytes::Bytes::from("data: {\"candidates\":[]}\n\n")))
            .unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        tokio::time::advance(Duration::from_secs(4)).await;

        tx.unbounded_send(Ok(bytes::Bytes::from("data: {\"candidates\":[]}\n\n")))
            .unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        drop(tx);
        let item = stream.next().await;
        assert!(item.is_none(), "expected stream end, got: {item:?}");
    }

    #[tokio::test]
    async fn malformed_payload_surfaces_decode_error() {
        let bytes = futures::stream::iter(vec![Ok::<_, reqwest::Error>(bytes::Bytes::from(
            "data: {oops\n\n",
        ))]);
        let mut stream = Box::pin(GeminiStream::with_idle_timeout(bytes, SSE_IDLE_TIMEOUT));
        assert!(matches!(
            stream.next().await,
            Some(Err(GatewayError::Decode(_)))
        ));
        assert!(stream.next().await.is_none());
    }
}
