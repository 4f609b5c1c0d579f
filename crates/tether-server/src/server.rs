use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tether_core::content::Content;
use tether_core::errors::GatewayError;
use tether_core::ids::{RequestId, RunId};
use tether_core::provider::ModelClient;
use tether_engine::{EventReceiver, LoopConfig, DEFAULT_MODEL};
use tether_llm::{GeminiClient, GeminiConfig, ReliableClient, ReliableConfig};

use crate::error::ApiError;
use crate::runs::{AgentRequest, RunTable};
use crate::scenarios::Scenario;

pub const RUN_ID_HEADER: &str = "x-run-id";

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model: String,
    pub upstream: GeminiConfig,
    pub retry: ReliableConfig,
    pub max_rounds: Option<u32>,
    /// Pause between scripted scenario steps.
    pub scenario_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9091,
            model: DEFAULT_MODEL.into(),
            upstream: GeminiConfig::default(),
            retry: ReliableConfig::default(),
            max_rounds: None,
            scenario_delay: Duration::from_millis(500),
        }
    }
}

impl ServerConfig {
    fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            model: self.model.clone(),
            max_rounds: self.max_rounds,
        }
    }
}

/// The production model client: Gemini behind the empty-stream retry wrapper.
pub fn build_client(config: &ServerConfig) -> Result<Arc<dyn ModelClient>, GatewayError> {
    let gemini = GeminiClient::new(config.upstream.clone())?;
    Ok(Arc::new(ReliableClient::new(gemini, config.retry.clone())))
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub client: Arc<dyn ModelClient>,
    pub runs: RunTable,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/agent/run", post(run_handler))
        .route("/api/agent/{run_id}/input", post(input_handler))
        .route("/api/agent/{run_id}/abort", post(abort_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns a handle that keeps the server alive.
pub async fn start(
    config: ServerConfig,
    client: Arc<dyn ModelClient>,
) -> Result<ServerHandle, std::io::Error> {
    let runs = RunTable::new();
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        config: Arc::new(config),
        client,
        runs: runs.clone(),
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(addr = %local_addr, "tether server started");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            warn!(error = %e, "server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        runs,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    pub runs: RunTable,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Abort every active run and stop accepting connections.
    pub fn shutdown(self) -> usize {
        let aborted = self.runs.abort_all();
        self.server.abort();
        info!(aborted, "tether server stopped");
        aborted
    }
}

async fn index_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "tether",
        "scenarios": Scenario::names(),
        "activeRuns": state.runs.summaries(),
    }))
}

/// An objective is either plain text or a full content.
#[derive(Deserialize)]
#[serde(untagged)]
enum Objective {
    Text(String),
    Content(Content),
}

impl From<Objective> for Content {
    fn from(objective: Objective) -> Self {
        match objective {
            Objective::Text(text) => Content::user_text(text),
            Objective::Content(content) => content,
        }
    }
}

#[derive(Deserialize)]
struct RunRequest {
    #[serde(default)]
    scenario: Option<String>,
    #[serde(default)]
    objective: Option<Objective>,
    #[serde(default)]
    contents: Option<Vec<Content>>,
}

async fn run_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RunRequest>,
) -> Result<Response, ApiError> {
    if let Some(name) = req.scenario {
        let scenario: Scenario = name.parse()?;
        let (run_id, rx) = state
            .runs
            .start_scenario(scenario, state.config.scenario_delay);
        return Ok(sse_response(state.runs, run_id, rx));
    }

    let Some(objective) = req.objective else {
        return Err(ApiError::BadRequest(
            "either scenario or objective is required".into(),
        ));
    };
    let credential = bearer_credential(&headers)
        .ok_or_else(|| ApiError::BadRequest("missing bearer credential".into()))?;

    let (run_id, rx) = state.runs.start_agent(
        Arc::clone(&state.client),
        state.config.loop_config(),
        AgentRequest {
            objective: objective.into(),
            contents: req.contents,
            credential,
        },
    );
    Ok(sse_response(state.runs, run_id, rx))
}

fn bearer_credential(headers: &HeaderMap) -> Option<SecretString> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| SecretString::from(token.to_string()))
}

#[derive(Deserialize)]
struct InputRequest {
    #[serde(rename = "requestId", alias = "request_id")]
    request_id: RequestId,
    #[serde(default)]
    response: Value,
}

async fn input_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(req): Json<InputRequest>,
) -> Result<Json<Value>, ApiError> {
    let run_id = RunId::from_raw(run_id);
    state.runs.resolve(&run_id, &req.request_id, req.response)?;
    Ok(Json(json!({ "ok": true })))
}

async fn abort_handler(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let run_id = RunId::from_raw(run_id);
    if state.runs.abort(&run_id) {
        Ok(Json(json!({ "ok": true })))
    } else {
        Err(ApiError::NotFound(format!("no active run {run_id}")))
    }
}

/// Aborts the run if the client goes away before the stream ends.
struct DisconnectGuard {
    runs: RunTable,
    run_id: RunId,
    armed: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.armed && self.runs.abort(&self.run_id) {
            warn!(run_id = %self.run_id, "client disconnected, run aborted");
        }
    }
}

/// Frame each event as `data: <json>\n\n` until the sink closes.
fn sse_response(runs: RunTable, run_id: RunId, mut rx: EventReceiver) -> Response {
    let mut guard = DisconnectGuard {
        runs,
        run_id: run_id.clone(),
        armed: true,
    };
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => yield Ok::<Bytes, Infallible>(Bytes::from(format!("data: {json}\n\n"))),
                Err(e) => warn!(event = event.event_type(), error = %e, "failed to serialize event"),
            }
        }
        guard.armed = false;
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Ok(value) = HeaderValue::from_str(run_id.as_str()) {
        headers.insert(RUN_ID_HEADER, value);
    }
    (headers, Body::from_stream(stream)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tether_core::events::AgentEvent;
    use tether_engine::functions::system::OBJECTIVE_FULFILLED;
    use tether_llm::mock::{MockModel, MockResponse};
    use tether_llm::sse::SseDecoder;

    async fn serve(mock: MockModel) -> (ServerHandle, String) {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            scenario_delay: Duration::ZERO,
            ..Default::default()
        };
        let handle = start(config, Arc::new(mock)).await.unwrap();
        let base = format!("http://127.0.0.1:{}", handle.port);
        (handle, base)
    }

    async fn read_events(resp: reqwest::Response) -> Vec<AgentEvent> {
        let body = resp.text().await.unwrap();
        let mut decoder = SseDecoder::new();
        let mut payloads = decoder.push(body.as_bytes());
        payloads.extend(decoder.finish());
        payloads
            .into_iter()
            .map(|p| serde_json::from_str(&p.unwrap()).unwrap())
            .collect()
    }

    fn types(events: &[AgentEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    #[tokio::test]
    async fn index_lists_scenarios() {
        let (_handle, base) = serve(MockModel::default()).await;
        let body: Value = reqwest::get(format!("{base}/"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let scenarios: Vec<_> = body["scenarios"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s.as_str().unwrap())
            .collect();
        assert!(scenarios.contains(&"echo"));
        assert_eq!(body["activeRuns"], json!([]));
    }

    #[tokio::test]
    async fn unknown_scenario_returns_400() {
        let (_handle, base) = serve(MockModel::default()).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/agent/run"))
            .json(&json!({"scenario": "nonexistent"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn empty_run_request_returns_400() {
        let (_handle, base) = serve(MockModel::default()).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/agent/run"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn unknown_run_input_and_abort_return_404() {
        let (_handle, base) = serve(MockModel::default()).await;
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base}/api/agent/fake-id/input"))
            .json(&json!({"request_id": "x", "response": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = client
            .post(format!("{base}/api/agent/fake-id/abort"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn echo_scenario_streams_over_sse() {
        let (_handle, base) = serve(MockModel::default()).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/agent/run"))
            .json(&json!({"scenario": "echo"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE.as_str()],
            "text/event-stream"
        );
        assert!(resp.headers()
            .get(RUN_ID_HEADER)
            .is_some_and(|v| v.to_str().unwrap().starts_with("run_")));

        let events = read_events(resp).await;
        assert_eq!(
            types(&events),
            vec![
                "start",
                "thought",
                "functionCall",
                "functionCallUpdate",
                "functionResult",
                "content",
                "finish",
            ]
        );
    }

    #[tokio::test]
    async fn chat_scenario_resumes_through_input_endpoint() {
        let (_handle, base) = serve(MockModel::default()).await;
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base}/api/agent/run"))
            .json(&json!({"scenario": "chat"}))
            .send()
            .await
            .unwrap();
        let run_id = resp.headers()[RUN_ID_HEADER].to_str().unwrap().to_string();

        let mut body = resp.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        while let Some(chunk) = body.next().await {
            for payload in decoder.push(&chunk.unwrap()) {
                let event: AgentEvent = serde_json::from_str(&payload.unwrap()).unwrap();
                if let AgentEvent::WaitForInput { request_id, .. } = &event {
                    let resp = client
                        .post(format!("{base}/api/agent/{run_id}/input"))
                        .json(&json!({
                            "requestId": request_id,
                            "response": {"input": {"parts": [{"text": "Build me a chatbot"}]}}
                        }))
                        .send()
                        .await
                        .unwrap();
                    assert_eq!(resp.status(), 200);
                }
                events.push(event);
            }
        }

        assert_eq!(events.last(), Some(&AgentEvent::Finish));
        let text = events
            .iter()
            .find_map(|e| match e {
                AgentEvent::Content { content } => Some(content.text()),
                _ => None,
            })
            .unwrap();
        assert!(text.contains("Build me a chatbot"));
    }

    #[tokio::test]
    async fn abort_endpoint_ends_stream_with_failed_result() {
        let (handle, base) = serve(MockModel::default()).await;
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base}/api/agent/run"))
            .json(&json!({"scenario": "consent"}))
            .send()
            .await
            .unwrap();
        let run_id = resp.headers()[RUN_ID_HEADER].to_str().unwrap().to_string();

        let mut body = resp.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        while let Some(chunk) = body.next().await {
            for payload in decoder.push(&chunk.unwrap()) {
                let event: AgentEvent = serde_json::from_str(&payload.unwrap()).unwrap();
                if event.is_suspend() {
                    let resp = client
                        .post(format!("{base}/api/agent/{run_id}/abort"))
                        .send()
                        .await
                        .unwrap();
                    assert_eq!(resp.status(), 200);
                }
                events.push(event);
            }
        }

        let kinds = types(&events);
        assert_eq!(&kinds[kinds.len() - 2..], &["error", "complete"]);
        assert!(handle.runs.is_empty());
    }

    #[tokio::test]
    async fn objective_run_requires_bearer_credential() {
        let (_handle, base) = serve(MockModel::default()).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/agent/run"))
            .json(&json!({"objective": "Tell me a joke"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn objective_run_streams_loop_to_complete() {
        let mock = MockModel::new(vec![MockResponse::function_call(
            OBJECTIVE_FULFILLED,
            json!({"objective_outcome": "Why did the crab cross the road?"}),
        )]);
        let (_handle, base) = serve(mock.clone()).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/agent/run"))
            .bearer_auth("user-token")
            .json(&json!({"objective": {"role": "user", "parts": [{"text": "Tell me a joke"}]}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let events = read_events(resp).await;
        let kinds = types(&events);
        assert_eq!(kinds[0], "start");
        assert_eq!(&kinds[kinds.len() - 2..], &["complete", "finish"]);
        match &events[events.len() - 2] {
            AgentEvent::Complete { result } => {
                assert!(result.success);
                assert_eq!(
                    result.outcomes.as_ref().unwrap().text(),
                    "Why did the crab cross the road?"
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn bearer_credential_parsing() {
        use secrecy::ExposeSecret;

        let mut headers = HeaderMap::new();
        assert!(bearer_credential(&headers).is_none());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_credential(&headers).is_none());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_credential(&headers).unwrap().expose_secret(), "abc");
    }
}
