use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tether_core::content::Content;
use tether_core::ids::CallId;
use tether_core::provider::ModelClient;
use tether_core::request::GenerateRequest;
use tether_core::result::RunOutcome;

use crate::controller::LoopController;
use crate::dispatcher::{panic_message, FunctionCaller};
use crate::error::EngineError;
use crate::function::{FunctionGroup, StatusUpdater, Toolset};
use crate::hooks::{CallHandle, LoopHooks, NoHooks};

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

const NO_CANDIDATES: &str = "Agent unable to proceed: no candidates in Gemini response";
const NO_CONTENT: &str = "Agent unable to proceed: no content in Gemini response";

/// Per-run loop settings.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub model: String,
    /// Rounds allowed before the run is cut off. `None` is unbounded.
    pub max_rounds: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.into(),
            max_rounds: None,
        }
    }
}

/// Inputs for one run.
pub struct RunArgs {
    pub objective: Content,
    pub groups: Vec<FunctionGroup>,
    pub hooks: Arc<dyn LoopHooks>,
    /// Prior history to resume from. Empty or absent starts from the objective.
    pub contents: Option<Vec<Content>>,
}

impl RunArgs {
    pub fn new(objective: Content, groups: Vec<FunctionGroup>) -> Self {
        Self {
            objective,
            groups,
            hooks: Arc::new(NoHooks),
            contents: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LoopHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_contents(mut self, contents: Vec<Content>) -> Self {
        self.contents = Some(contents);
        self
    }
}

/// Drives rounds of model streaming and function dispatch until a handler
/// terminates the run.
pub struct AgentLoop {
    client: Arc<dyn ModelClient>,
    credential: SecretString,
    controller: LoopController,
    config: LoopConfig,
    cancel: CancellationToken,
}

impl AgentLoop {
    pub fn new(client: Arc<dyn ModelClient>, credential: SecretString, config: LoopConfig) -> Self {
        Self {
            client,
            credential,
            controller: LoopController::new(),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use a controller the caller already handed to its function groups.
    pub fn with_controller(mut self, controller: LoopController) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn controller(&self) -> &LoopController {
        &self.controller
    }

    /// Run to completion. Never fails: loop errors and panics become an
    /// errored outcome, and `on_finish` fires on every exit path.
    #[instrument(skip_all, fields(model = %self.config.model, client = self.client.name()))]
    pub async fn run(&self, args: RunArgs) -> RunOutcome {
        let RunArgs {
            objective,
            groups,
            hooks,
            contents,
        } = args;

        hooks.on_start(&objective);

        let driven = AssertUnwindSafe(self.drive(objective, &groups, Arc::clone(&hooks), contents))
            .catch_unwind()
            .await;
        let outcome = match driven {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(error = %e, "agent run failed");
                RunOutcome::error(format!("Agent error: {e}"))
            }
            Err(panic) => {
                let msg = panic_message(&panic);
                error!(panic = %msg, "agent loop panicked");
                RunOutcome::error(format!("Agent error: {msg}"))
            }
        };

        hooks.on_finish();
        outcome
    }

    async fn drive(
        &self,
        objective: Content,
        groups: &[FunctionGroup],
        hooks: Arc<dyn LoopHooks>,
        contents: Option<Vec<Content>>,
    ) -> Result<RunOutcome, EngineError> {
        let toolset = Toolset::from_groups(groups);
        let mut history = contents
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| vec![objective]);
        let mut round = 0u32;

        while !self.controller.is_terminated() {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }
            if let Some(max) = self.config.max_rounds {
                if round >= max {
                    return Err(EngineError::MaxRoundsExceeded(max));
                }
            }
            round += 1;
            debug!(round, history = history.len(), "starting round");

            let body = GenerateRequest::agent(
                history.clone(),
                toolset.declarations.clone(),
                toolset.instruction.as_deref(),
            );
            hooks.on_send_request(&self.config.model, &body);

            let mut caller = FunctionCaller::new(Arc::clone(&toolset.definitions));
            let mut stream = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(EngineError::Aborted),
                stream = self.client.stream(&self.config.model, &body, &self.credential) => stream?,
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(EngineError::Aborted),
                    next = stream.next() => next,
                };
                let Some(chunk) = next else { break };
                let chunk = chunk?;

                let Some(candidate) = chunk.candidates.into_iter().next() else {
                    warn!(round, "response chunk without candidates");
                    return Ok(RunOutcome::error(NO_CANDIDATES));
                };
                let Some(content) = candidate.content else {
                    warn!(round, "response candidate without content");
                    return Ok(RunOutcome::error(NO_CONTENT));
                };

                history.push(content.clone());
                hooks.on_content(&content);

                for part in &content.parts {
                    if let Some(text) = part.thought_text() {
                        hooks.on_thought(text);
                    }
                    let Some(call) = &part.function_call else {
                        continue;
                    };

                    let definition = toolset.definitions.get(&call.name);
                    let icon = definition.and_then(|d| d.icon.as_deref());
                    let title = definition.and_then(|d| d.title.as_deref());
                    let CallHandle { call_id, reporter } = hooks
                        .on_function_call(call, icon, title)
                        .unwrap_or_else(|| CallHandle {
                            call_id: CallId::new(),
                            reporter: None,
                        });

                    let status = {
                        let hooks = Arc::clone(&hooks);
                        let call_id = call_id.clone();
                        StatusUpdater::new(move |status, opts| {
                            hooks.on_function_call_update(&call_id, status, opts)
                        })
                    };
                    debug!(round, function = %call.name, call_id = %call_id, "dispatching");
                    caller.call(call_id, call, status, reporter);
                }
            }

            let results = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(EngineError::Aborted),
                results = caller.get_results() => results,
            };
            let Some(round_results) = results else {
                debug!(round, "no function calls, continuing");
                continue;
            };

            for result in &round_results.results {
                hooks.on_function_result(
                    &result.call_id,
                    &Content::new(None, vec![result.response.clone()]),
                );
            }
            hooks.on_content(&round_results.combined);
            history.push(round_results.combined);
            hooks.on_turn_complete();
        }

        let result = self.controller.result()?;
        info!(rounds = round, success = result.success, "agent run terminated");
        Ok(RunOutcome::Finished(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tether_core::content::Part;
    use tether_core::errors::GatewayError;
    use tether_core::events::AgentEvent;
    use tether_core::stream::{Candidate, ResponseChunk};
    use tether_llm::mock::{MockModel, MockResponse};

    use crate::functions::chat::REQUEST_USER_INPUT;
    use crate::functions::system::{FAILED_TO_FULFILL, OBJECTIVE_FULFILLED};
    use crate::functions::{chat_group, system_group};
    use crate::hooks::SinkHooks;
    use crate::pending::PendingRequests;
    use crate::sink::{EventReceiver, EventSink};

    struct Harness {
        agent: AgentLoop,
        sink: EventSink,
        rx: EventReceiver,
    }

    fn harness(mock: &MockModel, config: LoopConfig) -> Harness {
        let agent = AgentLoop::new(
            Arc::new(mock.clone()),
            SecretString::from("test-key"),
            config,
        );
        let (sink, rx) = EventSink::new(PendingRequests::new());
        Harness { agent, sink, rx }
    }

    impl Harness {
        fn args(&self) -> RunArgs {
            RunArgs::new(
                Content::user_text("Tell me a joke"),
                vec![
                    system_group(self.agent.controller().clone()),
                    chat_group(self.sink.clone()),
                ],
            )
            .with_hooks(Arc::new(SinkHooks::new(self.sink.clone())))
        }

        async fn events(self) -> Vec<AgentEvent> {
            self.sink.close();
            self.rx.collect().await
        }
    }

    fn fulfilled(outcome: &str) -> MockResponse {
        MockResponse::function_call(OBJECTIVE_FULFILLED, json!({"objective_outcome": outcome}))
    }

    fn types(events: &[AgentEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    #[tokio::test]
    async fn fulfilled_call_ends_run_with_success() {
        let mock = MockModel::new(vec![MockResponse::parts(vec![
            Part::thought("Picking a joke"),
            Part::function_call(OBJECTIVE_FULFILLED, json!({"objective_outcome": "Knock knock"})),
        ])]);
        let h = harness(&mock, LoopConfig::default());

        let outcome = h.agent.run(h.args()).await;
        let result = outcome.result().unwrap();
        assert!(result.success);
        assert_eq!(result.outcomes.as_ref().unwrap().text(), "Knock knock");
        assert_eq!(mock.call_count(), 1);

        let events = h.events().await;
        assert_eq!(
            types(&events),
            vec![
                "start",
                "sendRequest",
                "content",
                "thought",
                "functionCall",
                "functionResult",
                "content",
                "turnComplete",
                "finish",
            ]
        );
        assert_eq!(events[3], AgentEvent::Thought { text: "Picking a joke".into() });
        match &events[4] {
            AgentEvent::FunctionCall { icon, title, .. } => {
                assert_eq!(icon.as_deref(), Some("check_circle"));
                assert_eq!(title.as_deref(), Some("Returning final outcome"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_call_ends_run_with_failure() {
        let mock = MockModel::new(vec![MockResponse::function_call(
            FAILED_TO_FULFILL,
            json!({"user_message": "I cannot do that"}),
        )]);
        let h = harness(&mock, LoopConfig::default());

        let outcome = h.agent.run(h.args()).await;
        let result = outcome.result().unwrap();
        assert!(!result.success);
        assert_eq!(result.outcomes.as_ref().unwrap().text(), "I cannot do that");
    }

    #[tokio::test]
    async fn request_carries_declarations_and_instruction() {
        let mock = MockModel::new(vec![fulfilled("ok")]);
        let h = harness(&mock, LoopConfig::default());
        h.agent.run(h.args()).await;

        let request = &mock.requests()[0];
        assert_eq!(request.contents, vec![Content::user_text("Tell me a joke")]);
        let names: Vec<_> = request.tools[0]
            .function_declarations
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert!(names.contains(&OBJECTIVE_FULFILLED));
        assert!(names.contains(&REQUEST_USER_INPUT));
        let instruction = request.system_instruction.as_ref().unwrap().text();
        assert!(instruction.contains("\n\n"));
    }

    #[tokio::test]
    async fn text_only_round_continues() {
        let mock = MockModel::new(vec![MockResponse::text("Let me think"), fulfilled("done")]);
        let h = harness(&mock, LoopConfig::default());

        let outcome = h.agent.run(h.args()).await;
        assert!(outcome.result().unwrap().success);
        assert_eq!(mock.call_count(), 2);

        let second = &mock.requests()[1];
        assert_eq!(second.contents.len(), 2);
        assert_eq!(second.contents[1].text(), "Let me think");
    }

    #[tokio::test]
    async fn history_keeps_model_content_before_tool_results() {
        let mock = MockModel::new(vec![
            MockResponse::function_call("no_such_function", json!({})),
            fulfilled("done"),
        ]);
        let h = harness(&mock, LoopConfig::default());
        h.agent.run(h.args()).await;

        let contents = &mock.requests()[1].contents;
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].function_calls().next().unwrap().name, "no_such_function");
        let response = contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(
            response.response,
            json!({"error": "Unknown function: no_such_function"})
        );
    }

    #[tokio::test]
    async fn prior_contents_replace_objective() {
        let mock = MockModel::new(vec![fulfilled("done")]);
        let h = harness(&mock, LoopConfig::default());
        let history = vec![
            Content::user_text("Earlier question"),
            Content::model_text("Earlier answer"),
        ];
        h.agent.run(h.args().with_contents(history.clone())).await;
        assert_eq!(mock.requests()[0].contents, history);
    }

    #[tokio::test]
    async fn chunk_without_candidates_is_an_error() {
        let mock = MockModel::new(vec![MockResponse::Chunks(vec![ResponseChunk::default()])]);
        let h = harness(&mock, LoopConfig::default());

        let outcome = h.agent.run(h.args()).await;
        assert_eq!(outcome.error_message(), Some(NO_CANDIDATES));
        let events = h.events().await;
        assert_eq!(events.last(), Some(&AgentEvent::Finish));
    }

    #[tokio::test]
    async fn candidate_without_content_is_an_error() {
        let chunk = ResponseChunk {
            candidates: vec![Candidate::default()],
            usage_metadata: None,
        };
        let mock = MockModel::new(vec![MockResponse::Chunks(vec![chunk])]);
        let h = harness(&mock, LoopConfig::default());

        let outcome = h.agent.run(h.args()).await;
        assert_eq!(outcome.error_message(), Some(NO_CONTENT));
    }

    #[tokio::test]
    async fn upstream_status_becomes_agent_error() {
        let mock = MockModel::new(vec![MockResponse::Error(GatewayError::from_status(
            500,
            "boom".into(),
        ))]);
        let h = harness(&mock, LoopConfig::default());

        let outcome = h.agent.run(h.args()).await;
        let msg = outcome.error_message().unwrap();
        assert!(msg.starts_with("Agent error: "), "got: {msg}");
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn round_cap_stops_the_loop() {
        let mock = MockModel::new(vec![
            MockResponse::text("a"),
            MockResponse::text("b"),
            MockResponse::text("c"),
        ]);
        let config = LoopConfig {
            max_rounds: Some(2),
            ..Default::default()
        };
        let h = harness(&mock, config);

        let outcome = h.agent.run(h.args()).await;
        assert!(outcome.error_message().unwrap().contains("max rounds exceeded: 2"));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_calls_model() {
        let mock = MockModel::new(vec![fulfilled("never")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut h = harness(&mock, LoopConfig::default());
        h.agent = h.agent.with_cancel(cancel);

        let outcome = h.agent.run(h.args()).await;
        assert!(outcome.error_message().unwrap().contains("aborted"));
        assert_eq!(mock.call_count(), 0);
        let events = h.events().await;
        assert_eq!(types(&events), vec!["start", "finish"]);
    }

    #[tokio::test]
    async fn cancel_interrupts_slow_stream() {
        tokio::time::pause();
        let mock = MockModel::new(vec![MockResponse::delayed(
            Duration::from_secs(60),
            fulfilled("late"),
        )]);
        let cancel = CancellationToken::new();
        let mut h = harness(&mock, LoopConfig::default());
        h.agent = h.agent.with_cancel(cancel.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let outcome = h.agent.run(h.args()).await;
        assert!(outcome.is_error());
        assert!(!h.agent.controller().is_terminated());
    }

    #[tokio::test]
    async fn suspending_function_resumes_through_registry() {
        let mock = MockModel::new(vec![
            MockResponse::function_call(REQUEST_USER_INPUT, json!({"user_message": "Your name?"})),
            fulfilled("Hello Ada"),
        ]);
        let Harness { agent, sink, mut rx } = harness(&mock, LoopConfig::default());
        let args = RunArgs::new(
            Content::user_text("Greet the user"),
            vec![
                system_group(agent.controller().clone()),
                chat_group(sink.clone()),
            ],
        )
        .with_hooks(Arc::new(SinkHooks::new(sink.clone())));

        let run = tokio::spawn(async move { agent.run(args).await });

        let request_id = loop {
            let event = rx.recv().await.unwrap();
            if let AgentEvent::WaitForInput { request_id, .. } = event {
                break request_id;
            }
        };
        assert!(sink
            .pending()
            .resolve(&request_id, json!({"input": {"parts": [{"text": "Ada"}]}})));

        let outcome = run.await.unwrap();
        assert_eq!(outcome.result().unwrap().outcomes.as_ref().unwrap().text(), "Hello Ada");

        let fed_back = &mock.requests()[1].contents[2].parts[0];
        assert_eq!(
            fed_back.function_response.as_ref().unwrap().response,
            json!({"user_input": "Ada"})
        );
    }

    struct PanickingHooks {
        finished: Arc<AtomicBool>,
    }

    impl LoopHooks for PanickingHooks {
        fn on_content(&self, _content: &Content) {
            panic!("hook exploded");
        }

        fn on_finish(&self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn panic_in_hook_becomes_error_and_finish_still_fires() {
        let mock = MockModel::new(vec![MockResponse::text("hi")]);
        let h = harness(&mock, LoopConfig::default());
        let finished = Arc::new(AtomicBool::new(false));
        let args = h.args().with_hooks(Arc::new(PanickingHooks {
            finished: Arc::clone(&finished),
        }));

        let outcome = h.agent.run(args).await;
        assert_eq!(outcome.error_message(), Some("Agent error: hook exploded"));
        assert!(finished.load(Ordering::SeqCst));
    }
}
