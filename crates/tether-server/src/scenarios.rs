//! Scripted runs that drive an event sink without a model. They give
//! clients a deterministic stream to build against, suspends included.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use tether_core::content::{Content, Part};
use tether_core::events::{AgentEvent, InputType, StatusOptions};
use tether_core::ids::{CallId, RequestId};
use tether_engine::{EventSink, SinkError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    Echo,
    Chat,
    GraphEdit,
    Consent,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown scenario: {0}")]
pub struct UnknownScenario(pub String);

impl Scenario {
    pub const ALL: [Scenario; 4] = [
        Scenario::Echo,
        Scenario::Chat,
        Scenario::GraphEdit,
        Scenario::Consent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::Chat => "chat",
            Self::GraphEdit => "graph_edit",
            Self::Consent => "consent",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.name()).collect()
    }

    /// Play the scenario to its `finish` event. `delay` is the pause
    /// between steps; zero skips pausing entirely.
    pub async fn run(self, sink: EventSink, delay: Duration) -> Result<(), SinkError> {
        debug!(scenario = self.name(), "scenario started");
        match self {
            Self::Echo => echo(&sink, delay).await,
            Self::Chat => chat(&sink, delay).await,
            Self::GraphEdit => graph_edit(&sink, delay).await,
            Self::Consent => consent(&sink, delay).await,
        }
    }
}

impl FromStr for Scenario {
    type Err = UnknownScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| UnknownScenario(s.to_string()))
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn start(sink: &EventSink, objective: &str) -> Result<(), SinkError> {
    sink.emit(AgentEvent::Start {
        objective: Content::user_text(objective),
    })
}

fn thought(sink: &EventSink, text: impl Into<String>) -> Result<(), SinkError> {
    sink.emit(AgentEvent::Thought { text: text.into() })
}

fn say(sink: &EventSink, text: impl Into<String>) -> Result<(), SinkError> {
    sink.emit(AgentEvent::Content {
        content: Content::model_text(text),
    })
}

async fn echo(sink: &EventSink, delay: Duration) -> Result<(), SinkError> {
    start(sink, "Say hello")?;
    pause(delay).await;
    thought(sink, "The user wants a greeting. I'll generate a short one.")?;
    pause(delay).await;

    let call_id = CallId::new();
    sink.emit(AgentEvent::FunctionCall {
        call_id: call_id.clone(),
        name: "generate_text".into(),
        args: json!({"prompt": "Say hello"}),
        icon: Some("text_analysis".into()),
        title: Some("Generating text".into()),
    })?;
    pause(delay).await;
    sink.emit(AgentEvent::FunctionCallUpdate {
        call_id: call_id.clone(),
        status: Some("Generating".into()),
        opts: Some(StatusOptions {
            expected_duration_in_sec: Some(1),
            is_thought: None,
        }),
    })?;
    pause(delay).await;
    sink.emit(AgentEvent::FunctionResult {
        call_id,
        content: Content::new(
            None,
            vec![Part::function_response(
                "generate_text",
                json!({"text": "Hello, world!"}),
            )],
        ),
    })?;
    pause(delay).await;
    say(sink, "Hello, world!")?;
    sink.emit(AgentEvent::Finish)
}

async fn chat(sink: &EventSink, delay: Duration) -> Result<(), SinkError> {
    start(sink, "Chat with the user")?;
    pause(delay).await;
    thought(sink, "I should ask the user what they need.")?;
    pause(delay).await;

    let response = sink
        .suspend(AgentEvent::WaitForInput {
            request_id: RequestId::new(),
            prompt: Content::model_text("What would you like to build?"),
            input_type: InputType::Text,
        })
        .await?;
    let reply = response.as_ref().and_then(first_text);

    pause(delay).await;
    match reply {
        Some(text) => say(sink, format!("You said: {text}"))?,
        None => say(sink, "No input was received.")?,
    }
    sink.emit(AgentEvent::Finish)
}

/// Text of the first part of an `{input: Content}` reply.
fn first_text(response: &Value) -> Option<String> {
    response
        .pointer("/input/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn graph_edit(sink: &EventSink, delay: Duration) -> Result<(), SinkError> {
    start(sink, "Add a summary step to my graph")?;
    pause(delay).await;
    thought(sink, "First I need to see the current graph.")?;

    let graph = sink
        .suspend(AgentEvent::ReadGraph {
            request_id: RequestId::new(),
        })
        .await?
        .unwrap_or(Value::Null);
    let nodes = graph
        .pointer("/graph/nodes")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    let noun = if nodes == 1 { "node" } else { "nodes" };
    thought(sink, format!("The graph has {nodes} {noun}. Adding a summary step."))?;
    pause(delay).await;

    let applied = sink
        .suspend(AgentEvent::ApplyEdits {
            request_id: RequestId::new(),
            label: "Add summary step".into(),
            edits: Some(json!([{
                "type": "addnode",
                "node": {
                    "id": "summary",
                    "type": "agent",
                    "metadata": {"title": "Summarize"}
                }
            }])),
            transform: None,
        })
        .await?
        .and_then(|r| r.get("success").and_then(Value::as_bool))
        .unwrap_or(false);

    pause(delay).await;
    if applied {
        say(sink, "Added a summary step to your graph.")?;
    } else {
        say(sink, "The edit was not applied.")?;
    }
    sink.emit(AgentEvent::Finish)
}

async fn consent(sink: &EventSink, delay: Duration) -> Result<(), SinkError> {
    start(sink, "Fetch a web page")?;
    pause(delay).await;
    thought(sink, "Fetching a page needs the user's permission.")?;

    let granted = sink
        .suspend(AgentEvent::QueryConsent {
            request_id: RequestId::new(),
            consent_type: "GET_ANY_WEBPAGE".into(),
            scope: json!({}),
            graph_url: "drive:/mock-graph".into(),
        })
        .await?
        .and_then(|r| r.as_bool())
        .unwrap_or(false);

    pause(delay).await;
    if granted {
        say(sink, "Thanks for granting access. Fetching the page now.")?;
    } else {
        say(sink, "You declined access, so I won't fetch the page.")?;
    }
    sink.emit(AgentEvent::Finish)
}
