use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::Content;
use crate::ids::{CallId, RequestId};
use crate::result::AgentResult;

/// Events flowing from a run to its transport.
///
/// Two classes share one tagged union: fire-and-forget events, and suspend
/// events that carry a `requestId` and park the emitting task until a
/// correlated response arrives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "start")]
    Start { objective: Content },

    #[serde(rename = "thought")]
    Thought { text: String },

    #[serde(rename = "functionCall", rename_all = "camelCase")]
    FunctionCall {
        call_id: CallId,
        name: String,
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },

    #[serde(rename = "functionCallUpdate", rename_all = "camelCase")]
    FunctionCallUpdate {
        call_id: CallId,
        status: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opts: Option<StatusOptions>,
    },

    #[serde(rename = "functionResult", rename_all = "camelCase")]
    FunctionResult { call_id: CallId, content: Content },

    #[serde(rename = "content")]
    Content { content: Content },

    #[serde(rename = "turnComplete")]
    TurnComplete,

    #[serde(rename = "sendRequest")]
    SendRequest { model: String, body: Value },

    #[serde(rename = "subagentAddJson", rename_all = "camelCase")]
    SubagentAddJson {
        call_id: CallId,
        title: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },

    #[serde(rename = "subagentError", rename_all = "camelCase")]
    SubagentError { call_id: CallId, error: Value },

    #[serde(rename = "subagentFinish", rename_all = "camelCase")]
    SubagentFinish { call_id: CallId },

    #[serde(rename = "complete")]
    Complete { result: AgentResult },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "finish")]
    Finish,

    // Suspend events.
    #[serde(rename = "waitForInput", rename_all = "camelCase")]
    WaitForInput {
        request_id: RequestId,
        prompt: Content,
        input_type: InputType,
    },

    #[serde(rename = "waitForChoice", rename_all = "camelCase")]
    WaitForChoice {
        request_id: RequestId,
        prompt: Content,
        choices: Vec<Choice>,
        selection_mode: SelectionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        layout: Option<ChoiceLayout>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        none_of_the_above_label: Option<String>,
    },

    #[serde(rename = "readGraph", rename_all = "camelCase")]
    ReadGraph { request_id: RequestId },

    #[serde(rename = "inspectNode", rename_all = "camelCase")]
    InspectNode { request_id: RequestId, node_id: String },

    #[serde(rename = "applyEdits", rename_all = "camelCase")]
    ApplyEdits {
        request_id: RequestId,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        edits: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<Value>,
    },

    #[serde(rename = "queryConsent", rename_all = "camelCase")]
    QueryConsent {
        request_id: RequestId,
        consent_type: String,
        scope: Value,
        graph_url: String,
    },
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Thought { .. } => "thought",
            Self::FunctionCall { .. } => "functionCall",
            Self::FunctionCallUpdate { .. } => "functionCallUpdate",
            Self::FunctionResult { .. } => "functionResult",
            Self::Content { .. } => "content",
            Self::TurnComplete => "turnComplete",
            Self::SendRequest { .. } => "sendRequest",
            Self::SubagentAddJson { .. } => "subagentAddJson",
            Self::SubagentError { .. } => "subagentError",
            Self::SubagentFinish { .. } => "subagentFinish",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Finish => "finish",
            Self::WaitForInput { .. } => "waitForInput",
            Self::WaitForChoice { .. } => "waitForChoice",
            Self::ReadGraph { .. } => "readGraph",
            Self::InspectNode { .. } => "inspectNode",
            Self::ApplyEdits { .. } => "applyEdits",
            Self::QueryConsent { .. } => "queryConsent",
        }
    }

    /// Correlation id of a suspend event; `None` for fire-and-forget events.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::WaitForInput { request_id, .. }
            | Self::WaitForChoice { request_id, .. }
            | Self::ReadGraph { request_id }
            | Self::InspectNode { request_id, .. }
            | Self::ApplyEdits { request_id, .. }
            | Self::QueryConsent { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    pub fn is_suspend(&self) -> bool {
        self.request_id().is_some()
    }
}

/// Extra presentation hints attached to a status update.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_duration_in_sec: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_thought: Option<bool>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputType {
    #[default]
    Any,
    Text,
    FileUpload,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub label: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    #[default]
    Single,
    Multiple,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChoiceLayout {
    List,
    Row,
    Grid,
}
