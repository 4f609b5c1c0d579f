use serde::{Deserialize, Serialize};

use crate::content::Content;

/// Final payload of a run, fixed once by the termination controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    #[serde(default = "default_href")]
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcomes: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate: Option<Vec<IntermediateFile>>,
}

impl AgentResult {
    pub fn succeeded(href: impl Into<String>, outcomes: Content) -> Self {
        Self {
            success: true,
            href: href.into(),
            outcomes: Some(outcomes),
            intermediate: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            href: default_href(),
            outcomes: Some(Content::bare_text(message)),
            intermediate: None,
        }
    }
}

/// A file produced along the way, keyed by its path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntermediateFile {
    pub path: String,
    pub content: Content,
}

fn default_href() -> String {
    "/".into()
}

/// What a loop run returns: a fixed result, or a structured error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Finished(AgentResult),
    Errored {
        #[serde(rename = "$error")]
        error: String,
    },
}

impl RunOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Errored {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Errored { .. })
    }

    pub fn result(&self) -> Option<&AgentResult> {
        match self {
            Self::Finished(result) => Some(result),
            Self::Errored { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Finished(_) => None,
            Self::Errored { error } => Some(error),
        }
    }
}
