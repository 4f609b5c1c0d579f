use serde::{Deserialize, Serialize};

use crate::content::Content;

/// One decoded chunk of an upstream streaming response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseChunk {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub thoughts_token_count: u32,
}

impl ResponseChunk {
    pub fn from_content(content: Content) -> Self {
        Self {
            candidates: vec![Candidate {
                content: Some(content),
                finish_reason: None,
            }],
            usage_metadata: None,
        }
    }

    pub fn first_content(&self) -> Option<&Content> {
        self.candidates.first().and_then(|c| c.content.as_ref())
    }

    /// True when the first candidate carries at least one part.
    /// Keep-alive chunks from a flaky upstream fail this check.
    pub fn has_content(&self) -> bool {
        self.first_content().is_some_and(|c| !c.parts.is_empty())
    }
}
