//! Request body sent to the upstream streaming completion service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::content::{Content, Part, Role};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
    pub tool_config: ToolConfig,
}

impl GenerateRequest {
    /// Build a request with the agent's fixed generation parameters:
    /// forced function calling and extended reasoning.
    pub fn agent(
        contents: Vec<Content>,
        declarations: Vec<FunctionDeclaration>,
        instruction: Option<&str>,
    ) -> Self {
        let system_instruction = instruction
            .filter(|text| !text.is_empty())
            .map(|text| Content::new(Some(Role::User), vec![Part::text(text)]));
        Self {
            contents,
            tools: vec![ToolSet {
                function_declarations: declarations,
            }],
            system_instruction,
            generation_config: GenerationConfig::default(),
            tool_config: ToolConfig::any(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// A tool as advertised to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_json_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_json_schema: Option<Value>,
}

impl FunctionDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_json_schema: None,
            response_json_schema: None,
        }
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters_json_schema = Some(schema);
        self
    }

    pub fn with_response(mut self, schema: Value) -> Self {
        self.response_json_schema = Some(schema);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub thinking_config: ThinkingConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 1.0,
            thinking_config: ThinkingConfig {
                include_thoughts: true,
                thinking_budget: -1,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub include_thoughts: bool,
    /// -1 lets the model pick its own budget.
    pub thinking_budget: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub function_calling_config: FunctionCallingConfig,
}

impl ToolConfig {
    pub fn any() -> Self {
        Self {
            function_calling_config: FunctionCallingConfig { mode: "ANY".into() },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallingConfig {
    pub mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_request_wire_shape() {
        let req = GenerateRequest::agent(
            vec![Content::user_text("do the thing")],
            vec![FunctionDeclaration::new("f", "does f")],
            Some("be brief"),
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{"role": "user", "parts": [{"text": "do the thing"}]}],
                "tools": [{"functionDeclarations": [{"name": "f", "description": "does f"}]}],
                "systemInstruction": {"role": "user", "parts": [{"text": "be brief"}]},
                "generationConfig": {
                    "temperature": 1.0,
                    "topP": 1.0,
                    "thinkingConfig": {"includeThoughts": true, "thinkingBudget": -1}
                },
                "toolConfig": {"functionCallingConfig": {"mode": "ANY"}}
            })
        );
    }

    #[test]
    fn empty_instruction_is_omitted() {
        let req = GenerateRequest::agent(vec![], vec![], Some(""));
        assert!(req.system_instruction.is_none());
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn declaration_schemas_only_when_present() {
        let decl = FunctionDeclaration::new("g", "does g")
            .with_parameters(json!({"type": "object"}));
        let value = serde_json::to_value(&decl).unwrap();
        assert_eq!(value["parametersJsonSchema"], json!({"type": "object"}));
        assert!(value.get("responseJsonSchema").is_none());
    }
}
