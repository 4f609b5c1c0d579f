//! Functions that talk to the user by suspending the run until a reply
//! arrives through the resume endpoint.

use serde::Deserialize;
use serde_json::{json, Value};

use tether_core::content::Content;
use tether_core::events::{AgentEvent, Choice, ChoiceLayout, InputType, SelectionMode};
use tether_core::ids::RequestId;
use tether_core::request::FunctionDeclaration;

use crate::error::FunctionError;
use crate::function::{parse_args, FunctionDefinition, FunctionGroup};
use crate::sink::EventSink;

pub const REQUEST_USER_INPUT: &str = "chat_request_user_input";
pub const PRESENT_CHOICES: &str = "chat_present_choices";

const INSTRUCTION: &str = "\
You can talk to the user. Call \"chat_request_user_input\" to ask a question and wait for \
the answer, or \"chat_present_choices\" to let the user pick from a list. \
Ask only when the objective cannot be met without the user's input.";

#[derive(Deserialize)]
struct InputArgs {
    user_message: String,
    #[serde(default)]
    input_type: InputType,
}

#[derive(Deserialize)]
struct ChoicesArgs {
    user_message: String,
    choices: Vec<Choice>,
    #[serde(default)]
    selection_mode: SelectionMode,
    #[serde(default)]
    layout: Option<ChoiceLayout>,
    #[serde(default)]
    none_of_the_above_label: Option<String>,
}

#[derive(Deserialize)]
struct InputResponse {
    input: Content,
}

#[derive(Deserialize)]
struct ChoicesResponse {
    selected: Vec<String>,
}

pub fn chat_group(sink: EventSink) -> FunctionGroup {
    let input_sink = sink.clone();
    let request_input = FunctionDefinition::from_fn(
        FunctionDeclaration::new(
            REQUEST_USER_INPUT,
            "Ask the user a question and wait for the reply.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "user_message": {
                    "type": "string",
                    "description": "The message or question to show the user."
                },
                "input_type": {
                    "type": "string",
                    "enum": ["any", "text", "file-upload"],
                    "description": "What kind of input to accept. Defaults to \"any\"."
                }
            },
            "required": ["user_message"]
        }))
        .with_response(json!({
            "type": "object",
            "properties": {"user_input": {"type": "string"}}
        })),
        move |args: Value, _ctx| {
            let sink = input_sink.clone();
            async move {
                let args: InputArgs = parse_args(args)?;
                let response = sink
                    .suspend(AgentEvent::WaitForInput {
                        request_id: RequestId::new(),
                        prompt: Content::model_text(args.user_message),
                        input_type: args.input_type,
                    })
                    .await?
                    .ok_or_else(cancelled)?;
                let reply: InputResponse = serde_json::from_value(response)
                    .map_err(|e| FunctionError::Failed(format!("malformed user input: {e}")))?;
                Ok(json!({ "user_input": reply.input.text() }))
            }
        },
    )
    .with_icon("chat_mirror")
    .with_title("Asking User");

    let choices_sink = sink;
    let present_choices = FunctionDefinition::from_fn(
        FunctionDeclaration::new(
            PRESENT_CHOICES,
            "Present the user with choices and wait for the selection.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "user_message": {"type": "string", "description": "The prompt shown above the choices."},
                "choices": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "label": {"type": "string"}
                        },
                        "required": ["id", "label"]
                    }
                },
                "selection_mode": {"type": "string", "enum": ["single", "multiple"]},
                "layout": {"type": "string", "enum": ["list", "row", "grid"]},
                "none_of_the_above_label": {"type": "string"}
            },
            "required": ["user_message", "choices"]
        }))
        .with_response(json!({
            "type": "object",
            "properties": {"selected": {"type": "array", "items": {"type": "string"}}}
        })),
        move |args: Value, _ctx| {
            let sink = choices_sink.clone();
            async move {
                let args: ChoicesArgs = parse_args(args)?;
                if args.choices.is_empty() {
                    return Err(FunctionError::InvalidArguments("choices must not be empty".into()));
                }
                let response = sink
                    .suspend(AgentEvent::WaitForChoice {
                        request_id: RequestId::new(),
                        prompt: Content::model_text(args.user_message),
                        choices: args.choices,
                        selection_mode: args.selection_mode,
                        layout: args.layout,
                        none_of_the_above_label: args.none_of_the_above_label,
                    })
                    .await?
                    .ok_or_else(cancelled)?;
                let reply: ChoicesResponse = serde_json::from_value(response)
                    .map_err(|e| FunctionError::Failed(format!("malformed selection: {e}")))?;
                Ok(json!({ "selected": reply.selected }))
            }
        },
    )
    .with_icon("list_alt")
    .with_title("Presenting choices");

    FunctionGroup::new("chat")
        .with_instruction(INSTRUCTION)
        .with(request_input)
        .with(present_choices)
}

fn cancelled() -> FunctionError {
    FunctionError::Failed("the request was cancelled before the user answered".into())
}
