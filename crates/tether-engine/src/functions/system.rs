use serde::Deserialize;
use serde_json::{json, Value};

use tether_core::content::Content;
use tether_core::request::FunctionDeclaration;
use tether_core::result::AgentResult;

use crate::controller::LoopController;
use crate::function::{parse_args, FunctionDefinition, FunctionGroup};

pub const OBJECTIVE_FULFILLED: &str = "system_objective_fulfilled";
pub const FAILED_TO_FULFILL: &str = "system_failed_to_fulfill_objective";

const INSTRUCTION: &str = "\
You are an agent working toward the objective given at the start of the conversation. \
Work only through function calls. \
When the objective is fully met, call \"system_objective_fulfilled\" with the outcome as \
\"objective_outcome\". Return only what the objective asks for, with no preamble. \
If the objective cannot be met with the functions available, call \
\"system_failed_to_fulfill_objective\" with a short, friendly \"user_message\" explaining why.";

#[derive(Deserialize)]
struct FulfilledArgs {
    objective_outcome: String,
    #[serde(default)]
    href: Option<String>,
}

#[derive(Deserialize)]
struct FailedArgs {
    user_message: String,
    #[serde(default)]
    href: Option<String>,
}

/// The termination functions. Calling either ends the run after the
/// current round.
pub fn system_group(controller: LoopController) -> FunctionGroup {
    let on_success = controller.clone();
    let fulfilled = FunctionDefinition::from_fn(
        FunctionDeclaration::new(
            OBJECTIVE_FULFILLED,
            "Inform the system that the objective has been fulfilled and deliver the outcome.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "objective_outcome": {
                    "type": "string",
                    "description": "The outcome of the work. Only what the objective asks for."
                },
                "href": {
                    "type": "string",
                    "description": "Optional URL of the agent to hand the outcome to. Defaults to \"/\"."
                }
            },
            "required": ["objective_outcome"]
        })),
        move |args: Value, _ctx| {
            let controller = on_success.clone();
            async move {
                let args: FulfilledArgs = parse_args(args)?;
                let href = args.href.unwrap_or_else(|| "/".into());
                controller.terminate(AgentResult::succeeded(
                    href,
                    Content::bare_text(args.objective_outcome),
                ));
                Ok(json!({}))
            }
        },
    )
    .with_icon("check_circle")
    .with_title("Returning final outcome");

    let on_failure = controller;
    let failed = FunctionDefinition::from_fn(
        FunctionDeclaration::new(
            FAILED_TO_FULFILL,
            "Inform the system that the objective cannot be fulfilled.",
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "user_message": {
                    "type": "string",
                    "description": "Why the objective cannot be fulfilled, and what the user could try instead."
                },
                "href": {
                    "type": "string",
                    "description": "Optional URL of the agent to hand control to. Defaults to \"/\"."
                }
            },
            "required": ["user_message"]
        })),
        move |args: Value, _ctx| {
            let controller = on_failure.clone();
            async move {
                let args: FailedArgs = parse_args(args)?;
                let mut result = AgentResult::failed(args.user_message);
                if let Some(href) = args.href {
                    result.href = href;
                }
                controller.terminate(result);
                Ok(json!({}))
            }
        },
    )
    .with_icon("cancel")
    .with_title("Unable to proceed");

    FunctionGroup::new("system")
        .with_instruction(INSTRUCTION)
        .with(fulfilled)
        .with(failed)
}
