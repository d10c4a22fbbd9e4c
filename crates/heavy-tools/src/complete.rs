//! The completion sentinel.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use heavy_core::{Error, PropertySchema, Tool, ToolDefinition, ToolOutput, ToolParameters, COMPLETION_TOOL};

/// Signals that the agent has finished. The agent loop stops as soon as this
/// tool has been invoked; the tool itself only acknowledges.
pub struct MarkTaskCompleteTool;

#[derive(Deserialize)]
struct MarkTaskCompleteArgs {
    task_summary: String,
    completion_message: String,
}

#[async_trait]
impl Tool for MarkTaskCompleteTool {
    fn name(&self) -> &str {
        COMPLETION_TOOL
    }

    fn description(&self) -> &str {
        "REQUIRED: Call this tool when the user's request has been fully answered. \
         Provide a brief summary of what was done and a final message for the user."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property(
                    "task_summary",
                    PropertySchema::string("Brief summary of what was accomplished"),
                    true,
                )
                .add_property(
                    "completion_message",
                    PropertySchema::string("Message to the user confirming completion"),
                    true,
                ),
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, Error> {
        let args: MarkTaskCompleteArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool(COMPLETION_TOOL, format!("Invalid arguments: {}", e)))?;

        let payload = json!({
            "status": "completed",
            "task_summary": args.task_summary,
            "completion_message": args.completion_message,
        });
        Ok(ToolOutput::success(payload.to_string()))
    }
}
