//! Terminal tool — run shell commands in the sandbox

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::types::{Tool, ToolContext, ToolOutput};

/// Runs one shell command in the run's sandbox.
///
/// Returns captured stdout; a failed command yields a diagnostic string
/// embedding the failure and both output buffers, so the agent can see what
/// went wrong and react. The command runs inside a step named after the tool
/// call — a resumed run replays the recorded output instead of re-executing.
pub struct TerminalTool;

#[derive(Debug, Deserialize)]
struct TerminalArgs {
    command: String,
}

#[async_trait]
impl Tool for TerminalTool {
    fn name(&self) -> &str {
        "terminal"
    }

    fn description(&self) -> &str {
        "Use the terminal to run commands"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: TerminalArgs =
            serde_json::from_value(args.clone()).context("Failed to parse terminal arguments")?;

        let sandbox = ctx.sandbox.clone();
        let command = args.command.clone();
        let output: String = ctx
            .steps
            .run(&ctx.step_name("terminal"), || {
                let sandbox = sandbox.clone();
                let command = command.clone();
                async move { Ok(sandbox.run_command(&command).await) }
            })
            .await?;

        Ok(ToolOutput::success(output))
    }
}
