//! Core types for the tool system

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sandbox::SandboxClient;
use crate::state::SharedState;
use crate::step::StepExecutor;

/// Tool execution context
///
/// Hands tools the run's sandbox, shared state, and step executor. The
/// `call_id` is the originating tool call's id; handlers derive their step
/// names from it so each call site memoizes independently.
#[derive(Clone)]
pub struct ToolContext {
    pub sandbox: SandboxClient,
    pub state: SharedState,
    pub steps: StepExecutor,
    pub call_id: String,
}

impl ToolContext {
    pub fn new(sandbox: SandboxClient, state: SharedState, steps: StepExecutor) -> Self {
        Self {
            sandbox,
            state,
            steps,
            call_id: String::new(),
        }
    }

    /// Context for one specific tool call
    pub fn for_call(&self, call_id: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.call_id = call_id.into();
        ctx
    }

    /// Step name for this call's side effects
    pub fn step_name(&self, tool_name: &str) -> String {
        format!("{}:{}", tool_name, self.call_id)
    }
}

/// Tool execution output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Output content relayed to the agent
    pub content: String,
    /// Whether execution was successful
    pub success: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            success: false,
        }
    }
}

/// Tool trait — the core abstraction for all tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must be unique within registry)
    fn name(&self) -> &str;

    /// Human-readable description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for tool parameters
    fn parameters(&self) -> serde_json::Value;

    /// Execute the tool with schema-validated arguments
    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_output_success() {
        let output = ToolOutput::success("Hello");
        assert!(output.success);
        assert_eq!(output.content, "Hello");
    }

    #[test]
    fn test_tool_output_error() {
        let output = ToolOutput::error("Failed");
        assert!(!output.success);
        assert_eq!(output.content, "Failed");
    }
}
