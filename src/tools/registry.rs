//! Tool registry
//!
//! Holds an agent's tools and dispatches calls to them. Parameter schemas
//! are compiled once at registration; every call is validated against the
//! declared schema before its handler runs. Validation failures, unknown
//! tools, and handler errors all come back as error results — an agent must
//! be able to see and correct its own mistakes, so nothing here crashes the
//! run.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::Instrument;

use super::types::{Tool, ToolContext};
use super::ToolResult;
use crate::llm::ToolDefinition;

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: jsonschema::Validator,
}

/// Registry of the tools bound to one agent
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool, compiling its parameter schema
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let schema = tool.parameters();
        let validator = jsonschema::validator_for(&schema)
            .with_context(|| format!("Invalid parameter schema for tool '{}'", tool.name()))?;
        tracing::debug!(tool = tool.name(), "Registered tool");
        self.tools.push(RegisteredTool { tool, validator });
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|entry| entry.tool.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions advertised to the LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|entry| ToolDefinition {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                parameters: entry.tool.parameters(),
            })
            .collect()
    }

    /// Dispatch one tool call
    pub async fn execute(
        &self,
        name: &str,
        args: &serde_json::Value,
        ctx: &ToolContext,
    ) -> ToolResult {
        let span = tracing::info_span!(
            "tool.execute",
            "tool.name" = name,
            "tool.call_id" = ctx.call_id.as_str(),
        );
        async {
        let Some(entry) = self.get(name) else {
            tracing::warn!(tool = name, "Unknown tool requested");
            return ToolResult::error(name, format!("Unknown tool: {}", name));
        };

        let violations: Vec<String> = entry
            .validator
            .iter_errors(args)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            tracing::warn!(tool = name, "Rejected malformed tool arguments");
            return ToolResult::error(
                name,
                format!(
                    "Invalid arguments for {}: {}",
                    name,
                    violations.join("; ")
                ),
            );
        }

        match entry.tool.execute(args, ctx).await {
            Ok(output) => {
                if output.success {
                    ToolResult::success(name, output.content)
                } else {
                    ToolResult::error(name, output.content)
                }
            }
            Err(e) => {
                tracing::warn!(tool = name, "Tool handler failed: {:#}", e);
                ToolResult::error(name, format!("Error: {:#}", e))
            }
        }
        }
        .instrument(span)
        .await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
