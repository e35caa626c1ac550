//! Tool system
//!
//! Schema-validated, named operations the coding agent may invoke mid-turn.
//! Arguments are validated against each tool's declared JSON Schema before
//! dispatch; malformed input becomes an error result the agent can read and
//! correct, never a crash. Every handler wraps its side effects in a step
//! named after the originating tool call, so a resumed run replays completed
//! commands and file writes instead of re-executing them.

pub mod files;
pub mod registry;
pub mod terminal;
pub mod types;

pub use files::{CreateOrUpdateFilesTool, ReadFilesTool};
pub use registry::ToolRegistry;
pub use terminal::TerminalTool;
pub use types::{Tool, ToolContext, ToolOutput};

use serde::{Deserialize, Serialize};

/// Result of one tool dispatch, as relayed into the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub output: String,
    pub exit_code: i32,
}

impl ToolResult {
    pub fn success(name: &str, output: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            output: output.into(),
            exit_code: 0,
        }
    }

    pub fn error(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            output: message.into(),
            exit_code: 1,
        }
    }

    pub fn is_error(&self) -> bool {
        self.exit_code != 0
    }
}
