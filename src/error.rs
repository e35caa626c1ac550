//! Error types for the workflow engine
//!
//! Only failures that end a run without a valid outcome live here. Tool-level
//! problems (bad arguments, failed commands, missing files) are converted to
//! diagnostic text and fed back into the conversation instead.

use thiserror::Error;

/// Fatal-to-run errors surfaced to the triggering caller
#[derive(Debug, Error)]
pub enum EngineError {
    /// Sandbox provisioning failure — no sandbox, no possible progress
    #[error("Failed to provision sandbox from template '{template}': {reason}")]
    SandboxProvision { template: String, reason: String },

    /// A memoized step failed and the retry policy was exhausted
    #[error("Step '{name}' failed after {attempts} attempts: {reason}")]
    StepExhausted {
        name: String,
        attempts: u32,
        reason: String,
    },

    /// The completion write could not be performed
    #[error("Failed to persist workflow outcome: {0}")]
    Persistence(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Step-failure constructor used by the workflow when a step error
    /// escalates to fatal.
    pub fn step(name: impl Into<String>, attempts: u32, reason: impl std::fmt::Display) -> Self {
        Self::StepExhausted {
            name: name.into(),
            attempts,
            reason: reason.to_string(),
        }
    }
}
