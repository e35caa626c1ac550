//! Engine configuration
//!
//! One explicit struct passed into the workflow constructor — model choice,
//! credentials, endpoint, sandbox template, and the loop bounds. No
//! process-wide mutable state.

use std::sync::Arc;

use crate::error::EngineError;
use crate::llm::{LlmClient, OpenAiClient, SecretString};
use crate::retry::RetryPolicy;
use crate::router::DEFAULT_MAX_ITERATIONS;

/// Number of prior project messages seeded into a new run's conversation
pub const DEFAULT_HISTORY_WINDOW: usize = 5;

/// Port the generated app serves on inside the sandbox
pub const DEFAULT_APP_PORT: u16 = 3000;

/// Configuration for one workflow engine instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model driving the coding agent
    pub model: String,
    /// Model driving the title/response generators
    pub summary_model: String,
    /// API key for the LLM endpoint
    pub api_key: SecretString,
    /// Override for OpenAI-compatible endpoints
    pub base_url: Option<String>,
    /// Sandbox template provisioned per run
    pub sandbox_template: String,
    /// Port resolved to the fragment's external URL
    pub app_port: u16,
    /// Hard ceiling on router iterations
    pub max_iterations: usize,
    /// Prior messages seeded into the conversation
    pub history_window: usize,
    /// Retry policy applied to steps and LLM calls
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn new(api_key: impl Into<SecretString>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            summary_model: model.clone(),
            model,
            api_key: api_key.into(),
            base_url: None,
            sandbox_template: "codeloom-nextjs".to_string(),
            app_port: DEFAULT_APP_PORT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            history_window: DEFAULT_HISTORY_WINDOW,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_summary_model(mut self, model: impl Into<String>) -> Self {
        self.summary_model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_sandbox_template(mut self, template: impl Into<String>) -> Self {
        self.sandbox_template = template.into();
        self
    }

    pub fn with_app_port(mut self, port: u16) -> Self {
        self.app_port = port;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration before a run
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.model.is_empty() {
            return Err(EngineError::Config("model must not be empty".to_string()));
        }
        if self.summary_model.is_empty() {
            return Err(EngineError::Config(
                "summary model must not be empty".to_string(),
            ));
        }
        if self.sandbox_template.is_empty() {
            return Err(EngineError::Config(
                "sandbox template must not be empty".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(EngineError::Config(
                "max iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// LLM client for the coding agent
    pub fn agent_client(&self) -> Arc<dyn LlmClient> {
        self.client_for(&self.model)
    }

    /// LLM client for the generator agents
    pub fn summary_client(&self) -> Arc<dyn LlmClient> {
        self.client_for(&self.summary_model)
    }

    fn client_for(&self, model: &str) -> Arc<dyn LlmClient> {
        let mut client = OpenAiClient::new(self.api_key.clone(), model)
            .with_retry_policy(self.retry.clone());
        if let Some(base_url) = &self.base_url {
            client = client.with_base_url(base_url);
        }
        Arc::new(client)
    }
}
