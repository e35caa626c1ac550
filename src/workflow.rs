//! The durable code-agent workflow
//!
//! One invocation of [`CodeWorkflow::run`] is one workflow instance: it
//! provisions a sandbox, seeds the conversation from project history, runs
//! the bounded agent network, and finalizes. The function is written to be
//! re-entered from the top after a crash or host-driven resume — every side
//! effect sits behind a memoized step keyed by the request's `run_id`, so a
//! replay only re-executes work that never completed.
//!
//! Only two failures escape this function: sandbox provisioning (no sandbox,
//! no possible progress) and anything a step's retry policy could not
//! absorb. Everything else ends as a classified, persisted outcome.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::agent::{task_summary_hook, Agent};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::finalizer::{Finalizer, Outcome};
use crate::llm::Message;
use crate::prompts;
use crate::router::Network;
use crate::sandbox::{SandboxBackend, SandboxClient};
use crate::state::WorkflowState;
use crate::step::{StepExecutor, StepLog};
use crate::store::{MessageRole, MessageStore};
use crate::tools::{CreateOrUpdateFilesTool, ReadFilesTool, TerminalTool, ToolContext, ToolRegistry};

/// Trigger payload for one workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    /// Durable identifier of this instance. A retried or resumed job must
    /// carry the same id so its steps replay instead of re-running.
    pub run_id: String,
    pub project_id: String,
    /// The user's natural-language request
    pub prompt: String,
}

impl WorkflowRequest {
    /// New instance with a fresh run id
    pub fn new(project_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            prompt: prompt.into(),
        }
    }
}

/// The orchestration engine for one project's coding runs
pub struct CodeWorkflow {
    config: EngineConfig,
    sandbox_backend: Arc<dyn SandboxBackend>,
    message_store: Arc<dyn MessageStore>,
    step_log: Arc<dyn StepLog>,
    agent_client: Option<Arc<dyn crate::llm::LlmClient>>,
    summary_client: Option<Arc<dyn crate::llm::LlmClient>>,
}

impl CodeWorkflow {
    pub fn new(
        config: EngineConfig,
        sandbox_backend: Arc<dyn SandboxBackend>,
        message_store: Arc<dyn MessageStore>,
        step_log: Arc<dyn StepLog>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            sandbox_backend,
            message_store,
            step_log,
            agent_client: None,
            summary_client: None,
        })
    }

    /// Override the coding agent's LLM client (tests, custom backends)
    pub fn with_agent_client(mut self, client: Arc<dyn crate::llm::LlmClient>) -> Self {
        self.agent_client = Some(client);
        self
    }

    /// Override the generators' LLM client (tests, custom backends)
    pub fn with_summary_client(mut self, client: Arc<dyn crate::llm::LlmClient>) -> Self {
        self.summary_client = Some(client);
        self
    }

    /// Execute one workflow instance to its outcome
    pub async fn run(&self, request: WorkflowRequest) -> Result<Outcome, EngineError> {
        let span = tracing::info_span!(
            "workflow.run",
            "workflow.run_id" = request.run_id.as_str(),
            "workflow.project_id" = request.project_id.as_str(),
        );
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: WorkflowRequest) -> Result<Outcome, EngineError> {
        let steps = StepExecutor::new(&request.run_id, self.step_log.clone())
            .with_retry_policy(self.config.retry.clone());
        let attempts = steps.max_attempts();

        // Provision the run's sandbox. Memoized: a resume reuses the
        // existing sandbox instead of provisioning a second one.
        let backend = self.sandbox_backend.clone();
        let template = self.config.sandbox_template.clone();
        let sandbox_id: String = steps
            .run("get-sandbox-id", || {
                let backend = backend.clone();
                let template = template.clone();
                async move { backend.create(&template).await }
            })
            .await
            .map_err(|e| EngineError::SandboxProvision {
                template: self.config.sandbox_template.clone(),
                reason: format!("{:#}", e),
            })?;
        let sandbox = SandboxClient::new(self.sandbox_backend.clone(), sandbox_id);

        // Seed the conversation from the project's most recent messages,
        // re-ordered oldest-first.
        let store = self.message_store.clone();
        let project_id = request.project_id.clone();
        let window = self.config.history_window;
        let seeded: Vec<Message> = steps
            .run("get-previous-messages", || {
                let store = store.clone();
                let project_id = project_id.clone();
                async move {
                    let recent = store.recent_for_project(&project_id, window).await?;
                    let messages = recent
                        .into_iter()
                        .rev()
                        .map(|record| match record.role {
                            MessageRole::User => Message::user(&record.content),
                            MessageRole::Assistant => Message::assistant(&record.content),
                        })
                        .collect::<Vec<_>>();
                    Ok(messages)
                }
            })
            .await
            .map_err(|e| EngineError::step("get-previous-messages", attempts, e))?;

        let state = WorkflowState::new().shared();
        let ctx = ToolContext::new(sandbox.clone(), state.clone(), steps.clone());

        let mut tools = ToolRegistry::new();
        for tool in [
            Arc::new(TerminalTool) as Arc<dyn crate::tools::Tool>,
            Arc::new(CreateOrUpdateFilesTool),
            Arc::new(ReadFilesTool),
        ] {
            tools
                .register(tool)
                .map_err(|e| EngineError::Config(format!("{:#}", e)))?;
        }

        let agent_client = self
            .agent_client
            .clone()
            .unwrap_or_else(|| self.config.agent_client());
        let summary_client = self
            .summary_client
            .clone()
            .unwrap_or_else(|| self.config.summary_client());

        let code_agent = Agent::new("code-agent", prompts::CODE_AGENT_SYSTEM, agent_client)
            .with_tools(tools)
            .with_response_hook(task_summary_hook());

        let network =
            Network::new(vec![code_agent]).with_max_iterations(self.config.max_iterations);
        let result = network
            .run(&request.prompt, seeded, &ctx)
            .await
            .map_err(|e| EngineError::step("agent-network", attempts, e))?;

        tracing::info!(
            iterations = result.iterations,
            "Agent network halted, finalizing"
        );

        let final_state = state.lock().unwrap().clone();
        let finalizer = Finalizer::new(
            Agent::new(
                "fragment-title-agent",
                prompts::FRAGMENT_TITLE,
                summary_client.clone(),
            ),
            Agent::new("response-agent", prompts::RESPONSE_GENERATOR, summary_client),
            self.message_store.clone(),
            self.config.app_port,
        );

        finalizer
            .run(&request.project_id, &final_state, &sandbox, &steps)
            .await
    }
}
