//! Finalizer
//!
//! Post-loop classification and persistence. Once the network halts, the
//! finalizer runs the two single-shot generator agents against the final
//! summary, resolves the sandbox's external URL, classifies the outcome, and
//! performs the run's one durable write. Every side effect here is a
//! memoized step, so an interrupted finalization resumes without duplicate
//! generator calls or — critically — a second persistence write.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::error::EngineError;
use crate::llm::LlmResponse;
use crate::sandbox::SandboxClient;
use crate::state::WorkflowState;
use crate::step::StepExecutor;
use crate::store::{Fragment, MessageRecord, MessageStore};

/// User-visible text persisted for a failed run
pub const ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Fallback title when the generator returns no text
pub const FALLBACK_TITLE: &str = "Fragment";

/// Fallback response when the generator returns no text
pub const FALLBACK_RESPONSE: &str = "Here you go!";

/// Classified result of one workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Error,
}

/// Terminal output of a workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub summary: String,
    pub files: BTreeMap<String, String>,
    pub title: String,
    pub response_text: String,
    pub sandbox_url: String,
}

/// Classify the final state.
///
/// A summary without produced files is still a failed run — both must be
/// present for success.
pub fn classify(state: &WorkflowState) -> OutcomeKind {
    if state.summary.is_empty() || state.files.is_empty() {
        OutcomeKind::Error
    } else {
        OutcomeKind::Success
    }
}

/// Extract a generator's output text, falling back when the reply carries no
/// text block
fn parse_generated(response: &LlmResponse, fallback: &str) -> String {
    let text = response.text().trim().to_string();
    if text.is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

/// Runs the post-loop sequence and the single persistence write
pub struct Finalizer {
    title_agent: Agent,
    response_agent: Agent,
    store: Arc<dyn MessageStore>,
    app_port: u16,
}

impl Finalizer {
    pub fn new(
        title_agent: Agent,
        response_agent: Agent,
        store: Arc<dyn MessageStore>,
        app_port: u16,
    ) -> Self {
        Self {
            title_agent,
            response_agent,
            store,
            app_port,
        }
    }

    pub async fn run(
        &self,
        project_id: &str,
        state: &WorkflowState,
        sandbox: &SandboxClient,
        steps: &StepExecutor,
    ) -> Result<Outcome, EngineError> {
        let kind = classify(state);
        let attempts = steps.max_attempts();

        let title_response: LlmResponse = steps
            .run("generate-fragment-title", || {
                self.title_agent.run_single(&state.summary)
            })
            .await
            .map_err(|e| EngineError::step("generate-fragment-title", attempts, e))?;
        let title = parse_generated(&title_response, FALLBACK_TITLE);

        let response: LlmResponse = steps
            .run("generate-response", || {
                self.response_agent.run_single(&state.summary)
            })
            .await
            .map_err(|e| EngineError::step("generate-response", attempts, e))?;
        let response_text = parse_generated(&response, FALLBACK_RESPONSE);

        let sandbox_url: String = steps
            .run("get-sandbox-url", || sandbox.resolve_url(self.app_port))
            .await
            .map_err(|e| EngineError::step("get-sandbox-url", attempts, e))?;

        let outcome = Outcome {
            kind,
            summary: state.summary.clone(),
            files: state.files.clone(),
            title,
            response_text,
            sandbox_url,
        };

        // The one durable write. The step records the written message id, so
        // a resumed finalization replays the id instead of writing again.
        let store = self.store.clone();
        let record = match outcome.kind {
            OutcomeKind::Error => MessageRecord::assistant_error(project_id, ERROR_MESSAGE),
            OutcomeKind::Success => MessageRecord::assistant_result(
                project_id,
                &outcome.response_text,
                Fragment {
                    sandbox_url: outcome.sandbox_url.clone(),
                    title: outcome.title.clone(),
                    files: outcome.files.clone(),
                },
            ),
        };
        let _message_id: String = steps
            .run("save-result", || {
                let store = store.clone();
                let record = record.clone();
                async move {
                    store.append(&record).await?;
                    Ok(record.id.clone())
                }
            })
            .await
            .map_err(|e| EngineError::Persistence(format!("{:#}", e)))?;

        tracing::info!(
            project = project_id,
            outcome = ?outcome.kind,
            "Workflow outcome persisted"
        );

        Ok(outcome)
    }
}
