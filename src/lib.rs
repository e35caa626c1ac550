//! Codeloom Engine
//!
//! Durable agent-orchestration engine for sandboxed app generation. Given a
//! natural-language request, it runs a bounded loop of an AI coding agent
//! against a remote sandbox (virtual filesystem plus shell) until the task
//! is judged complete, then classifies and persists the result.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use codeloom::{CodeWorkflow, EngineConfig, WorkflowRequest};
//! use codeloom::sandbox::MockSandbox;
//! use codeloom::step::FileStepLog;
//! use codeloom::store::FileMessageStore;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EngineConfig::new("sk-...", "gpt-4.1")
//!     .with_summary_model("gpt-4.1-mini")
//!     .with_base_url("https://llm.internal/v1");
//!
//! let workflow = CodeWorkflow::new(
//!     config,
//!     Arc::new(MockSandbox::new()),
//!     Arc::new(FileMessageStore::new("data/messages").await?),
//!     Arc::new(FileStepLog::new("data/steps").await?),
//! )?;
//!
//! let outcome = workflow
//!     .run(WorkflowRequest::new("project-1", "create a hello-world page"))
//!     .await?;
//! println!("{} -> {}", outcome.title, outcome.sandbox_url);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! CodeWorkflow (durable function)
//!   +-- StepExecutor (write-once memoization over a StepLog)
//!   +-- SandboxClient (typed facade over a SandboxBackend)
//!   +-- Network (state-driven router, bounded at 15 iterations)
//!   |     +-- Agent (one completion + tool dispatch per turn)
//!   |           +-- ToolRegistry (schema-validated terminal/file tools)
//!   +-- Finalizer (generators, classification, the one persistence write)
//! ```
//!
//! Every side-effecting action runs inside a memoized step, so re-entering
//! the workflow function from the top after a crash only re-executes work
//! that never completed.

pub mod agent;
pub mod config;
pub mod error;
pub mod finalizer;
pub mod llm;
pub mod prompts;
pub mod retry;
pub mod router;
pub mod sandbox;
pub mod state;
pub mod step;
pub mod store;
pub mod telemetry;
pub mod tools;
pub mod workflow;

// Re-export key types at crate root for ergonomic usage
pub use agent::{Agent, AgentTurn};
pub use config::EngineConfig;
pub use error::EngineError;
pub use finalizer::{Outcome, OutcomeKind};
pub use llm::{LlmClient, LlmResponse, Message, OpenAiClient, TokenUsage};
pub use router::{Network, RoutingDecision};
pub use sandbox::{SandboxBackend, SandboxClient};
pub use state::WorkflowState;
pub use step::{StepExecutor, StepLog};
pub use store::{MessageRecord, MessageStore};
pub use workflow::{CodeWorkflow, WorkflowRequest};
