//! Network router
//!
//! The bounded iteration controller. Before every iteration it inspects the
//! shared workflow state: a non-empty summary means the coding agent has
//! signaled completion, so the network halts; otherwise the agent runs
//! again. A hard iteration ceiling forces a halt even if the termination
//! marker never appears — the liveness guard against a model that loops
//! forever.

use anyhow::Result;

use crate::agent::Agent;
use crate::llm::Message;
use crate::state::WorkflowState;
use crate::tools::ToolContext;

/// Hard ceiling on agent iterations per run
pub const DEFAULT_MAX_ITERATIONS: usize = 15;

/// One routing decision, derived purely from workflow state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Run the named agent next
    Run(String),
    /// Stop the loop
    Halt,
}

/// Result of a completed network run
#[derive(Debug, Clone)]
pub struct NetworkResult {
    /// Iterations actually executed
    pub iterations: usize,
    /// Full conversation, including tool results
    pub conversation: Vec<Message>,
}

/// Agent network with a state-driven router
///
/// The routing rule is agent-agnostic — inspect state, return the next agent
/// or none — though this engine configures a single coding agent.
pub struct Network {
    agents: Vec<Agent>,
    max_iterations: usize,
}

impl Network {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self {
            agents,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Next-agent-or-halt, evaluated before every iteration
    pub fn route(&self, state: &WorkflowState) -> RoutingDecision {
        if state.has_summary() {
            return RoutingDecision::Halt;
        }
        match self.agents.first() {
            Some(agent) => RoutingDecision::Run(agent.name().to_string()),
            None => RoutingDecision::Halt,
        }
    }

    /// Run the loop until the router halts or the ceiling is reached.
    ///
    /// `input` becomes the newest user message on top of the seeded
    /// conversation. Whatever the shared state holds at halt time is the
    /// terminal output, success or not.
    pub async fn run(
        &self,
        input: &str,
        seeded_conversation: Vec<Message>,
        ctx: &ToolContext,
    ) -> Result<NetworkResult> {
        let mut conversation = seeded_conversation;
        conversation.push(Message::user(input));

        let mut iterations = 0;
        loop {
            if iterations >= self.max_iterations {
                tracing::warn!(
                    max_iterations = self.max_iterations,
                    "Iteration ceiling reached, halting without summary"
                );
                break;
            }

            let snapshot = ctx.state.lock().unwrap().clone();
            match self.route(&snapshot) {
                RoutingDecision::Halt => break,
                RoutingDecision::Run(name) => {
                    let agent = self
                        .agents
                        .iter()
                        .find(|a| a.name() == name)
                        .expect("router returned unknown agent");
                    let turn = agent.run_turn(&mut conversation, ctx, iterations).await?;
                    tracing::debug!(
                        iteration = iterations,
                        tool_calls = turn.tool_call_count,
                        "Network iteration finished"
                    );
                    iterations += 1;
                }
            }
        }

        Ok(NetworkResult {
            iterations,
            conversation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::task_summary_hook;
    use crate::llm::{LlmClient, LlmResponse, ToolDefinition, TokenUsage};
    use crate::sandbox::{MockSandbox, SandboxBackend, SandboxClient};
    use crate::step::{MemoryStepLog, StepExecutor};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Emits `busy_turns` plain responses, then one with the marker
    struct EventuallyDone {
        busy_turns: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for EventuallyDone {
        async fn complete(
            &self,
            _messages: &[Message],
            _system: Option<&str>,
            _tools: &[ToolDefinition],
        ) -> Result<LlmResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let text = if n < self.busy_turns {
                "still working".to_string()
            } else {
                "<task_summary>All done</task_summary>".to_string()
            };
            Ok(LlmResponse {
                message: Message::assistant(&text),
                usage: TokenUsage::default(),
                stop_reason: Some("stop".to_string()),
            })
        }
    }

    /// Never emits the marker
    struct NeverDone {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl LlmClient for NeverDone {
        async fn complete(
            &self,
            _messages: &[Message],
            _system: Option<&str>,
            _tools: &[ToolDefinition],
        ) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(LlmResponse {
                message: Message::assistant("still working"),
                usage: TokenUsage::default(),
                stop_reason: Some("stop".to_string()),
            })
        }
    }

    async fn test_context() -> ToolContext {
        let backend = Arc::new(MockSandbox::new());
        let id = backend.create("next-app").await.unwrap();
        ToolContext::new(
            SandboxClient::new(backend, id),
            WorkflowState::new().shared(),
            StepExecutor::new("run-1", Arc::new(MemoryStepLog::new())),
        )
    }

    fn agent_with(client: Arc<dyn LlmClient>) -> Agent {
        Agent::new("code-agent", "You write code", client).with_response_hook(task_summary_hook())
    }

    #[test]
    fn test_route_halts_on_summary() {
        let network = Network::new(vec![agent_with(Arc::new(NeverDone {
            calls: Arc::new(AtomicU32::new(0)),
        }))]);
        let mut state = WorkflowState::new();
        assert_eq!(
            network.route(&state),
            RoutingDecision::Run("code-agent".to_string())
        );
        state.summary = "done".to_string();
        assert_eq!(network.route(&state), RoutingDecision::Halt);
    }

    #[test]
    fn test_route_halts_without_agents() {
        let network = Network::new(vec![]);
        assert_eq!(network.route(&WorkflowState::new()), RoutingDecision::Halt);
    }

    #[tokio::test]
    async fn test_run_halts_when_marker_appears() {
        let client = Arc::new(EventuallyDone {
            busy_turns: 2,
            calls: AtomicU32::new(0),
        });
        let network = Network::new(vec![agent_with(client)]);
        let ctx = test_context().await;

        let result = network.run("build it", Vec::new(), &ctx).await.unwrap();

        // Two busy turns plus the marker turn
        assert_eq!(result.iterations, 3);
        assert_eq!(ctx.state.lock().unwrap().summary, "All done");
    }

    #[tokio::test]
    async fn test_run_halts_at_ceiling_exactly() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = Arc::new(NeverDone {
            calls: calls.clone(),
        });
        let network = Network::new(vec![agent_with(client)]);
        let ctx = test_context().await;

        let result = network.run("build it", Vec::new(), &ctx).await.unwrap();

        assert_eq!(result.iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(calls.load(Ordering::SeqCst) as usize, DEFAULT_MAX_ITERATIONS);
        assert!(!ctx.state.lock().unwrap().has_summary());
    }

    #[tokio::test]
    async fn test_run_respects_custom_ceiling() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = Arc::new(NeverDone {
            calls: calls.clone(),
        });
        let network = Network::new(vec![agent_with(client)]).with_max_iterations(4);
        let ctx = test_context().await;

        let result = network.run("build it", Vec::new(), &ctx).await.unwrap();
        assert_eq!(result.iterations, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_seeded_conversation_precedes_input() {
        let client = Arc::new(EventuallyDone {
            busy_turns: 0,
            calls: AtomicU32::new(0),
        });
        let network = Network::new(vec![agent_with(client)]);
        let ctx = test_context().await;

        let seeded = vec![
            Message::user("older request"),
            Message::assistant("older answer"),
        ];
        let result = network.run("new request", seeded, &ctx).await.unwrap();

        assert_eq!(result.conversation[0].text(), "older request");
        assert_eq!(result.conversation[1].text(), "older answer");
        assert_eq!(result.conversation[2].text(), "new request");
    }
}
