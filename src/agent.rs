//! Agent execution
//!
//! An [`Agent`] binds a system prompt, an LLM client, a tool set, and an
//! optional response hook. One invocation produces exactly one assistant
//! response; any tool calls in that response are dispatched through the tool
//! registry before the turn completes, and their results are appended to the
//! conversation so the agent sees them on its next turn.
//!
//! The completion itself runs inside a memoized step named after the
//! invocation, so a resumed run replays the recorded model output — which is
//! also what makes the per-call tool step names deterministic across
//! replays.

use std::sync::Arc;

use anyhow::Result;
use tracing::Instrument;

use crate::llm::{LlmClient, LlmResponse, Message, TokenUsage};
use crate::state::SharedState;
use crate::tools::{ToolContext, ToolRegistry};

/// Termination marker delimiters the coding agent emits when its task is done
pub const TASK_SUMMARY_OPEN: &str = "<task_summary>";
pub const TASK_SUMMARY_CLOSE: &str = "</task_summary>";

/// Extract the task summary wrapped in termination markers.
///
/// Only a well-formed marker counts: an opening tag without a closing tag,
/// or an empty summary between the tags, is ignored so the loop keeps
/// going instead of halting on a partial emission.
pub fn extract_task_summary(text: &str) -> Option<String> {
    let start = text.find(TASK_SUMMARY_OPEN)? + TASK_SUMMARY_OPEN.len();
    let end = start + text[start..].find(TASK_SUMMARY_CLOSE)?;
    let summary = text[start..end].trim();
    if summary.is_empty() {
        None
    } else {
        Some(summary.to_string())
    }
}

/// Hook inspecting the latest assistant text after each response
pub type ResponseHook = Arc<dyn Fn(&str, &SharedState) + Send + Sync>;

/// Hook that writes a well-formed task summary into workflow state.
///
/// This is the only writer of `WorkflowState.summary`.
pub fn task_summary_hook() -> ResponseHook {
    Arc::new(|text, state| {
        if let Some(summary) = extract_task_summary(text) {
            tracing::info!("Task summary detected, marking run complete");
            state.lock().unwrap().summary = summary;
        }
    })
}

/// Result of one agent invocation
#[derive(Debug, Clone)]
pub struct AgentTurn {
    /// Text of the assistant response
    pub text: String,
    /// Number of tool calls dispatched this turn
    pub tool_call_count: usize,
    /// Token usage for the completion
    pub usage: TokenUsage,
}

/// A bound (prompt, model, tools, hook) unit producing one conversational
/// turn per invocation
pub struct Agent {
    name: String,
    system_prompt: String,
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    response_hook: Option<ResponseHook>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            llm,
            tools: ToolRegistry::new(),
            response_hook: None,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_hook(mut self, hook: ResponseHook) -> Self {
        self.response_hook = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one turn: one completion, then dispatch of any tool calls.
    ///
    /// `iteration` namespaces the completion step so each router iteration
    /// memoizes independently. The conversation is extended in place with
    /// the assistant message and any tool results.
    pub async fn run_turn(
        &self,
        conversation: &mut Vec<Message>,
        ctx: &ToolContext,
        iteration: usize,
    ) -> Result<AgentTurn> {
        let span = tracing::info_span!(
            "agent.turn",
            "agent.name" = self.name.as_str(),
            "agent.iteration" = iteration,
        );
        self.turn_inner(conversation, ctx, iteration)
            .instrument(span)
            .await
    }

    async fn turn_inner(
        &self,
        conversation: &mut Vec<Message>,
        ctx: &ToolContext,
        iteration: usize,
    ) -> Result<AgentTurn> {
        let step_name = format!("completion:{}:{}", self.name, iteration);
        let tool_defs = self.tools.definitions();
        let messages = conversation.clone();
        let system = self.system_prompt.clone();
        let llm = self.llm.clone();

        let response: LlmResponse = ctx
            .steps
            .run(&step_name, || {
                let llm = llm.clone();
                let messages = messages.clone();
                let system = system.clone();
                let tool_defs = tool_defs.clone();
                async move { llm.complete(&messages, Some(&system), &tool_defs).await }
            })
            .await?;

        conversation.push(response.message.clone());

        let tool_calls = response.tool_calls();
        let tool_call_count = tool_calls.len();
        for call in tool_calls {
            let call_ctx = ctx.for_call(&call.id);
            let result = self.tools.execute(&call.name, &call.args, &call_ctx).await;
            tracing::info!(
                tool = call.name.as_str(),
                exit_code = result.exit_code,
                "Tool call finished"
            );
            conversation.push(Message::tool_result(
                &call.id,
                &result.output,
                result.is_error(),
            ));
        }

        let text = response.text();
        if let Some(hook) = &self.response_hook {
            hook(&text, &ctx.state);
        }

        Ok(AgentTurn {
            text,
            tool_call_count,
            usage: response.usage,
        })
    }

    /// Single-shot invocation with no tools and no state access.
    ///
    /// Used by the post-loop generator agents; callers wrap this in a step.
    pub async fn run_single(&self, input: &str) -> Result<LlmResponse> {
        self.llm
            .complete(&[Message::user(input)], Some(&self.system_prompt), &[])
            .await
    }
}
