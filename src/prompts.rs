// Prompt Registry
//
// Every LLM-facing prompt is externalized here as a compile-time
// `include_str!` so the full agentic design is visible in one place.
//
// Directory layout:
//   prompts/
//   ├── code_agent_system.md   — Coding agent system prompt
//   ├── fragment_title.md      — Fragment title generator prompt
//   └── response_generator.md  — User-facing response generator prompt

/// System prompt for the sandboxed coding agent
pub const CODE_AGENT_SYSTEM: &str = include_str!("../prompts/code_agent_system.md");

/// System prompt for the fragment-title generator
pub const FRAGMENT_TITLE: &str = include_str!("../prompts/fragment_title.md");

/// System prompt for the user-facing response generator
pub const RESPONSE_GENERATOR: &str = include_str!("../prompts/response_generator.md");
