//! File tools — create/update and read files in the sandbox
//!
//! `createOrUpdateFiles` writes a batch of files and merges them into the
//! run's shared state; `readFiles` returns a structured (path, content)
//! list. Both skip malformed entries instead of aborting the batch — a
//! model that produced one bad entry still gets the rest of its work done.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{Tool, ToolContext, ToolOutput};

/// Creates or updates files in the sandbox and records them in workflow
/// state.
///
/// The batch executes inside one step per tool call; the step's recorded
/// value is the merged file map, so a resumed run restores state without
/// re-writing the sandbox. The merge base is the state's current file
/// snapshot — sequential edits within a run accumulate rather than
/// overwrite wholesale.
pub struct CreateOrUpdateFilesTool;

#[derive(Debug, Deserialize)]
struct CreateOrUpdateArgs {
    files: Vec<serde_json::Value>,
}

#[async_trait]
impl Tool for CreateOrUpdateFilesTool {
    fn name(&self) -> &str {
        "createOrUpdateFiles"
    }

    fn description(&self) -> &str {
        "Create or update files in the environment"
    }

    fn parameters(&self) -> serde_json::Value {
        // Element shape is checked in the handler so one malformed entry
        // skips instead of failing the whole batch at the boundary.
        serde_json::json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": {"type": "object"},
                    "description": "Files to write, each {path, content}"
                }
            },
            "required": ["files"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: CreateOrUpdateArgs = serde_json::from_value(args.clone())
            .context("Failed to parse createOrUpdateFiles arguments")?;

        let mut valid = BTreeMap::new();
        for entry in &args.files {
            let path = entry.get("path").and_then(|v| v.as_str());
            let content = entry.get("content").and_then(|v| v.as_str());
            match (path, content) {
                (Some(path), Some(content)) => {
                    valid.insert(path.to_string(), content.to_string());
                }
                _ => {
                    tracing::warn!(entry = %entry, "Skipping malformed file entry");
                }
            }
        }

        let base = ctx.state.lock().unwrap().files.clone();
        let sandbox = ctx.sandbox.clone();
        let to_write = valid.clone();
        let merged: BTreeMap<String, String> = ctx
            .steps
            .run(&ctx.step_name("createOrUpdateFiles"), || {
                let sandbox = sandbox.clone();
                let to_write = to_write.clone();
                let mut merged = base.clone();
                async move {
                    for (path, content) in &to_write {
                        sandbox.write_file(path, content).await?;
                        merged.insert(path.clone(), content.clone());
                    }
                    Ok(merged)
                }
            })
            .await?;

        ctx.state.lock().unwrap().merge_files(merged);

        let written: Vec<&String> = valid.keys().collect();
        Ok(ToolOutput::success(format!(
            "Updated {} file(s): {}",
            written.len(),
            serde_json::to_string(&written)?
        )))
    }
}

/// Reads files from the sandbox filesystem.
///
/// Returns a JSON list of `{path, content}` entries. Non-string paths and
/// unreadable files are skipped with a log line, not fatal.
pub struct ReadFilesTool;

#[derive(Debug, Deserialize)]
struct ReadFilesArgs {
    files: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileContent {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for ReadFilesTool {
    fn name(&self) -> &str {
        "readFiles"
    }

    fn description(&self) -> &str {
        "Read files in the environment"
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "description": "Paths of the files to read"
                }
            },
            "required": ["files"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let args: ReadFilesArgs =
            serde_json::from_value(args.clone()).context("Failed to parse readFiles arguments")?;

        let mut paths = Vec::new();
        for entry in &args.files {
            match entry.as_str() {
                Some(path) => paths.push(path.to_string()),
                None => {
                    tracing::warn!(entry = %entry, "Skipping non-string file path");
                }
            }
        }

        let sandbox = ctx.sandbox.clone();
        let contents: Vec<FileContent> = ctx
            .steps
            .run(&ctx.step_name("readFiles"), || {
                let sandbox = sandbox.clone();
                let paths = paths.clone();
                async move {
                    let mut contents = Vec::new();
                    for path in &paths {
                        match sandbox.read_file(path).await {
                            Ok(content) => contents.push(FileContent {
                                path: path.clone(),
                                content,
                            }),
                            Err(e) => {
                                tracing::warn!(path = path.as_str(), "Skipping unreadable file: {:#}", e);
                            }
                        }
                    }
                    Ok(contents)
                }
            })
            .await?;

        Ok(ToolOutput::success(serde_json::to_string(&contents)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{MockSandbox, SandboxBackend, SandboxClient};
    use crate::state::WorkflowState;
    use crate::step::{MemoryStepLog, StepExecutor};
    use std::sync::Arc;

    async fn context_with(backend: Arc<MockSandbox>) -> (ToolContext, String) {
        let id = backend.create("next-app").await.unwrap();
        let ctx = ToolContext::new(
            SandboxClient::new(backend, id.clone()),
            WorkflowState::new().shared(),
            StepExecutor::new("run-1", Arc::new(MemoryStepLog::new())),
        );
        (ctx, id)
    }

    #[tokio::test]
    async fn test_create_writes_sandbox_and_state() {
        let backend = Arc::new(MockSandbox::new());
        let (ctx, id) = context_with(backend.clone()).await;
        let ctx = ctx.for_call("call_1");

        let args = serde_json::json!({
            "files": [
                {"path": "app/page.tsx", "content": "export default Page"},
                {"path": "app/layout.tsx", "content": "export default Layout"}
            ]
        });
        let output = CreateOrUpdateFilesTool.execute(&args, &ctx).await.unwrap();
        assert!(output.success);
        assert!(output.content.contains("2 file(s)"));

        let sandbox_files = backend.files(&id);
        assert_eq!(sandbox_files.len(), 2);
        assert_eq!(sandbox_files["app/page.tsx"], "export default Page");

        let state = ctx.state.lock().unwrap();
        assert_eq!(state.files.len(), 2);
    }

    #[tokio::test]
    async fn test_create_skips_malformed_entries() {
        let backend = Arc::new(MockSandbox::new());
        let (ctx, id) = context_with(backend.clone()).await;
        let ctx = ctx.for_call("call_1");

        let args = serde_json::json!({
            "files": [
                {"path": "good.txt", "content": "ok"},
                {"path": 42, "content": "bad path"},
                {"path": "no-content.txt"}
            ]
        });
        let output = CreateOrUpdateFilesTool.execute(&args, &ctx).await.unwrap();
        assert!(output.success);
        assert!(output.content.contains("1 file(s)"));

        let sandbox_files = backend.files(&id);
        assert_eq!(sandbox_files.len(), 1);
        assert!(sandbox_files.contains_key("good.txt"));
    }

    #[tokio::test]
    async fn test_sequential_calls_accumulate() {
        let backend = Arc::new(MockSandbox::new());
        let (ctx, _) = context_with(backend).await;

        let first = serde_json::json!({"files": [{"path": "a.txt", "content": "a"}]});
        let second = serde_json::json!({"files": [{"path": "b.txt", "content": "b"}]});
        CreateOrUpdateFilesTool
            .execute(&first, &ctx.for_call("call_1"))
            .await
            .unwrap();
        CreateOrUpdateFilesTool
            .execute(&second, &ctx.for_call("call_2"))
            .await
            .unwrap();

        let state = ctx.state.lock().unwrap();
        assert_eq!(state.files.len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_call_later_wins() {
        let backend = Arc::new(MockSandbox::new());
        let (ctx, _) = context_with(backend).await;

        let first = serde_json::json!({"files": [{"path": "a.txt", "content": "v1"}]});
        let second = serde_json::json!({"files": [{"path": "a.txt", "content": "v2"}]});
        CreateOrUpdateFilesTool
            .execute(&first, &ctx.for_call("call_1"))
            .await
            .unwrap();
        CreateOrUpdateFilesTool
            .execute(&second, &ctx.for_call("call_2"))
            .await
            .unwrap();

        let state = ctx.state.lock().unwrap();
        assert_eq!(state.files["a.txt"], "v2");
    }

    #[tokio::test]
    async fn test_replay_restores_state_without_rewriting() {
        let backend = Arc::new(MockSandbox::new());
        let log: Arc<dyn crate::step::StepLog> = Arc::new(MemoryStepLog::new());
        let id = backend.create("next-app").await.unwrap();

        let args = serde_json::json!({"files": [{"path": "a.txt", "content": "a"}]});
        {
            let ctx = ToolContext::new(
                SandboxClient::new(backend.clone(), id.clone()),
                WorkflowState::new().shared(),
                StepExecutor::new("run-1", log.clone()),
            )
            .for_call("call_1");
            CreateOrUpdateFilesTool.execute(&args, &ctx).await.unwrap();
        }

        // Fresh state, same step log — the resumed run replays the merge
        let resumed_state = WorkflowState::new().shared();
        let ctx = ToolContext::new(
            SandboxClient::new(backend.clone(), id.clone()),
            resumed_state.clone(),
            StepExecutor::new("run-1", log),
        )
        .for_call("call_1");
        CreateOrUpdateFilesTool.execute(&args, &ctx).await.unwrap();

        assert_eq!(resumed_state.lock().unwrap().files["a.txt"], "a");
    }

    #[tokio::test]
    async fn test_read_files_returns_structured_list() {
        let backend = Arc::new(MockSandbox::new());
        let (ctx, _) = context_with(backend).await;
        let ctx = ctx.for_call("call_1");

        ctx.sandbox.write_file("a.txt", "alpha").await.unwrap();
        ctx.sandbox.write_file("b.txt", "beta").await.unwrap();

        let args = serde_json::json!({"files": ["a.txt", "b.txt"]});
        let output = ReadFilesTool.execute(&args, &ctx).await.unwrap();
        assert!(output.success);

        let parsed: Vec<serde_json::Value> = serde_json::from_str(&output.content).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["path"], "a.txt");
        assert_eq!(parsed[0]["content"], "alpha");
    }

    #[tokio::test]
    async fn test_read_files_skips_invalid_and_missing() {
        let backend = Arc::new(MockSandbox::new());
        let (ctx, _) = context_with(backend).await;
        let ctx = ctx.for_call("call_1");

        ctx.sandbox.write_file("a.txt", "alpha").await.unwrap();

        let args = serde_json::json!({"files": ["a.txt", 17, "missing.txt"]});
        let output = ReadFilesTool.execute(&args, &ctx).await.unwrap();
        assert!(output.success);

        let parsed: Vec<serde_json::Value> = serde_json::from_str(&output.content).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["path"], "a.txt");
    }
}
