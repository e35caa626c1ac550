//! Sandbox client
//!
//! Typed façade over the remote execution environment. The engine never
//! talks to a sandbox provider directly; it goes through [`SandboxBackend`],
//! which any remote-execution service can implement. Each call addresses the
//! sandbox by its id — resolving the id to a live connection on every call is
//! the backend's concern, since connections are not durable state.
//!
//! Failure semantics follow the workflow's taxonomy: provisioning failure is
//! fatal to the run, while command failures are normal, recoverable outcomes
//! converted into diagnostic text that flows back into the conversation so
//! the agent can react.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Captured output of one shell command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Command execution failure, carrying whatever output was buffered before
/// the failure
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct CommandError {
    pub reason: String,
    pub stdout: String,
    pub stderr: String,
}

/// Remote execution environment contract
///
/// One sandbox exposes a shell and a virtual filesystem. Backends stream
/// command output into accumulation buffers and return them whole.
#[async_trait::async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Provision a new sandbox from a template, returning its id
    async fn create(&self, template: &str) -> Result<String>;

    /// Execute a shell command in the sandbox
    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
    ) -> std::result::Result<CommandOutput, CommandError>;

    /// Write a file into the sandbox filesystem
    async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> Result<()>;

    /// Read a file from the sandbox filesystem
    async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<String>;

    /// Externally reachable URL for a service listening on `port`
    async fn resolve_url(&self, sandbox_id: &str, port: u16) -> Result<String>;
}

/// Client bound to one provisioned sandbox
///
/// Owned exclusively by one workflow run; cloning shares the same backend
/// connection and sandbox id.
#[derive(Clone)]
pub struct SandboxClient {
    backend: Arc<dyn SandboxBackend>,
    sandbox_id: String,
}

impl SandboxClient {
    pub fn new(backend: Arc<dyn SandboxBackend>, sandbox_id: impl Into<String>) -> Self {
        Self {
            backend,
            sandbox_id: sandbox_id.into(),
        }
    }

    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Run a command, returning captured stdout on success and a diagnostic
    /// string on failure. Command failure never raises — the text is relayed
    /// into the conversation for the agent to correct.
    pub async fn run_command(&self, command: &str) -> String {
        match self.backend.run_command(&self.sandbox_id, command).await {
            Ok(output) => output.stdout,
            Err(e) => {
                tracing::warn!(
                    sandbox = self.sandbox_id.as_str(),
                    command = command,
                    "Command failed: {}",
                    e.reason
                );
                format!(
                    "Command failed: {}\nstdout: {}\nstderr: {}",
                    e.reason, e.stdout, e.stderr
                )
            }
        }
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.backend
            .write_file(&self.sandbox_id, path, content)
            .await
    }

    pub async fn read_file(&self, path: &str) -> Result<String> {
        self.backend.read_file(&self.sandbox_id, path).await
    }

    pub async fn resolve_url(&self, port: u16) -> Result<String> {
        self.backend.resolve_url(&self.sandbox_id, port).await
    }
}

// ============================================================================
// Mock backend
// ============================================================================

/// In-memory sandbox backend for tests and local development
///
/// Files live in a per-sandbox map; commands succeed with empty output unless
/// scripted otherwise. Provisioning and command counters let tests assert
/// that memoized steps did not re-run side effects.
#[derive(Default)]
pub struct MockSandbox {
    state: std::sync::Mutex<MockSandboxState>,
}

#[derive(Default)]
struct MockSandboxState {
    created: u32,
    files: std::collections::HashMap<String, std::collections::BTreeMap<String, String>>,
    command_log: Vec<String>,
    /// Commands containing any of these substrings fail with a scripted error
    failing_commands: Vec<String>,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script failure for any command containing `pattern`
    pub fn fail_commands_containing(&self, pattern: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_commands
            .push(pattern.to_string());
    }

    /// Number of sandboxes provisioned so far
    pub fn created_count(&self) -> u32 {
        self.state.lock().unwrap().created
    }

    /// Commands executed, in order
    pub fn command_log(&self) -> Vec<String> {
        self.state.lock().unwrap().command_log.clone()
    }

    /// Snapshot of a sandbox's filesystem
    pub fn files(&self, sandbox_id: &str) -> std::collections::BTreeMap<String, String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(sandbox_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl SandboxBackend for MockSandbox {
    async fn create(&self, template: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        let id = format!("sbx-{}-{}", template, state.created);
        state.files.entry(id.clone()).or_default();
        Ok(id)
    }

    async fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
    ) -> std::result::Result<CommandOutput, CommandError> {
        let mut state = self.state.lock().unwrap();
        state.command_log.push(command.to_string());
        if state
            .failing_commands
            .iter()
            .any(|pattern| command.contains(pattern))
        {
            return Err(CommandError {
                reason: format!("exit status 1: {}", command),
                stdout: String::new(),
                stderr: "command not found".to_string(),
            });
        }
        let _ = sandbox_id;
        Ok(CommandOutput {
            stdout: format!("$ {}\n", command),
            stderr: String::new(),
        })
    }

    async fn write_file(&self, sandbox_id: &str, path: &str, content: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .files
            .entry(sandbox_id.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn read_file(&self, sandbox_id: &str, path: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(sandbox_id)
            .and_then(|files| files.get(path))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No such file in sandbox {}: {}", sandbox_id, path))
    }

    async fn resolve_url(&self, sandbox_id: &str, port: u16) -> Result<String> {
        Ok(format!("https://{}-{}.mock.dev", port, sandbox_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let backend = MockSandbox::new();
        let a = backend.create("next-app").await.unwrap();
        let b = backend.create("next-app").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(backend.created_count(), 2);
    }

    #[tokio::test]
    async fn test_run_command_success_returns_stdout() {
        let backend = Arc::new(MockSandbox::new());
        let id = backend.create("next-app").await.unwrap();
        let client = SandboxClient::new(backend, id);

        let output = client.run_command("npm install").await;
        assert!(output.contains("npm install"));
    }

    #[tokio::test]
    async fn test_run_command_failure_yields_diagnostic() {
        let backend = Arc::new(MockSandbox::new());
        backend.fail_commands_containing("nonexistent");
        let id = backend.create("next-app").await.unwrap();
        let client = SandboxClient::new(backend, id);

        let output = client.run_command("nonexistent-binary --flag").await;
        assert!(output.starts_with("Command failed:"));
        assert!(output.contains("stdout:"));
        assert!(output.contains("stderr: command not found"));
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let backend = Arc::new(MockSandbox::new());
        let id = backend.create("next-app").await.unwrap();
        let client = SandboxClient::new(backend.clone(), id.clone());

        client.write_file("app/page.tsx", "export default ...").await.unwrap();
        let content = client.read_file("app/page.tsx").await.unwrap();
        assert_eq!(content, "export default ...");
        assert_eq!(backend.files(&id).len(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_file_errors() {
        let backend = Arc::new(MockSandbox::new());
        let id = backend.create("next-app").await.unwrap();
        let client = SandboxClient::new(backend, id);

        let result = client.read_file("missing.txt").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_resolve_url_includes_port() {
        let backend = Arc::new(MockSandbox::new());
        let id = backend.create("next-app").await.unwrap();
        let client = SandboxClient::new(backend, id);

        let url = client.resolve_url(3000).await.unwrap();
        assert!(url.starts_with("https://"));
        assert!(url.contains("3000"));
    }
}
