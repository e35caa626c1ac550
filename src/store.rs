//! Message persistence layer
//!
//! The engine touches durable project history in exactly two places: seeding
//! a new run's conversation from the most recent prior messages, and the
//! single completion write after the loop halts. Both go through the
//! pluggable [`MessageStore`] trait.
//!
//! `FileMessageStore` keeps one JSON document per project with atomic
//! temp-file-then-rename writes; `MemoryMessageStore` backs tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
}

/// How the message should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Result,
    Error,
}

/// Generated app fragment attached to a successful result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: BTreeMap<String, String>,
}

/// One persisted project message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub project_id: String,
    pub role: MessageRole,
    pub kind: MessageKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    fn new(
        project_id: &str,
        role: MessageRole,
        kind: MessageKind,
        content: &str,
        fragment: Option<Fragment>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            role,
            kind,
            content: content.to_string(),
            fragment,
            created_at: Utc::now(),
        }
    }

    pub fn user(project_id: &str, content: &str) -> Self {
        Self::new(project_id, MessageRole::User, MessageKind::Result, content, None)
    }

    pub fn assistant_result(project_id: &str, content: &str, fragment: Fragment) -> Self {
        Self::new(
            project_id,
            MessageRole::Assistant,
            MessageKind::Result,
            content,
            Some(fragment),
        )
    }

    pub fn assistant_error(project_id: &str, content: &str) -> Self {
        Self::new(project_id, MessageRole::Assistant, MessageKind::Error, content, None)
    }
}

/// Project message storage
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Most recent `limit` messages for a project, newest first
    async fn recent_for_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>>;

    /// Append one message. Must be a single atomic write.
    async fn append(&self, record: &MessageRecord) -> Result<()>;
}

// ============================================================================
// File-based Message Store
// ============================================================================

/// File-backed message store, one JSON document per project
pub struct FileMessageStore {
    dir: PathBuf,
}

impl FileMessageStore {
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create message directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn project_path(&self, project_id: &str) -> PathBuf {
        let safe_id = project_id.replace(['/', '\\'], "_").replace("..", "_");
        self.dir.join(format!("{}.json", safe_id))
    }

    async fn load(&self, project_id: &str) -> Result<Vec<MessageRecord>> {
        let path = self.project_path(project_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read messages: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse messages: {}", path.display()))
    }
}

#[async_trait::async_trait]
impl MessageStore for FileMessageStore {
    async fn recent_for_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let messages = self.load(project_id).await?;
        Ok(messages.into_iter().rev().take(limit).collect())
    }

    async fn append(&self, record: &MessageRecord) -> Result<()> {
        let mut messages = self.load(&record.project_id).await?;
        messages.push(record.clone());

        let path = self.project_path(&record.project_id);
        let json = serde_json::to_string_pretty(&messages)
            .with_context(|| format!("Failed to serialize messages for {}", record.project_id))?;

        // Write atomically: write to temp file, then rename
        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(json.as_bytes())
            .await
            .with_context(|| format!("Failed to write messages for {}", record.project_id))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync messages for {}", record.project_id))?;
        fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("Failed to rename messages for {}", record.project_id))?;

        tracing::debug!(
            project = record.project_id.as_str(),
            message = record.id.as_str(),
            "Appended message"
        );
        Ok(())
    }
}

// ============================================================================
// In-Memory Message Store
// ============================================================================

/// In-memory message store for tests
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: tokio::sync::RwLock<HashMap<String, Vec<MessageRecord>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages for a project in chronological order
    pub async fn all_for_project(&self, project_id: &str) -> Vec<MessageRecord> {
        let messages = self.messages.read().await;
        messages.get(project_id).cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl MessageStore for MemoryMessageStore {
    async fn recent_for_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let messages = self.messages.read().await;
        Ok(messages
            .get(project_id)
            .map(|msgs| msgs.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn append(&self, record: &MessageRecord) -> Result<()> {
        let mut messages = self.messages.write().await;
        messages
            .entry(record.project_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }
}
