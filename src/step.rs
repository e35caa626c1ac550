//! Memoized step execution
//!
//! The durability core of the engine. Every side-effecting action in a
//! workflow runs through [`StepExecutor::run`] under a name that is unique
//! within the workflow instance. The first execution records its result in a
//! [`StepLog`]; any later execution under the same name — including a replay
//! of the whole workflow function after a crash or host-driven resume —
//! returns the recorded result without re-running the side effect.
//!
//! Failures are never memoized. A failing step is retried under the
//! executor's [`RetryPolicy`]; exhaustion surfaces as an error the workflow
//! escalates to fatal.
//!
//! ## Backends
//!
//! `FileStepLog` persists one JSON document per workflow instance with
//! atomic temp-file-then-rename writes. `MemoryStepLog` backs tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use crate::retry::{with_retry, Attempt, RetryPolicy};

/// One memoized step result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    /// Serialized step result, opaque to the log
    pub value: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Persistence for step records, keyed by (workflow instance id, step name)
#[async_trait::async_trait]
pub trait StepLog: Send + Sync {
    /// Fetch a recorded step, if any
    async fn get(&self, instance_id: &str, name: &str) -> Result<Option<StepRecord>>;

    /// Record a step result. Write-once: an existing record for the same
    /// name is left untouched.
    async fn record(&self, instance_id: &str, record: &StepRecord) -> Result<()>;
}

/// Memoizing executor bound to one workflow instance
#[derive(Clone)]
pub struct StepExecutor {
    instance_id: String,
    log: Arc<dyn StepLog>,
    retry: RetryPolicy,
}

impl StepExecutor {
    pub fn new(instance_id: impl Into<String>, log: Arc<dyn StepLog>) -> Self {
        Self {
            instance_id: instance_id.into(),
            log,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Run `work` under `name`, memoizing its result.
    ///
    /// The closure must be re-invokable: it is called once per retry attempt
    /// and not at all when a recorded result exists. Results must be
    /// serializable so a resumed process can replay them.
    pub async fn run<T, F, Fut>(&self, name: &str, work: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(record) = self.log.get(&self.instance_id, name).await? {
            tracing::debug!(
                step = name,
                instance = self.instance_id.as_str(),
                "Replaying recorded step result"
            );
            let value: T = serde_json::from_value(record.value)
                .with_context(|| format!("Failed to decode recorded step '{}'", name))?;
            return Ok(value);
        }

        let span = tracing::info_span!(
            "step.run",
            "step.name" = name,
            "step.instance" = self.instance_id.as_str(),
        );
        let value = with_retry(&self.retry, |_attempt| async {
            match work().await {
                Ok(value) => Attempt::Done(value),
                Err(e) => Attempt::Again {
                    reason: format!("{:#}", e),
                    retry_after: None,
                },
            }
        })
        .instrument(span)
        .await
        .with_context(|| format!("Step '{}' failed", name))?;

        let record = StepRecord {
            name: name.to_string(),
            value: serde_json::to_value(&value)
                .with_context(|| format!("Failed to encode result of step '{}'", name))?,
            recorded_at: Utc::now(),
        };
        self.log.record(&self.instance_id, &record).await?;

        tracing::debug!(step = name, "Step completed and recorded");
        Ok(value)
    }

    /// Number of attempts the retry policy grants each step
    pub fn max_attempts(&self) -> u32 {
        self.retry.max_attempts()
    }
}

// ============================================================================
// File-based Step Log
// ============================================================================

/// File-backed step log
///
/// Stores each workflow instance's records as one JSON file:
/// ```text
/// steps/
///   run-1.json
///   run-2.json
/// ```
pub struct FileStepLog {
    dir: PathBuf,
}

impl FileStepLog {
    /// Create a new file step log, creating the directory if needed
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create step log directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn instance_path(&self, instance_id: &str) -> PathBuf {
        // Sanitize ID to prevent path traversal
        let safe_id = instance_id.replace(['/', '\\'], "_").replace("..", "_");
        self.dir.join(format!("{}.json", safe_id))
    }

    async fn load_records(&self, instance_id: &str) -> Result<HashMap<String, StepRecord>> {
        let path = self.instance_path(instance_id);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let json = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read step log: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse step log: {}", path.display()))
    }

    async fn save_records(
        &self,
        instance_id: &str,
        records: &HashMap<String, StepRecord>,
    ) -> Result<()> {
        let path = self.instance_path(instance_id);
        let json = serde_json::to_string_pretty(records)
            .with_context(|| format!("Failed to serialize step log for {}", instance_id))?;

        // Write atomically: write to temp file, then rename
        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(json.as_bytes())
            .await
            .with_context(|| format!("Failed to write step log for {}", instance_id))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync step log for {}", instance_id))?;
        fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("Failed to rename step log for {}", instance_id))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StepLog for FileStepLog {
    async fn get(&self, instance_id: &str, name: &str) -> Result<Option<StepRecord>> {
        let records = self.load_records(instance_id).await?;
        Ok(records.get(name).cloned())
    }

    async fn record(&self, instance_id: &str, record: &StepRecord) -> Result<()> {
        let mut records = self.load_records(instance_id).await?;
        if records.contains_key(&record.name) {
            tracing::warn!(
                step = record.name.as_str(),
                instance = instance_id,
                "Ignoring duplicate step record"
            );
            return Ok(());
        }
        records.insert(record.name.clone(), record.clone());
        self.save_records(instance_id, &records).await
    }
}

// ============================================================================
// In-Memory Step Log
// ============================================================================

/// In-memory step log for tests and single-process runs
#[derive(Default)]
pub struct MemoryStepLog {
    records: tokio::sync::RwLock<HashMap<String, HashMap<String, StepRecord>>>,
}

impl MemoryStepLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StepLog for MemoryStepLog {
    async fn get(&self, instance_id: &str, name: &str) -> Result<Option<StepRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(instance_id)
            .and_then(|instance| instance.get(name))
            .cloned())
    }

    async fn record(&self, instance_id: &str, record: &StepRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let instance = records.entry(instance_id.to_string()).or_default();
        if instance.contains_key(&record.name) {
            tracing::warn!(
                step = record.name.as_str(),
                instance = instance_id,
                "Ignoring duplicate step record"
            );
            return Ok(());
        }
        instance.insert(record.name.clone(), record.clone());
        Ok(())
    }
}
