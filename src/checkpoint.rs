//! Checkpoint/resume sink and source (§4.H, §6).
//!
//! The engine only produces and consumes the JSON-safe `CheckpointRecord`;
//! persistence is the caller's responsibility, exposed as a narrow trait
//! pair. A reference file-backed implementation is provided, tested with
//! `tempfile`.

use crate::error::Result;
use crate::types::CheckpointRecord;
use async_trait::async_trait;
use std::path::PathBuf;

/// Callback invoked after every successful fetch (or at
/// `checkpoint_interval`) with the current traversal snapshot.
pub type OnStateChange = std::sync::Arc<dyn Fn(CheckpointRecord) + Send + Sync>;

/// Destination for checkpoint records. Implementations decide storage
/// (file, database, object store); the engine only calls `save`.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn save(&self, record: &CheckpointRecord) -> Result<()>;
}

/// Source for resuming a prior checkpoint.
#[async_trait]
pub trait CheckpointSource: Send + Sync {
    async fn load(&self) -> Result<Option<CheckpointRecord>>;
}

/// Writes/reads a single JSON file. Convenient for CLIs and tests; not a
/// requirement of the trait pair.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CheckpointSink for FileCheckpointStore {
    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointSource for FileCheckpointStore {
    async fn load(&self) -> Result<Option<CheckpointRecord>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
