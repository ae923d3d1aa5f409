//! File-backed checkpoint store.
//!
//! The checkpoint is a single pretty-printed JSON document:
//!
//! ```text
//! {
//!   "records": [...],
//!   "next_index": 150,
//!   "failed_identifiers": [...],
//!   "processed_fingerprint": "9f2c...",
//!   "saved_at": "2025-01-01T00:00:00Z"
//! }
//! ```
//!
//! Writes go to a sibling temp file which is fsynced and then renamed over
//! the target, so a reader only ever sees a complete document.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::AppError;
use crate::models::{Record, RunState, WorkItem};
use crate::traits::CheckpointStore;

#[derive(Serialize)]
struct CheckpointOut<'a> {
    records: &'a [Record],
    next_index: usize,
    failed_identifiers: &'a [WorkItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_fingerprint: Option<&'a str>,
    saved_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct CheckpointIn {
    records: Vec<Record>,
    next_index: usize,
    failed_identifiers: Vec<WorkItem>,
    #[serde(default)]
    processed_fingerprint: Option<String>,
    saved_at: DateTime<Utc>,
}

/// Headline numbers of a checkpoint, for operator-facing status output.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointSummary {
    pub next_index: usize,
    pub records: usize,
    pub failed: usize,
    pub saved_at: DateTime<Utc>,
}

/// Checkpoint stored as one JSON file on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Progress recorded in the checkpoint, without materialising the state.
    pub async fn summary(&self) -> Result<Option<CheckpointSummary>, AppError> {
        Ok(self.read_document().await?.map(|doc| CheckpointSummary {
            next_index: doc.next_index,
            records: doc.records.len(),
            failed: doc.failed_identifiers.len(),
            saved_at: doc.saved_at,
        }))
    }

    async fn read_document(&self) -> Result<Option<CheckpointIn>, AppError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::CheckpointError(format!(
                    "cannot read checkpoint {}: {e}",
                    self.path.display()
                )));
            }
        };

        let doc: CheckpointIn = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::CheckpointError(format!(
                "checkpoint {} is corrupt: {e}",
                self.path.display()
            ))
        })?;

        let resolved = doc.records.len() + doc.failed_identifiers.len();
        if doc.next_index < resolved {
            return Err(AppError::CheckpointError(format!(
                "checkpoint {} is inconsistent: next_index {} but {} items resolved",
                self.path.display(),
                doc.next_index,
                resolved
            )));
        }

        Ok(Some(doc))
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &RunState) -> Result<(), AppError> {
        let doc = CheckpointOut {
            records: &state.completed_records,
            next_index: state.next_index,
            failed_identifiers: &state.failed_identifiers,
            processed_fingerprint: state.processed_fingerprint.as_deref(),
            saved_at: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;
        write_atomic(&self.path, &bytes).await.map_err(|e| {
            AppError::CheckpointError(format!(
                "cannot write checkpoint {}: {e}",
                self.path.display()
            ))
        })?;

        tracing::debug!(
            path = %self.path.display(),
            next_index = state.next_index,
            records = state.completed_records.len(),
            failed = state.failed_identifiers.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<RunState>, AppError> {
        let Some(doc) = self.read_document().await? else {
            return Ok(None);
        };

        tracing::info!(
            path = %self.path.display(),
            next_index = doc.next_index,
            records = doc.records.len(),
            failed = doc.failed_identifiers.len(),
            saved_at = %doc.saved_at,
            "Checkpoint loaded"
        );

        Ok(Some(RunState {
            completed_records: doc.records,
            next_index: doc.next_index,
            failed_identifiers: doc.failed_identifiers,
            processed_fingerprint: doc.processed_fingerprint,
        }))
    }
}

/// Write bytes atomically (write to temp, fsync, then rename).
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
