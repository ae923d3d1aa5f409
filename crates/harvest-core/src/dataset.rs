//! Work-item input documents and final dataset output.

use std::path::Path;

use serde_json::Value;

use crate::checkpoint::write_atomic;
use crate::error::AppError;
use crate::models::{FinalDataset, WorkItem};

/// Key under which identifier listings are stored by default.
pub const DEFAULT_ITEMS_KEY: &str = "book_ids";

/// Read the ordered identifier list stored under `key` in a JSON document.
///
/// `limit` keeps only the first N identifiers (useful for trial runs).
pub async fn load_work_items(
    path: &Path,
    key: &str,
    limit: Option<usize>,
) -> Result<Vec<WorkItem>, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::InputError(format!("cannot read {}: {e}", path.display())))?;
    let doc: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AppError::InputError(format!("{} is not valid JSON: {e}", path.display())))?;

    let list = doc.get(key).ok_or_else(|| {
        AppError::InputError(format!("{} has no '{key}' key", path.display()))
    })?;
    let mut items: Vec<WorkItem> = serde_json::from_value(list.clone()).map_err(|e| {
        AppError::InputError(format!(
            "'{key}' in {} is not a list of identifiers: {e}",
            path.display()
        ))
    })?;

    if let Some(limit) = limit {
        items.truncate(limit);
    }

    tracing::info!(path = %path.display(), items = items.len(), "Loaded work items");
    Ok(items)
}

/// Write identifiers as a work-item document, e.g. for a retry pass.
pub async fn write_work_items(path: &Path, key: &str, items: &[WorkItem]) -> Result<(), AppError> {
    let mut doc = serde_json::Map::new();
    doc.insert(key.to_string(), serde_json::to_value(items)?);
    doc.insert("total".to_string(), Value::from(items.len()));
    let bytes = serde_json::to_vec_pretty(&Value::Object(doc))?;
    write_atomic(path, &bytes)
        .await
        .map_err(|e| AppError::OutputError(format!("cannot write {}: {e}", path.display())))
}

/// Write the final dataset atomically as pretty JSON.
pub async fn write_dataset(path: &Path, dataset: &FinalDataset) -> Result<(), AppError> {
    let bytes = serde_json::to_vec_pretty(dataset)?;
    write_atomic(path, &bytes)
        .await
        .map_err(|e| AppError::OutputError(format!("cannot write {}: {e}", path.display())))?;
    tracing::info!(
        path = %path.display(),
        total = dataset.total,
        failed = dataset.failed_count,
        "Dataset written"
    );
    Ok(())
}

pub async fn load_dataset(path: &Path) -> Result<FinalDataset, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::InputError(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes).map_err(|e| {
        AppError::InputError(format!("{} is not a harvest dataset: {e}", path.display()))
    })
}
