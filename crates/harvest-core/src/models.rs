use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque identifier of one unit of extraction work.
///
/// Listings may carry numeric or textual identifiers; the JSON form is
/// preserved so output files round-trip the input document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkItem {
    Number(i64),
    Text(String),
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Number(n) => write!(f, "{n}"),
            WorkItem::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for WorkItem {
    fn from(n: i64) -> Self {
        WorkItem::Number(n)
    }
}

impl From<&str> for WorkItem {
    fn from(s: &str) -> Self {
        WorkItem::Text(s.to_string())
    }
}

impl From<String> for WorkItem {
    fn from(s: String) -> Self {
        WorkItem::Text(s)
    }
}

/// Domain fields produced by a parser. Absent values are normal.
pub type RecordFields = BTreeMap<String, Option<String>>;

/// Field names owned by the engine; parsers cannot set them.
pub const ENGINE_FIELDS: [&str; 2] = ["source_identifier", "fetched_at"];

/// One extracted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub source_identifier: WorkItem,
    pub fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: RecordFields,
}

impl Record {
    /// Build a record from parser output, stamping the engine-owned fields.
    pub fn new(source_identifier: WorkItem, mut fields: RecordFields) -> Self {
        for name in ENGINE_FIELDS {
            fields.remove(name);
        }
        Self {
            source_identifier,
            fetched_at: Utc::now(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_deref())
    }
}

/// Resumable progress of one extraction run.
///
/// The circuit-breaker counter is deliberately absent: it lives in the
/// engine's [`CircuitBreaker`](crate::circuit_breaker::CircuitBreaker) and
/// starts from zero after every load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    pub completed_records: Vec<Record>,
    /// Index into the work-item list of the next item to attempt.
    pub next_index: usize,
    pub failed_identifiers: Vec<WorkItem>,
    /// Fingerprint of `items[..next_index]`, set by the engine on flush.
    pub processed_fingerprint: Option<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items resolved either way.
    pub fn resolved_count(&self) -> usize {
        self.completed_records.len() + self.failed_identifiers.len()
    }
}

/// Write-once result of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDataset {
    /// Number of successfully extracted records.
    pub total: usize,
    pub failed_count: usize,
    pub records: Vec<Record>,
    pub failed_identifiers: Vec<WorkItem>,
    pub produced_at: DateTime<Utc>,
}

impl FinalDataset {
    pub fn from_state(state: RunState) -> Self {
        Self {
            total: state.completed_records.len(),
            failed_count: state.failed_identifiers.len(),
            records: state.completed_records,
            failed_identifiers: state.failed_identifiers,
            produced_at: Utc::now(),
        }
    }
}

/// Incremental SHA-256 over a prefix of the work-item list.
///
/// Ties a checkpoint to the listing it was produced from, so a resume
/// against a different listing is refused instead of silently skipping.
#[derive(Clone, Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn of(items: &[WorkItem]) -> Self {
        let mut fp = Self::default();
        for item in items {
            fp.update(item);
        }
        fp
    }

    pub fn update(&mut self, item: &WorkItem) {
        // Tag the variant so `1` and `"1"` hash differently.
        match item {
            WorkItem::Number(n) => {
                self.hasher.update(b"n:");
                self.hasher.update(n.to_string().as_bytes());
            }
            WorkItem::Text(s) => {
                self.hasher.update(b"s:");
                self.hasher.update(s.as_bytes());
            }
        }
        self.hasher.update([0u8]);
    }

    /// 64-char hex digest of everything fed so far.
    pub fn hex(&self) -> String {
        format!("{:x}", self.hasher.clone().finalize())
    }
}
