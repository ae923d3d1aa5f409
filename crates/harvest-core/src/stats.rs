use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::Record;

/// Render a duration as `1h 2m 3s`, `2m 3s` or `3s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Progress snapshot handed to observers after every item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Items resolved so far, including those from a resumed checkpoint.
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// Items resolved since this process started.
    pub processed_this_run: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }

    /// Remaining time at this session's throughput.
    pub fn eta(&self) -> Option<Duration> {
        if self.processed_this_run == 0 || self.elapsed.is_zero() {
            return None;
        }
        let per_item = self.elapsed.as_secs_f64() / self.processed_this_run as f64;
        let remaining = self.total.saturating_sub(self.completed) as f64;
        Some(Duration::from_secs_f64(per_item * remaining))
    }
}

/// End-of-run totals for the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    /// Items attempted by this process (excludes resumed work).
    pub processed_this_run: usize,
    pub circuit_trips: u64,
}

impl RunSummary {
    pub fn success_rate(&self) -> f64 {
        let attempted = self.succeeded + self.failed;
        if attempted == 0 {
            0.0
        } else {
            self.succeeded as f64 * 100.0 / attempted as f64
        }
    }

    pub fn average_per_item(&self) -> Option<Duration> {
        if self.processed_this_run == 0 {
            None
        } else {
            Some(self.elapsed / self.processed_this_run as u32)
        }
    }
}

/// How often each field is populated across a record set.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCoverage {
    pub total_records: usize,
    /// Field name → number of records with a non-empty value.
    pub populated: BTreeMap<String, usize>,
}

impl FieldCoverage {
    pub fn from_records(records: &[Record]) -> Self {
        let mut populated: BTreeMap<String, usize> = BTreeMap::new();
        for record in records {
            for (name, value) in &record.fields {
                let entry = populated.entry(name.clone()).or_insert(0);
                if value.as_deref().is_some_and(|v| !v.trim().is_empty()) {
                    *entry += 1;
                }
            }
        }
        Self {
            total_records: records.len(),
            populated,
        }
    }

    pub fn rate(&self, field: &str) -> f64 {
        if self.total_records == 0 {
            return 0.0;
        }
        let count = self.populated.get(field).copied().unwrap_or(0);
        count as f64 * 100.0 / self.total_records as f64
    }
}
