pub mod backoff;
pub mod checkpoint;
pub mod circuit_breaker;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod models;
pub mod stats;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use backoff::BackoffPolicy;
pub use checkpoint::{CheckpointSummary, FileCheckpointStore};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{DEFAULT_URL_TEMPLATE, HarvestConfig, UrlTemplate};
pub use dataset::{DEFAULT_ITEMS_KEY, load_dataset, load_work_items, write_dataset, write_work_items};
pub use engine::{
    EngineEvent, EngineReporter, ExtractionEngine, ItemRetry, ItemState, RunOutcome, RunReport,
    TracingEngineReporter,
};
pub use error::{AppError, AttemptError, FailureClass, FetchError, ParseError};
pub use models::{FinalDataset, Fingerprint, Record, RecordFields, RunState, WorkItem};
pub use stats::{FieldCoverage, Progress, RunSummary, format_duration};
pub use traits::{CheckpointStore, PageFetcher, RecordParser, Sleeper, TokioSleeper};
