use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, FetchError, ParseError};
use crate::models::{RecordFields, RunState};

/// Fetches the raw content of one page.
///
/// Implementations never panic or return unclassified errors: every
/// failure path maps to a [`FetchError`] whose class drives the retry
/// policy.
pub trait PageFetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Turns a fetched page into domain fields.
///
/// The engine stamps `source_identifier` and `fetched_at` itself.
pub trait RecordParser: Send + Sync + Clone {
    fn parse(&self, content: &str) -> Result<RecordFields, ParseError>;
}

/// Durable, atomically replaced persistence of [`RunState`].
pub trait CheckpointStore: Send + Sync {
    /// Persist `state` so that a crash leaves either the previous or the new
    /// checkpoint readable, never a partial one.
    fn save(&self, state: &RunState) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Returns `None` when no checkpoint has been written yet.
    fn load(&self) -> impl Future<Output = Result<Option<RunState>, AppError>> + Send;
}

/// Suspends the worker. Injected so schedules are testable without real time.
pub trait Sleeper: Send + Sync + Clone {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
