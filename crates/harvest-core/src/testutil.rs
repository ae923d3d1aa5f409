//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::{EngineEvent, EngineReporter};
use crate::error::{AppError, FetchError, ParseError};
use crate::models::{RecordFields, RunState};
use crate::stats::Progress;
use crate::traits::{CheckpointStore, PageFetcher, RecordParser, Sleeper};

/// URL template used by engine tests.
pub const TEST_TEMPLATE: &str = "mock://item/{id}";

pub fn test_url(id: i64) -> String {
    format!("mock://item/{id}")
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with per-URL scripted responses.
///
/// Each call pops the next scripted response for the URL; once the script is
/// exhausted (or absent) the page body is `page:<url>`.
#[derive(Clone, Default)]
pub struct MockFetcher {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Result<String, FetchError>>>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, url: &str, responses: Vec<Result<String, FetchError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), responses.into());
        self
    }

    /// Every request to `url` fails with `error`.
    pub fn always_failing(self, url: &str, error: FetchError, times: usize) -> Self {
        let script = (0..times).map(|_| Err(error.clone())).collect();
        self.with_script(url, script)
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(url).and_then(|q| q.pop_front()) {
            Some(response) => response,
            None => Ok(format!("page:{url}")),
        }
    }
}

// ---------------------------------------------------------------------------
// MockParser
// ---------------------------------------------------------------------------

/// Mock parser: the page body becomes the `title` field.
///
/// Bodies starting with `!` are rejected as unparseable.
#[derive(Clone, Default)]
pub struct MockParser;

impl RecordParser for MockParser {
    fn parse(&self, content: &str) -> Result<RecordFields, ParseError> {
        if content.starts_with('!') {
            return Err(ParseError::MissingContent("no detail markup".into()));
        }
        let mut fields = RecordFields::new();
        fields.insert("title".into(), Some(content.to_string()));
        fields.insert("isbn".into(), None);
        Ok(fields)
    }
}

// ---------------------------------------------------------------------------
// MemoryCheckpointStore
// ---------------------------------------------------------------------------

/// In-memory checkpoint store recording every save.
#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    current: Arc<Mutex<Option<RunState>>>,
    pub saves: Arc<Mutex<Vec<RunState>>>,
    fail_saves: Arc<Mutex<bool>>,
}

impl MemoryCheckpointStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_state(state: RunState) -> Self {
        let store = Self::default();
        *store.current.lock().unwrap() = Some(state);
        store
    }

    /// Store whose saves fail, as if the disk were full.
    pub fn failing() -> Self {
        let store = Self::default();
        *store.fail_saves.lock().unwrap() = true;
        store
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    pub fn saved_indices(&self) -> Vec<usize> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.next_index)
            .collect()
    }

    pub fn current(&self) -> Option<RunState> {
        self.current.lock().unwrap().clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &RunState) -> Result<(), AppError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(AppError::CheckpointError("disk full".into()));
        }
        *self.current.lock().unwrap() = Some(state.clone());
        self.saves.lock().unwrap().push(state.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<RunState>, AppError> {
        Ok(self.current.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// RecordingSleeper
// ---------------------------------------------------------------------------

/// Sleeper that returns immediately and records requested durations.
///
/// Optionally cancels a token when the N-th sleep starts, to simulate a stop
/// request arriving during a wait.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    pub sleeps: Arc<Mutex<Vec<Duration>>>,
    cancel_on: Arc<Mutex<Option<(usize, CancellationToken)>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelling_at(n: usize, token: CancellationToken) -> Self {
        let sleeper = Self::default();
        *sleeper.cancel_on.lock().unwrap() = Some((n, token));
        sleeper
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn count_of(&self, duration: Duration) -> usize {
        self.sleeps
            .lock()
            .unwrap()
            .iter()
            .filter(|d| **d == duration)
            .count()
    }
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let n = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(duration);
            sleeps.len()
        };
        let cancel_on = self.cancel_on.lock().unwrap().clone();
        if let Some((at, token)) = cancel_on
            && at == n
        {
            token.cancel();
            // Park so the cancellation branch wins.
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that keeps event kinds and progress snapshots.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    pub kinds: Arc<Mutex<Vec<&'static str>>>,
    pub progress: Arc<Mutex<Vec<Progress>>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds
            .lock()
            .unwrap()
            .iter()
            .filter(|k| **k == kind)
            .count()
    }
}

impl EngineReporter for RecordingReporter {
    fn report(&self, event: EngineEvent<'_>) {
        if let EngineEvent::Progress(p) = &event {
            self.progress.lock().unwrap().push(*p);
        }
        self.kinds.lock().unwrap().push(event.kind());
    }
}
