use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harvest_core::{
    AppError, ExtractionEngine, FetchError, FileCheckpointStore, HarvestConfig, PageFetcher,
    ParseError, RecordFields, RecordParser, RunReport, Sleeper, TracingEngineReporter,
    UrlTemplate, WorkItem,
};
use tokio_util::sync::CancellationToken;

pub const TEMPLATE: &str = "test://book/{id}";

pub type TestEngine =
    ExtractionEngine<CatalogFetcher, TitleParser, FileCheckpointStore, CountingSleeper>;

/// Serves `title:<id>` for every page, except identifiers marked as gone.
#[derive(Clone, Default)]
pub struct CatalogFetcher {
    gone: Arc<HashSet<String>>,
    pub requests: Arc<Mutex<HashMap<String, usize>>>,
}

impl CatalogFetcher {
    pub fn with_gone(ids: &[i64]) -> Self {
        Self {
            gone: Arc::new(ids.iter().map(|id| format!("test://book/{id}")).collect()),
            requests: Arc::default(),
        }
    }

    pub fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().values().sum()
    }

    pub fn max_requests_per_url(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }
}

impl PageFetcher for CatalogFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        *self
            .requests
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        if self.gone.contains(url) {
            return Err(FetchError::Permanent(format!("{url} removed")));
        }
        let id = url.rsplit('/').next().unwrap_or_default();
        Ok(format!("title:{id}"))
    }
}

#[derive(Clone, Default)]
pub struct TitleParser;

impl RecordParser for TitleParser {
    fn parse(&self, content: &str) -> Result<RecordFields, ParseError> {
        let title = content
            .strip_prefix("title:")
            .ok_or_else(|| ParseError::MissingContent(content.to_string()))?;
        let mut fields = RecordFields::new();
        fields.insert("title".into(), Some(format!("Book {title}")));
        Ok(fields)
    }
}

/// Sleeper that never waits; optionally requests a stop at the N-th pause.
#[derive(Clone, Default)]
pub struct CountingSleeper {
    count: Arc<Mutex<usize>>,
    stop_at: Option<(usize, CancellationToken)>,
}

impl CountingSleeper {
    pub fn stopping_at(n: usize, token: CancellationToken) -> Self {
        Self {
            count: Arc::default(),
            stop_at: Some((n, token)),
        }
    }
}

impl Sleeper for CountingSleeper {
    async fn sleep(&self, _duration: Duration) {
        let n = {
            let mut count = self.count.lock().unwrap();
            *count += 1;
            *count
        };
        if let Some((at, token)) = &self.stop_at
            && *at == n
        {
            token.cancel();
            std::future::pending::<()>().await;
        }
    }
}

/// Pacing of 1 ms gives one sleeper call between consecutive items.
pub fn test_config() -> HarvestConfig {
    HarvestConfig::default()
        .with_pacing(Duration::from_millis(1), Duration::ZERO)
        .with_retries(2, Duration::from_secs(1))
        .with_breaker(50, Duration::from_secs(60))
        .with_checkpoint_interval(3)
}

pub fn engine(
    fetcher: CatalogFetcher,
    checkpoint: &Path,
    sleeper: CountingSleeper,
) -> TestEngine {
    ExtractionEngine::new(
        fetcher,
        TitleParser,
        FileCheckpointStore::new(checkpoint),
        UrlTemplate::new(TEMPLATE).unwrap(),
        test_config(),
    )
    .unwrap()
    .with_sleeper(sleeper)
}

pub fn items(range: std::ops::RangeInclusive<i64>) -> Vec<WorkItem> {
    range.map(WorkItem::Number).collect()
}

/// Load the checkpoint and run `list` to completion.
pub async fn run(engine: &TestEngine, list: &[WorkItem]) -> Result<RunReport, AppError> {
    let state = engine.load_state().await?;
    engine
        .run(list, state, &CancellationToken::new(), &TracingEngineReporter::default())
        .await
}
