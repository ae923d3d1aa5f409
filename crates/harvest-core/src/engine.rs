//! Resilient, resumable extraction loop.
//!
//! Walks the work-item list from `RunState::next_index`, resolving every
//! item to either a [`Record`] or a failed identifier before advancing.
//! Each item runs its own retry state machine:
//!
//! ```text
//! Pending --> Attempting(n) --[ok]--------------------------> Succeeded
//!                  |
//!                  +--[budget left]--> Retrying(wait) --> Attempting(n+1)
//!                  |
//!                  +--[budget spent / permanent]-------------> Failed
//! ```

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::config::{HarvestConfig, UrlTemplate};
use crate::error::{AppError, AttemptError, FailureClass};
use crate::models::{FinalDataset, Fingerprint, Record, RecordFields, RunState, WorkItem};
use crate::stats::{Progress, RunSummary, format_duration};
use crate::traits::{CheckpointStore, PageFetcher, RecordParser, Sleeper, TokioSleeper};

// ---------------------------------------------------------------------------
// Per-item retry state machine
// ---------------------------------------------------------------------------

/// Lifecycle of a single work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Attempting(u32),
    Retrying(Duration),
    Succeeded,
    Failed,
}

/// Retry budget and schedule for one item, free of I/O and real time.
///
/// Transient and parse failures share the general budget; server-overload
/// failures draw from their own, larger budget.
#[derive(Debug, Clone)]
pub struct ItemRetry {
    state: ItemState,
    attempts: u32,
    general_failures: u32,
    overload_failures: u32,
    max_attempts: u32,
    overload_max_attempts: u32,
}

impl ItemRetry {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            state: ItemState::Pending,
            attempts: 0,
            general_failures: 0,
            overload_failures: 0,
            max_attempts: config.max_attempts,
            overload_max_attempts: config.overload_max_attempts,
        }
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pending or Retrying → Attempting(n). Returns the attempt number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.state = ItemState::Attempting(self.attempts);
        self.attempts
    }

    pub fn succeed(&mut self) {
        self.state = ItemState::Succeeded;
    }

    /// Attempting → Retrying(wait) or Failed, depending on the class budget.
    pub fn fail(&mut self, class: FailureClass, policy: &BackoffPolicy) -> ItemState {
        self.state = match class {
            FailureClass::Permanent => ItemState::Failed,
            FailureClass::Transient | FailureClass::Parse => {
                self.general_failures += 1;
                if self.general_failures >= self.max_attempts {
                    ItemState::Failed
                } else {
                    ItemState::Retrying(policy.wait(self.general_failures, class))
                }
            }
            FailureClass::ServerOverload => {
                self.overload_failures += 1;
                if self.overload_failures >= self.overload_max_attempts {
                    ItemState::Failed
                } else {
                    ItemState::Retrying(policy.wait(self.overload_failures, class))
                }
            }
        };
        self.state
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events emitted by the engine for monitoring/logging.
#[derive(Debug, Clone)]
pub enum EngineEvent<'a> {
    Started {
        total: usize,
        resume_from: usize,
        config: &'a HarvestConfig,
    },
    AttemptFailed {
        item: &'a WorkItem,
        attempt: u32,
        error: &'a AttemptError,
        retry_in: Option<Duration>,
    },
    ItemSucceeded {
        index: usize,
        item: &'a WorkItem,
        attempts: u32,
    },
    ItemFailed {
        index: usize,
        item: &'a WorkItem,
        error: &'a AttemptError,
        attempts: u32,
    },
    DuplicateSkipped {
        index: usize,
        item: &'a WorkItem,
    },
    CircuitOpened {
        consecutive_failures: u32,
        cooldown: Duration,
    },
    CircuitReset {
        state: CircuitState,
    },
    Progress(Progress),
    CheckpointSaved {
        next_index: usize,
    },
    Cancelled {
        next_index: usize,
    },
    Finished {
        summary: &'a RunSummary,
    },
}

impl EngineEvent<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Started { .. } => "started",
            EngineEvent::AttemptFailed { .. } => "attempt_failed",
            EngineEvent::ItemSucceeded { .. } => "item_succeeded",
            EngineEvent::ItemFailed { .. } => "item_failed",
            EngineEvent::DuplicateSkipped { .. } => "duplicate_skipped",
            EngineEvent::CircuitOpened { .. } => "circuit_opened",
            EngineEvent::CircuitReset { .. } => "circuit_reset",
            EngineEvent::Progress(_) => "progress",
            EngineEvent::CheckpointSaved { .. } => "checkpoint_saved",
            EngineEvent::Cancelled { .. } => "cancelled",
            EngineEvent::Finished { .. } => "finished",
        }
    }
}

/// Trait for receiving engine events (decoupled logging / progress display).
pub trait EngineReporter: Send + Sync {
    fn report(&self, event: EngineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
///
/// Progress is logged at info level every `progress_interval` items and at
/// debug level otherwise.
#[derive(Debug, Clone, Copy)]
pub struct TracingEngineReporter {
    pub progress_interval: usize,
}

impl Default for TracingEngineReporter {
    fn default() -> Self {
        Self {
            progress_interval: 10,
        }
    }
}

impl EngineReporter for TracingEngineReporter {
    fn report(&self, event: EngineEvent<'_>) {
        match event {
            EngineEvent::Started {
                total,
                resume_from,
                config,
            } => {
                tracing::info!(
                    total,
                    resume_from,
                    timeout_secs = config.request_timeout.as_secs(),
                    delay_ms = config.inter_item_delay.as_millis() as u64,
                    jitter_ms = config.jitter_max.as_millis() as u64,
                    max_attempts = config.max_attempts,
                    backoff_base_secs = config.backoff_base.as_secs(),
                    breaker_threshold = config.breaker_threshold,
                    breaker_cooldown_secs = config.breaker_cooldown.as_secs(),
                    checkpoint_interval = config.checkpoint_interval,
                    "Extraction started"
                );
            }
            EngineEvent::AttemptFailed {
                item,
                attempt,
                error,
                retry_in,
            } => match retry_in {
                Some(wait) => tracing::warn!(
                    %item,
                    attempt,
                    class = %error.class(),
                    %error,
                    "Attempt failed, retrying in {}",
                    format_duration(wait)
                ),
                None => tracing::debug!(%item, attempt, %error, "Attempt failed"),
            },
            EngineEvent::ItemSucceeded {
                index,
                item,
                attempts,
            } => {
                tracing::debug!(index, %item, attempts, "Item extracted");
            }
            EngineEvent::ItemFailed {
                index,
                item,
                error,
                attempts,
            } => {
                tracing::warn!(index, %item, attempts, %error, "Item failed");
            }
            EngineEvent::DuplicateSkipped { index, item } => {
                tracing::info!(index, %item, "Skipping already resolved identifier");
            }
            EngineEvent::CircuitOpened {
                consecutive_failures,
                cooldown,
            } => {
                tracing::warn!(
                    consecutive_failures,
                    "Circuit breaker open, cooling down for {}",
                    format_duration(cooldown)
                );
            }
            EngineEvent::CircuitReset { state } => {
                tracing::info!(%state, "Circuit breaker reset, resuming");
            }
            EngineEvent::Progress(p) => {
                let eta = p.eta().map(format_duration).unwrap_or_else(|| "-".into());
                if self.progress_interval > 0
                    && (p.completed % self.progress_interval == 0 || p.completed == p.total)
                {
                    tracing::info!(
                        "Progress: {}/{} ({:.1}%) | Elapsed: {} | ETA: {}",
                        p.completed,
                        p.total,
                        p.percent(),
                        format_duration(p.elapsed),
                        eta
                    );
                } else {
                    tracing::debug!(completed = p.completed, total = p.total, %eta, "Progress");
                }
            }
            EngineEvent::CheckpointSaved { next_index } => {
                tracing::info!(next_index, "Checkpoint saved");
            }
            EngineEvent::Cancelled { next_index } => {
                tracing::warn!(next_index, "Stop requested, progress saved");
            }
            EngineEvent::Finished { summary } => {
                tracing::info!(
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    circuit_trips = summary.circuit_trips,
                    "Extraction finished in {} ({:.1}% success)",
                    format_duration(summary.elapsed),
                    summary.success_rate()
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every work item was resolved.
    Completed(FinalDataset),
    /// A stop request arrived; the state has been flushed and can be resumed.
    Cancelled(RunState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub summary: RunSummary,
}

enum ItemOutcome {
    Succeeded { record: Record, attempts: u32 },
    Failed { error: AttemptError, attempts: u32 },
    Interrupted,
}

/// Sequential extraction engine.
///
/// Generic over all external dependencies via traits, enabling dependency
/// injection and testability without real HTTP, disk, or time.
pub struct ExtractionEngine<F, P, S, Z = TokioSleeper>
where
    F: PageFetcher,
    P: RecordParser,
    S: CheckpointStore,
    Z: Sleeper,
{
    fetcher: F,
    parser: P,
    store: S,
    sleeper: Z,
    urls: UrlTemplate,
    config: HarvestConfig,
    policy: BackoffPolicy,
    breaker: CircuitBreaker,
}

impl<F, P, S> ExtractionEngine<F, P, S, TokioSleeper>
where
    F: PageFetcher,
    P: RecordParser,
    S: CheckpointStore,
{
    pub fn new(
        fetcher: F,
        parser: P,
        store: S,
        urls: UrlTemplate,
        config: HarvestConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            fetcher,
            parser,
            store,
            sleeper: TokioSleeper,
            urls,
            policy: BackoffPolicy::from_config(&config),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::from(&config)),
            config,
        })
    }
}

impl<F, P, S, Z> ExtractionEngine<F, P, S, Z>
where
    F: PageFetcher,
    P: RecordParser,
    S: CheckpointStore,
    Z: Sleeper,
{
    /// Replace the sleep capability (tests inject a recording sleeper).
    pub fn with_sleeper<Z2: Sleeper>(self, sleeper: Z2) -> ExtractionEngine<F, P, S, Z2> {
        ExtractionEngine {
            fetcher: self.fetcher,
            parser: self.parser,
            store: self.store,
            sleeper,
            urls: self.urls,
            config: self.config,
            policy: self.policy,
            breaker: self.breaker,
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the checkpoint, or start fresh when none exists.
    pub async fn load_state(&self) -> Result<RunState, AppError> {
        Ok(self.store.load().await?.unwrap_or_default())
    }

    /// Process `items[state.next_index..]` until done or cancelled.
    ///
    /// Only checkpoint/output failures are returned as errors; every item
    /// failure is resolved into `failed_identifiers`.
    pub async fn run<R: EngineReporter>(
        &self,
        items: &[WorkItem],
        mut state: RunState,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<RunReport, AppError> {
        let mut fingerprint = verify_resume(items, &state)?;
        let mut resolved: HashSet<WorkItem> = state
            .completed_records
            .iter()
            .map(|r| r.source_identifier.clone())
            .chain(state.failed_identifiers.iter().cloned())
            .collect();

        let total = items.len();
        let start = Instant::now();
        let mut processed = 0usize;
        let mut cancelled = false;

        reporter.report(EngineEvent::Started {
            total,
            resume_from: state.next_index,
            config: &self.config,
        });

        for index in state.next_index..total {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let item = &items[index];
            let duplicate = resolved.contains(item);

            if duplicate {
                reporter.report(EngineEvent::DuplicateSkipped { index, item });
            } else {
                if self.breaker.is_open() {
                    reporter.report(EngineEvent::CircuitOpened {
                        consecutive_failures: self.breaker.consecutive_failures(),
                        cooldown: self.breaker.cooldown(),
                    });
                    if !self.pause(self.breaker.cooldown(), cancel).await {
                        cancelled = true;
                        break;
                    }
                    self.breaker.complete_cooldown();
                    reporter.report(EngineEvent::CircuitReset {
                        state: self.breaker.state(),
                    });
                }

                match self.process_item(item, cancel, reporter).await {
                    ItemOutcome::Succeeded { record, attempts } => {
                        self.breaker.record_success();
                        reporter.report(EngineEvent::ItemSucceeded {
                            index,
                            item,
                            attempts,
                        });
                        state.completed_records.push(record);
                    }
                    ItemOutcome::Failed { error, attempts } => {
                        self.breaker.record_failure(&error.to_string());
                        reporter.report(EngineEvent::ItemFailed {
                            index,
                            item,
                            error: &error,
                            attempts,
                        });
                        state.failed_identifiers.push(item.clone());
                    }
                    ItemOutcome::Interrupted => {
                        cancelled = true;
                        break;
                    }
                }
                resolved.insert(item.clone());
                processed += 1;
            }

            state.next_index = index + 1;
            fingerprint.update(item);

            reporter.report(EngineEvent::Progress(Progress {
                completed: state.next_index,
                total,
                elapsed: start.elapsed(),
                processed_this_run: processed,
            }));

            if state.next_index % self.config.checkpoint_interval == 0 {
                self.flush(&mut state, &fingerprint, reporter).await?;
            }

            // Duplicates made no request, so they need no pacing.
            if !duplicate && index + 1 < total && !self.pause(self.policy.pacing(), cancel).await {
                cancelled = true;
                break;
            }
        }

        self.flush(&mut state, &fingerprint, reporter).await?;

        let summary = RunSummary {
            succeeded: state.completed_records.len(),
            failed: state.failed_identifiers.len(),
            elapsed: start.elapsed(),
            processed_this_run: processed,
            circuit_trips: self.breaker.stats().trips,
        };

        let outcome = if cancelled {
            reporter.report(EngineEvent::Cancelled {
                next_index: state.next_index,
            });
            RunOutcome::Cancelled(state)
        } else {
            RunOutcome::Completed(FinalDataset::from_state(state))
        };
        reporter.report(EngineEvent::Finished { summary: &summary });

        Ok(RunReport { outcome, summary })
    }

    async fn process_item<R: EngineReporter>(
        &self,
        item: &WorkItem,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> ItemOutcome {
        let url = self.urls.render(item);
        let mut retry = ItemRetry::new(&self.config);

        loop {
            let attempt = retry.begin_attempt();
            let error = match self.attempt(&url).await {
                Ok(fields) => {
                    retry.succeed();
                    return ItemOutcome::Succeeded {
                        record: Record::new(item.clone(), fields),
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };

            match retry.fail(error.class(), &self.policy) {
                ItemState::Retrying(wait) => {
                    reporter.report(EngineEvent::AttemptFailed {
                        item,
                        attempt,
                        error: &error,
                        retry_in: Some(wait),
                    });
                    if !self.pause(wait, cancel).await {
                        return ItemOutcome::Interrupted;
                    }
                }
                _ => {
                    reporter.report(EngineEvent::AttemptFailed {
                        item,
                        attempt,
                        error: &error,
                        retry_in: None,
                    });
                    return ItemOutcome::Failed {
                        error,
                        attempts: retry.attempts(),
                    };
                }
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<RecordFields, AttemptError> {
        let content = self.fetcher.fetch(url).await?;
        Ok(self.parser.parse(&content)?)
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = self.sleeper.sleep(duration) => true,
        }
    }

    async fn flush<R: EngineReporter>(
        &self,
        state: &mut RunState,
        fingerprint: &Fingerprint,
        reporter: &R,
    ) -> Result<(), AppError> {
        state.processed_fingerprint = Some(fingerprint.hex());
        self.store.save(state).await?;
        reporter.report(EngineEvent::CheckpointSaved {
            next_index: state.next_index,
        });
        Ok(())
    }
}

/// Check that `state` was produced from a prefix of `items` and return the
/// running fingerprint of that prefix.
fn verify_resume(items: &[WorkItem], state: &RunState) -> Result<Fingerprint, AppError> {
    if state.next_index > items.len() {
        return Err(AppError::CheckpointMismatch(format!(
            "checkpoint resumes at index {} but the work list has only {} items",
            state.next_index,
            items.len()
        )));
    }
    if state.resolved_count() > state.next_index {
        return Err(AppError::CheckpointMismatch(format!(
            "checkpoint resolves {} items but resumes at index {}",
            state.resolved_count(),
            state.next_index
        )));
    }

    let fingerprint = Fingerprint::of(&items[..state.next_index]);
    match &state.processed_fingerprint {
        Some(saved) if *saved != fingerprint.hex() => Err(AppError::CheckpointMismatch(
            "the first items of the work list differ from those the checkpoint was built from"
                .into(),
        )),
        None if state.next_index > 0 => {
            tracing::warn!(
                next_index = state.next_index,
                "Checkpoint carries no fingerprint, resuming without verification"
            );
            Ok(fingerprint)
        }
        _ => Ok(fingerprint),
    }
}
