use std::time::Duration;

use url::form_urlencoded;

use crate::error::AppError;
use crate::models::WorkItem;

/// Detail page used when no template is configured.
pub const DEFAULT_URL_TEMPLATE: &str = "https://isbnchile.cl/catalogo.php?mode=detalle&nt={id}";

/// Immutable run configuration, passed explicitly into the engine.
///
/// Defaults reproduce the tuning used against a fragile catalog server:
/// long timeouts, minute-scale backoff, and a five-minute cooldown.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    /// Timeout for a single page request.
    pub request_timeout: Duration,

    /// Fixed pause between items.
    pub inter_item_delay: Duration,

    /// Upper bound of the uniform random jitter added to `inter_item_delay`.
    pub jitter_max: Duration,

    /// Attempt budget per item for transient and parse failures.
    pub max_attempts: u32,

    /// First retry waits `backoff_base`, then doubles.
    pub backoff_base: Duration,

    /// Optional ceiling on the exponential wait. `None` leaves it uncapped.
    pub backoff_cap: Option<Duration>,

    /// Fixed wait after an HTTP 503/504.
    pub overload_wait: Duration,

    /// Separate attempt budget for server-overload failures.
    pub overload_max_attempts: u32,

    /// Consecutive item failures that open the circuit breaker.
    pub breaker_threshold: u32,

    /// Pause applied when the circuit breaker opens.
    pub breaker_cooldown: Duration,

    /// After a cooldown, require one successful item before fully closing.
    pub half_open_trial: bool,

    /// Flush the checkpoint every this many items.
    pub checkpoint_interval: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(180),
            inter_item_delay: Duration::ZERO,
            jitter_max: Duration::from_millis(500),
            max_attempts: 5,
            backoff_base: Duration::from_secs(30),
            backoff_cap: None,
            overload_wait: Duration::from_secs(300),
            overload_max_attempts: 10,
            breaker_threshold: 10,
            breaker_cooldown: Duration::from_secs(300),
            half_open_trial: false,
            checkpoint_interval: 50,
        }
    }
}

impl HarvestConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_pacing(mut self, delay: Duration, jitter_max: Duration) -> Self {
        self.inter_item_delay = delay;
        self.jitter_max = jitter_max;
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, base: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_base = base;
        self
    }

    pub fn with_backoff_cap(mut self, cap: Option<Duration>) -> Self {
        self.backoff_cap = cap;
        self
    }

    pub fn with_overload(mut self, wait: Duration, max_attempts: u32) -> Self {
        self.overload_wait = wait;
        self.overload_max_attempts = max_attempts;
        self
    }

    pub fn with_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.breaker_threshold = threshold;
        self.breaker_cooldown = cooldown;
        self
    }

    pub fn with_half_open_trial(mut self, enabled: bool) -> Self {
        self.half_open_trial = enabled;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Reject knob values that would stall or spin the engine.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.request_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "request timeout must be greater than zero".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(AppError::ConfigError(
                "max attempts must be at least 1".into(),
            ));
        }
        if self.overload_max_attempts == 0 {
            return Err(AppError::ConfigError(
                "server-overload attempts must be at least 1".into(),
            ));
        }
        if self.breaker_threshold == 0 {
            return Err(AppError::ConfigError(
                "circuit breaker threshold must be at least 1".into(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(AppError::ConfigError(
                "checkpoint interval must be at least 1".into(),
            ));
        }
        if let Some(cap) = self.backoff_cap
            && cap < self.backoff_base
        {
            return Err(AppError::ConfigError(format!(
                "backoff cap ({}s) is below the backoff base ({}s)",
                cap.as_secs(),
                self.backoff_base.as_secs()
            )));
        }
        Ok(())
    }
}

/// Renders a work item into its detail-page URL by substituting `{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
}

impl UrlTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, AppError> {
        let template = template.into();
        if !template.contains("{id}") {
            return Err(AppError::ConfigError(format!(
                "URL template '{template}' has no {{id}} placeholder"
            )));
        }
        Ok(Self { template })
    }

    /// Text identifiers are percent-encoded so reserved characters cannot
    /// change which page is requested.
    pub fn render(&self, item: &WorkItem) -> String {
        let id = match item {
            WorkItem::Number(n) => n.to_string(),
            WorkItem::Text(s) => form_urlencoded::byte_serialize(s.as_bytes()).collect(),
        };
        self.template.replace("{id}", &id)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

impl Default for UrlTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_URL_TEMPLATE.to_string(),
        }
    }
}
