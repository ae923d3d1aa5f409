use std::fmt;

use thiserror::Error;

/// Run-level error types for Harvest.
///
/// Every variant here is fatal to a run: item-level failures are modelled
/// by [`FetchError`] and [`ParseError`] and never escape the retry loop.
#[derive(Error, Debug)]
pub enum AppError {
    /// The checkpoint file exists but cannot be read or decoded.
    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    /// The checkpoint was written for a different work-item list.
    #[error("Checkpoint mismatch: {0}")]
    CheckpointMismatch(String),

    /// The final dataset could not be written.
    #[error("Output error: {0}")]
    OutputError(String),

    /// The work-item document is missing or malformed.
    #[error("Input error: {0}")]
    InputError(String),

    /// A configuration value is out of range.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a single failed attempt, used to route retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Timeout, connection error, or an unexpected non-2xx status.
    Transient,
    /// HTTP 503/504: upstream is overloaded and needs a long quiet period.
    ServerOverload,
    /// Not worth retrying.
    Permanent,
    /// The page arrived but could not be turned into a record.
    Parse,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::ServerOverload => "server_overload",
            FailureClass::Permanent => "permanent",
            FailureClass::Parse => "parse",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified failure from a single page fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error (reset, refused, DNS).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// HTTP 503 or 504.
    #[error("Server overloaded (HTTP {0})")]
    ServerOverload(u16),

    /// Any other non-2xx status.
    #[error("HTTP {0}")]
    HttpStatus(u16),

    /// A failure that retrying cannot fix (e.g. a malformed URL).
    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::Timeout(_) | FetchError::NetworkError(_) | FetchError::HttpStatus(_) => {
                FailureClass::Transient
            }
            FetchError::ServerOverload(_) => FailureClass::ServerOverload,
            FetchError::Permanent(_) => FailureClass::Permanent,
        }
    }
}

/// The fetched page could not be parsed into record fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The page does not contain the expected detail markup.
    #[error("Missing content: {0}")]
    MissingContent(String),

    /// The markup was present but malformed.
    #[error("Malformed page: {0}")]
    Malformed(String),
}

/// Failure of one attempt at one item: either stage can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl AttemptError {
    /// Parse failures retry like transient fetch failures.
    pub fn class(&self) -> FailureClass {
        match self {
            AttemptError::Fetch(e) => e.class(),
            AttemptError::Parse(_) => FailureClass::Parse,
        }
    }
}
