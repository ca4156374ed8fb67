use std::time::Duration;

use thiserror::Error;

use crate::models::batch::{BatchItemId, BatchStatus, ManualDecision};
use crate::models::config::CacheConfig;

/// Failure of a single pipeline stage.
///
/// Only `Decode` and `Aborted` end a batch item early. Everything else is
/// recovered by the orchestrator: worker failures fall through to the
/// whole-frame variants and OCR failures advance the attempt loop.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("row localization worker not ready after {0:?}")]
    CvInitTimeout(Duration),

    #[error("row localization worker did not answer within {0:?}")]
    WorkerTimeout(Duration),

    #[error("row localization worker failed: {0}")]
    Worker(String),

    #[error("text recognition failed: {0}")]
    Ocr(String),

    #[error("operation aborted")]
    Aborted,
}

impl RecognitionError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Failure of an upstream producer behind the request cache.
///
/// The class selects how long the cache replays the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("upstream rate limited: {0}")]
    RateLimited(String),

    #[error("upstream server error: {0}")]
    Server(String),

    #[error("upstream request failed: {0}")]
    Other(String),

    #[error("upstream request aborted")]
    Aborted,
}

impl UpstreamError {
    /// Classify an HTTP status that was not a success.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => Self::RateLimited(format!("HTTP {}: {}", status, body)),
            500..=599 => Self::Server(format!("HTTP {}: {}", status, body)),
            _ => Self::Other(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Cooldown during which the cache replays this failure, `None` if it
    /// must never be cached.
    pub fn cooldown(&self, policy: &CacheConfig) -> Option<Duration> {
        match self {
            Self::RateLimited(_) => Some(Duration::from_millis(policy.rate_limited_cooldown_ms)),
            Self::Server(_) => Some(Duration::from_millis(policy.server_error_cooldown_ms)),
            Self::Other(_) => Some(Duration::from_millis(policy.other_cooldown_ms)),
            Self::Aborted => None,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(status.as_u16(), err.to_string()),
            None if err.is_timeout() || err.is_connect() => Self::Server(err.to_string()),
            None => Self::Other(err.to_string()),
        }
    }
}

/// Misuse of the batch API, or an aborted run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("no batch item with id {0}")]
    UnknownItem(BatchItemId),

    #[error("batch item {0} is already being processed")]
    Busy(BatchItemId),

    #[error("batch item {id} is {status} and cannot be processed again")]
    Finished { id: BatchItemId, status: BatchStatus },

    #[error("batch item {id} is {status}, not waiting for a manual result")]
    NotAwaitingDecision { id: BatchItemId, status: BatchStatus },

    #[error("batch item {id} was already resolved as {previous}")]
    ConflictingDecision {
        id: BatchItemId,
        previous: ManualDecision,
    },

    #[error("processing aborted")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write observation: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize observation: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    NoConfigDir,

    #[error("config file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}
