use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::observation::{MatchObservation, MatchResult};

pub type BatchItemId = u64;

/// Per-item recognition state.
///
/// `Queued -> Running -> {Done | NeedsManualResult | Error}`; a manual
/// decision moves `NeedsManualResult` to `Done`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BatchStatus {
    Queued,
    Running,
    NeedsManualResult,
    Done,
    Error,
}

impl BatchStatus {
    /// No further automatic processing will happen
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::NeedsManualResult)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::NeedsManualResult => "needsManualResult",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// User answer to a manual-resolution prompt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ManualDecision {
    Victory,
    Defeat,
    Skip,
}

impl ManualDecision {
    pub fn result(&self) -> Option<MatchResult> {
        match self {
            Self::Victory => Some(MatchResult::Victory),
            Self::Defeat => Some(MatchResult::Defeat),
            Self::Skip => None,
        }
    }
}

impl fmt::Display for ManualDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Victory => write!(f, "victory"),
            Self::Defeat => write!(f, "defeat"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

impl std::str::FromStr for ManualDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v" | "victory" => Ok(Self::Victory),
            "d" | "defeat" => Ok(Self::Defeat),
            "s" | "skip" => Ok(Self::Skip),
            other => Err(format!("unknown decision: {}", other)),
        }
    }
}

/// One uploaded file's progress through recognition
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchItem {
    pub id: BatchItemId,
    pub file_label: String,
    pub status: BatchStatus,
    pub observation: Option<MatchObservation>,
    pub error_message: Option<String>,
    pub manual_decision: Option<ManualDecision>,
    pub enqueued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchItem {
    pub fn new(id: BatchItemId, file_label: impl Into<String>) -> Self {
        Self {
            id,
            file_label: file_label.into(),
            status: BatchStatus::Queued,
            observation: None,
            error_message: None,
            manual_decision: None,
            enqueued_at: Utc::now(),
            completed_at: None,
        }
    }

    pub(crate) fn finish(&mut self, status: BatchStatus) {
        self.status = status;
        if matches!(status, BatchStatus::Done | BatchStatus::Error) {
            self.completed_at = Some(Utc::now());
        }
    }
}
