use serde::{Deserialize, Serialize};

use crate::models::roi::CropVariant;

/// Outcome printed on the results banner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchResult {
    Victory,
    Defeat,
}

impl std::fmt::Display for MatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Victory => write!(f, "victory"),
            Self::Defeat => write!(f, "defeat"),
        }
    }
}

/// One fully parsed stat line of the owner's row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerStats {
    pub owner_uid: String,
    pub name: String,
    pub score: u64,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage: u64,
    /// Percentage of team damage, 0-100
    pub damage_share: f64,
}

/// Parsed outcome of one screenshot.
///
/// The numeric fields are filled together from one `PlayerStats` or not
/// at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MatchObservation {
    pub match_id: Option<String>,
    pub result: Option<MatchResult>,
    pub score: Option<u64>,
    pub kills: Option<u32>,
    pub deaths: Option<u32>,
    pub assists: Option<u32>,
    pub damage: Option<u64>,
    pub damage_share: Option<f64>,
}

impl MatchObservation {
    pub fn with_stats(mut self, stats: &PlayerStats) -> Self {
        self.score = Some(stats.score);
        self.kills = Some(stats.kills);
        self.deaths = Some(stats.deaths);
        self.assists = Some(stats.assists);
        self.damage = Some(stats.damage);
        self.damage_share = Some(stats.damage_share);
        self
    }

    pub fn has_stats(&self) -> bool {
        self.score.is_some()
    }
}

/// OCR output of one (region, threshold) candidate
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecognitionAttempt {
    pub index: usize,
    pub variant: CropVariant,
    pub text: String,
}
