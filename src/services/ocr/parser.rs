use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::models::observation::{MatchResult, PlayerStats};

static MATCH_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmatch\s*id\b\s*[:#]?\s*([A-Za-z0-9]+)").unwrap());

static RESULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(victory|defeat)\b").unwrap());

// score, kills/deaths/assists, damage, damage share %
static STAT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d[\d,]*)\s+(\d+)\s*/\s*(\d+)\s*/\s*(\d+)\s+(\d[\d,]*)\s+(\d{1,3}(?:\.\d+)?)\s*%")
        .unwrap()
});

/// Extract the match identifier
/// Expected format: "Match ID: 8F3KQ2" (label case-insensitive, colon optional)
/// Returns the identifier verbatim
pub fn extract_match_id(text: &str) -> Option<String> {
    MATCH_ID_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse the banner outcome
/// Whole-word, case-insensitive VICTORY or DEFEAT; the earliest one wins
pub fn parse_match_result(text: &str) -> Option<MatchResult> {
    let token = RESULT_RE.captures(text)?.get(1)?.as_str();

    if token.eq_ignore_ascii_case("victory") {
        Some(MatchResult::Victory)
    } else {
        Some(MatchResult::Defeat)
    }
}

/// Parse the owner's stat line
/// Expected layout: "<score> <kills>/<deaths>/<assists> <damage> <share>%"
/// with any whitespace (including newlines) between fields.
///
/// When `name` occurs in the text, parsing starts after its first
/// occurrence. Returns `None` unless every field parses.
pub fn parse_stat_line(text: &str, owner_uid: &str, name: &str) -> Option<PlayerStats> {
    let body = &text[anchor_after_name(text, name)..];
    let caps = STAT_LINE_RE.captures(body)?;

    let score = parse_grouped(caps.get(1)?.as_str())?;
    let kills = caps.get(2)?.as_str().parse().ok()?;
    let deaths = caps.get(3)?.as_str().parse().ok()?;
    let assists = caps.get(4)?.as_str().parse().ok()?;
    let damage = parse_grouped(caps.get(5)?.as_str())?;
    let damage_share: f64 = caps.get(6)?.as_str().parse().ok()?;

    if !validate_damage_share(damage_share) {
        return None;
    }

    Some(PlayerStats {
        owner_uid: owner_uid.to_string(),
        name: name.to_string(),
        score,
        kills,
        deaths,
        assists,
        damage,
        damage_share,
    })
}

/// Byte offset just past the first case-insensitive occurrence of `name`, or 0
fn anchor_after_name(text: &str, name: &str) -> usize {
    let name = name.trim();
    if name.is_empty() {
        return 0;
    }

    RegexBuilder::new(&regex::escape(name))
        .case_insensitive(true)
        .build()
        .ok()
        .and_then(|re| re.find(text))
        .map(|m| m.end())
        .unwrap_or(0)
}

/// Integer with optional thousands separators: "12,345"
fn parse_grouped(raw: &str) -> Option<u64> {
    raw.replace(',', "").parse().ok()
}

/// Validate damage share is a percentage (0.0-100.0)
pub fn validate_damage_share(share: f64) -> bool {
    (0.0..=100.0).contains(&share)
}
