//! Retrieval scoring (SPEC_FULL §6). The teacher ranks purely by
//! recency within one project (`db/query.rs::search_observations_fts`'s
//! rank/age weighting, `context.rs`'s `ORDER BY created_at_epoch DESC`).
//! SPEC_FULL needs a cross-project candidate pool ranked by a composite
//! score instead — no teacher equivalent, these are new pure functions.

use crate::db::Observation;
use chrono::{DateTime, Utc};

const RECENCY_HALF_LIFE_DAYS: f64 = 2.0;
const SAME_PROJECT_BONUS: f64 = 0.1;
const EMBEDDING_BONUS: f64 = 0.15;
const FTS_WEIGHT: f64 = 1.0;
const CONCEPT_WEIGHT: f64 = 0.5;

fn kind_importance(kind: &str) -> f64 {
    match kind {
        "decision" => 0.8,
        "bugfix" => 0.7,
        "discovery" => 0.6,
        "feature" => 0.5,
        "refactor" => 0.4,
        "change" => 0.3,
        _ => 0.3,
    }
}

fn recency_decay(created_at_epoch: i64, now_epoch: i64) -> f64 {
    let age_days = (now_epoch - created_at_epoch).max(0) as f64 / 86400.0;
    (-std::f64::consts::LN_2 * age_days / RECENCY_HALF_LIFE_DAYS).exp()
}

fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

/// Proxy for `normalizedLexicalRank`: fraction of query tokens found in
/// the observation's title/subtitle/narrative, in `[0, 1]`.
fn normalized_lexical_rank(query: &str, obs: &Observation) -> f64 {
    let query_tokens: std::collections::HashSet<String> = tokenize(query).into_iter().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let haystack = format!(
        "{} {} {}",
        obs.title.as_deref().unwrap_or_default(),
        obs.subtitle.as_deref().unwrap_or_default(),
        obs.narrative.as_deref().unwrap_or_default(),
    );
    let hay_tokens: std::collections::HashSet<String> = tokenize(&haystack).into_iter().collect();
    let overlap = query_tokens.intersection(&hay_tokens).count();
    overlap as f64 / query_tokens.len() as f64
}

/// `JaccardSimilarity` (§4.1 glossary) applied to the query's requested
/// concept tags against the observation's stored concepts.
fn concept_overlap(query_concepts: &[String], obs: &Observation) -> f64 {
    let query_set: std::collections::HashSet<&str> =
        query_concepts.iter().map(|s| s.as_str()).collect();
    let obs_concepts: Vec<String> = obs
        .concepts
        .as_deref()
        .and_then(|c| serde_json::from_str::<Vec<String>>(c).ok())
        .unwrap_or_default();
    let obs_set: std::collections::HashSet<&str> = obs_concepts.iter().map(|s| s.as_str()).collect();

    if query_set.is_empty() && obs_set.is_empty() {
        return 1.0;
    }
    let union = query_set.union(&obs_set).count();
    if union == 0 {
        return 0.0;
    }
    query_set.intersection(&obs_set).count() as f64 / union as f64
}

/// `fileOverlap = |obsFiles ∩ cwdFiles| / |obsFiles|`, 0 if either side is empty.
fn file_overlap(cwd_files: &[String], obs: &Observation) -> f64 {
    let obs_files: Vec<String> = [&obs.files_read, &obs.files_modified]
        .into_iter()
        .flatten()
        .filter_map(|field| serde_json::from_str::<Vec<String>>(field).ok())
        .flatten()
        .collect();
    if obs_files.is_empty() || cwd_files.is_empty() {
        return 0.0;
    }
    let matched = obs_files.iter().filter(|f| cwd_files.contains(f)).count();
    matched as f64 / obs_files.len() as f64
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

pub struct ScoringContext<'a> {
    pub query: &'a str,
    pub query_files: &'a [String],
    pub query_concepts: &'a [String],
    pub query_embedding: Option<&'a [f32]>,
    pub caller_project: &'a str,
    pub now_epoch: i64,
}

/// Composite relevance score per §4.5:
/// `score = recency + kindImportance + similarity + fileOverlap + sameProjectBonus + embeddingBonus`.
/// `obs_embedding` is decoded by the caller from the observation's
/// `embedding BLOB` column — kept out of this pure-function signature so
/// scoring has no dependency on how the vector was stored.
pub fn score_observation(obs: &Observation, obs_embedding: Option<&[f32]>, ctx: &ScoringContext) -> f64 {
    let recency = recency_decay(obs.created_at_epoch, ctx.now_epoch);
    let kind = kind_importance(&obs.r#type);
    let similarity = normalized_lexical_rank(ctx.query, obs) * FTS_WEIGHT
        + concept_overlap(ctx.query_concepts, obs) * CONCEPT_WEIGHT;
    let files = file_overlap(ctx.query_files, obs);
    let same_project = if obs.project.as_deref() == Some(ctx.caller_project) {
        SAME_PROJECT_BONUS
    } else {
        0.0
    };
    let embedding_bonus = if obs_embedding.is_some() { EMBEDDING_BONUS } else { 0.0 };

    recency + kind + similarity + files + same_project + embedding_bonus
}

/// Decode the little-endian f32 blob stored by `db::update_observation_embedding`.
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Parses the `since` query parameter's grammar (§4.5): `today`,
/// `yesterday`, `Nd` (1–365), `Nw` (1–52), a 10- or 13-digit epoch, or
/// an ISO date string. Case-insensitive, whitespace-trimmed; anything
/// else (including out-of-range `Nd`/`Nw`) is `None`.
pub fn parse_since(input: &str, now: DateTime<Utc>) -> Option<i64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();

    if lower == "today" {
        return Some(now.date_naive().and_hms_opt(0, 0, 0)?.and_utc().timestamp());
    }
    if lower == "yesterday" {
        let yesterday = now.date_naive() - chrono::Duration::days(1);
        return Some(yesterday.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
    }

    if let Some(num_part) = lower.strip_suffix('d') {
        let n: i64 = num_part.parse().ok()?;
        return if (1..=365).contains(&n) {
            Some(now.timestamp() - n * 86400)
        } else {
            None
        };
    }
    if let Some(num_part) = lower.strip_suffix('w') {
        let n: i64 = num_part.parse().ok()?;
        return if (1..=52).contains(&n) {
            Some(now.timestamp() - n * 604800)
        } else {
            None
        };
    }

    if lower.len() == 10 && lower.chars().all(|c| c.is_ascii_digit()) {
        return lower.parse::<i64>().ok();
    }
    if lower.len() == 13 && lower.chars().all(|c| c.is_ascii_digit()) {
        return lower.parse::<i64>().ok().map(|ms| ms / 1000);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp());
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_since_accepts_relative_durations() {
        let now = Utc::now();
        let d = parse_since("7d", now).unwrap();
        assert_eq!(now.timestamp() - d, 7 * 86400);
        let w = parse_since("2w", now).unwrap();
        assert_eq!(now.timestamp() - w, 2 * 604800);
        assert!(parse_since("TODAY", now).is_some());
        assert!(parse_since(" yesterday ", now).is_some());
    }

    #[test]
    fn parse_since_rejects_garbage() {
        let now = Utc::now();
        assert!(parse_since("banana", now).is_none());
        assert!(parse_since("", now).is_none());
    }

    #[test]
    fn parse_since_rejects_out_of_range_bounds() {
        let now = Utc::now();
        assert!(parse_since("0d", now).is_none());
        assert!(parse_since("366d", now).is_none());
        assert!(parse_since("0w", now).is_none());
        assert!(parse_since("53w", now).is_none());
    }

    #[test]
    fn parse_since_accepts_epoch_and_iso_date() {
        let now = Utc::now();
        assert!(parse_since("1700000000", now).is_some());
        assert!(parse_since("1700000000000", now).is_some());
        assert!(parse_since("2024-01-15", now).is_some());
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }
}
