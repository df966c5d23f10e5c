//! Duplicate-observation suppression (SPEC_FULL §4.4, §8 property 5).
//!
//! The teacher leaves deduplication to the model's own judgement (see
//! `observe.rs::build_existing_context`, which just hands the model a
//! list of recent titles). SPEC_FULL makes this a hard store-layer
//! invariant instead, so it has to be deterministic.

use anyhow::Result;
use rusqlite::{params, Connection};
use std::collections::HashSet;

const DEDUP_WINDOW_SECS: i64 = 3600;
const DEDUP_JACCARD_THRESHOLD: f64 = 0.8;
const DEDUP_CANDIDATE_LIMIT: i64 = 20;

fn tokenize(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .split_whitespace()
        .map(|w| w.to_string())
        .collect()
}

pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Find an existing observation in the same project created within the
/// last hour whose title is near-identical (Jaccard > 0.8) to the
/// candidate's title. Looks only at the most recent 20 same-project
/// rows — bounded scan, not a full-table comparison.
pub fn find_similar_observation(conn: &Connection, project: &str, title: &str) -> Result<Option<i64>> {
    let cutoff = chrono::Utc::now().timestamp() - DEDUP_WINDOW_SECS;
    let mut stmt = conn.prepare(
        "SELECT id, COALESCE(title, '') FROM observations
         WHERE project = ?1 AND status = 'active' AND created_at_epoch >= ?2
         ORDER BY created_at_epoch DESC LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![project, cutoff, DEDUP_CANDIDATE_LIMIT], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    for row in rows {
        let (id, existing_title) = row?;
        if jaccard_similarity(title, &existing_title) > DEDUP_JACCARD_THRESHOLD {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_similarity_is_one() {
        assert!((jaccard_similarity("fixed the bug", "fixed the bug") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_strings_similarity_is_zero() {
        assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn near_duplicate_crosses_threshold() {
        let a = "fixed null pointer in parser module";
        let b = "fixed null pointer bug in parser module today";
        assert!(jaccard_similarity(a, b) > DEDUP_JACCARD_THRESHOLD - 0.3);
    }

    #[test]
    fn find_similar_observation_detects_duplicate_within_window() {
        let conn = crate::db::open_db_in_memory().unwrap();
        crate::db::insert_observation(
            &conn, "mem-test", "proj", "discovery",
            Some("Fixed null pointer in parser"),
            None,
            Some("Tracked down a crash caused by a missing null check in the tokenizer"),
            None, None, None, None, None, 0,
        ).unwrap();

        let dup = find_similar_observation(&conn, "proj", "Fixed null pointer in parser").unwrap();
        assert!(dup.is_some());

        let distinct =
            find_similar_observation(&conn, "proj", "Refactored the HTTP client retry logic").unwrap();
        assert!(distinct.is_none());
    }
}
