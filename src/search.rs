use anyhow::Result;
use rusqlite::Connection;

use crate::db::{self, Observation};
use crate::sanitize;

pub fn search(
    conn: &Connection,
    query: Option<&str>,
    project: Option<&str>,
    obs_type: Option<&str>,
    limit: i64,
    offset: i64,
    include_stale: bool,
) -> Result<Vec<Observation>> {
    let limit = sanitize::clamp_limit(Some(limit));
    match query {
        Some(q) if !q.trim().is_empty() => {
            let sanitized = sanitize::sanitize_fts_query(q);
            db::search_observations_fts(conn, &sanitized, project, obs_type, limit, offset, include_stale)
        }
        _ => {
            // No query — return recent observations filtered by project/type
            let types: Vec<&str> = obs_type.map_or_else(
                || vec!["bugfix", "feature", "refactor", "discovery", "decision", "change"],
                |t| vec![t],
            );
            let proj = project.unwrap_or("");
            if proj.is_empty() {
                Ok(vec![])
            } else {
                db::query_observations(conn, proj, &types, limit)
            }
        }
    }
}

/// Decisions-only view: observations of type "decision", most recent
/// first, optionally scoped to a project. Grounds the MCP `decisions`
/// tool SPEC_FULL adds alongside the teacher's generic `search`.
pub fn decisions(conn: &Connection, project: Option<&str>, limit: i64) -> Result<Vec<Observation>> {
    let limit = sanitize::clamp_limit(Some(limit));
    let proj = project.unwrap_or("");
    if proj.is_empty() {
        Ok(vec![])
    } else {
        db::query_observations(conn, proj, &["decision"], limit)
    }
}

/// Find observations whose `files_read`/`files_modified` mention
/// `file_needle`. Grounds the MCP `find_by_file` tool.
pub fn find_by_file(
    conn: &Connection,
    project: &str,
    file_needle: &str,
    limit: i64,
) -> Result<Vec<Observation>> {
    let limit = sanitize::clamp_limit(Some(limit));
    let needle = sanitize::sanitize_string(file_needle, 500);
    db::find_observations_by_file(conn, project, &needle, limit)
}
