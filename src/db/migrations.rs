//! Ordered schema migration ledger.
//!
//! The teacher's `ensure_schema_migrations` ran a fixed list of
//! `ALTER TABLE ... ADD COLUMN` statements on every startup and swallowed
//! "duplicate column" errors to stay idempotent — cheap, but it re-runs
//! already-applied statements forever and can't express anything beyond
//! adding nullable columns. This replaces it with an explicit version
//! ledger: each migration runs at most once, recorded in
//! `schema_migrations`.

use anyhow::Result;
use rusqlite::Connection;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// `ensure_core_schema` already creates every table/column/index at its
/// current shape via `CREATE TABLE IF NOT EXISTS`, so these migrations
/// only do work against a database created by an older binary. Each
/// entry must tolerate running against a database where the column
/// already exists (fresh installs) — `ALTER TABLE ADD COLUMN` erroring on
/// that is treated as already-applied, not as a failure.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "observations_status_and_last_accessed",
        sql: "ALTER TABLE observations ADD COLUMN status TEXT DEFAULT 'active';
              ALTER TABLE observations ADD COLUMN last_accessed_epoch INTEGER;",
    },
    Migration {
        version: 2,
        name: "summaries_investigated_and_notes",
        sql: "ALTER TABLE session_summaries ADD COLUMN investigated TEXT;
              ALTER TABLE session_summaries ADD COLUMN notes TEXT;",
    },
    Migration {
        version: 3,
        name: "observations_embedding_column",
        sql: "ALTER TABLE observations ADD COLUMN embedding BLOB;",
    },
    Migration {
        version: 4,
        name: "sessions_completed_at_epoch",
        sql: "ALTER TABLE sdk_sessions ADD COLUMN completed_at_epoch INTEGER;",
    },
    Migration {
        version: 5,
        name: "pending_observations_claim_columns",
        sql: "ALTER TABLE pending_observations ADD COLUMN claimed_by TEXT;
              ALTER TABLE pending_observations ADD COLUMN claimed_at_epoch INTEGER;",
    },
];

fn ensure_ledger(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at_epoch INTEGER NOT NULL
        )",
    )?;
    Ok(())
}

fn is_applied(conn: &Connection, version: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn apply_one(conn: &Connection, m: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in m.sql.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        if let Err(e) = tx.execute_batch(stmt) {
            if !e.to_string().contains("duplicate column") {
                return Err(e.into());
            }
        }
    }
    tx.execute(
        "INSERT INTO schema_migrations (version, name, applied_at_epoch) VALUES (?1, ?2, ?3)",
        rusqlite::params![m.version, m.name, chrono::Utc::now().timestamp()],
    )?;
    tx.commit()?;
    Ok(())
}

pub fn apply_pending(conn: &Connection) -> Result<()> {
    ensure_ledger(conn)?;
    for m in MIGRATIONS {
        if !is_applied(conn, m.version)? {
            apply_one(conn, m)?;
        }
    }
    Ok(())
}
