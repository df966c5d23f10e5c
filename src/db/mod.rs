pub mod dedup;
pub mod migrations;
pub mod query;

// Re-export query functions so callers can still use `db::query_observations` etc.
pub use dedup::*;
pub use query::*;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub memory_session_id: String,
    pub r#type: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    pub facts: Option<String>,
    pub concepts: Option<String>,
    pub files_read: Option<String>,
    pub files_modified: Option<String>,
    pub discovery_tokens: Option<i64>,
    pub created_at: String,
    pub created_at_epoch: i64,
    pub project: Option<String>,
    pub status: String,
    pub last_accessed_epoch: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    pub memory_session_id: String,
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub created_at_epoch: i64,
    pub project: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub external_session_id: String,
    pub project: String,
    pub user_prompt: Option<String>,
    pub started_at_epoch: i64,
    pub completed_at_epoch: Option<i64>,
    pub status: String,
    pub prompt_counter: i64,
}

pub fn project_from_cwd(cwd: &str) -> String {
    Path::new(cwd)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| cwd.to_string())
}

pub fn db_path() -> PathBuf {
    let data_dir = std::env::var("REMEM_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude-mem")
        });
    std::env::var("DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("memory.db"))
}

pub fn open_db() -> Result<Connection> {
    open_db_at(&db_path())
}

pub fn open_db_at(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    apply_pragmas(&conn)?;
    ensure_core_schema(&conn)?;
    ensure_pending_table(&conn)?;
    migrations::apply_pending(&conn)?;
    Ok(conn)
}

/// In-memory store for tests — same pragmas and schema path as the real
/// database, minus the filesystem side effects.
pub fn open_db_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    apply_pragmas(&conn)?;
    ensure_core_schema(&conn)?;
    ensure_pending_table(&conn)?;
    migrations::apply_pending(&conn)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;
         PRAGMA cache_size=-65536;
         PRAGMA temp_store=MEMORY;",
    )?;
    Ok(())
}

fn ensure_core_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sdk_sessions (
            id INTEGER PRIMARY KEY,
            content_session_id TEXT UNIQUE NOT NULL,
            memory_session_id TEXT NOT NULL,
            project TEXT,
            user_prompt TEXT,
            started_at TEXT,
            started_at_epoch INTEGER,
            completed_at_epoch INTEGER,
            status TEXT DEFAULT 'active',
            prompt_counter INTEGER DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS user_prompts (
            id INTEGER PRIMARY KEY,
            content_session_id TEXT NOT NULL,
            prompt_number INTEGER NOT NULL,
            prompt_text TEXT,
            created_at TEXT,
            created_at_epoch INTEGER,
            UNIQUE(content_session_id, prompt_number)
        );

        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY,
            memory_session_id TEXT NOT NULL,
            project TEXT,
            type TEXT NOT NULL,
            title TEXT,
            subtitle TEXT,
            narrative TEXT,
            facts TEXT,
            concepts TEXT,
            files_read TEXT,
            files_modified TEXT,
            prompt_number INTEGER,
            created_at TEXT,
            created_at_epoch INTEGER,
            discovery_tokens INTEGER DEFAULT 0,
            status TEXT DEFAULT 'active',
            last_accessed_epoch INTEGER,
            embedding BLOB
        );

        CREATE TABLE IF NOT EXISTS session_summaries (
            id INTEGER PRIMARY KEY,
            memory_session_id TEXT NOT NULL,
            project TEXT,
            request TEXT,
            investigated TEXT,
            learned TEXT,
            completed TEXT,
            next_steps TEXT,
            notes TEXT,
            prompt_number INTEGER,
            created_at TEXT,
            created_at_epoch INTEGER,
            discovery_tokens INTEGER DEFAULT 0
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
            title, subtitle, narrative, facts, concepts,
            content='observations',
            content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS observations_ai AFTER INSERT ON observations BEGIN
            INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts)
            VALUES (new.id, new.title, new.subtitle, new.narrative, new.facts, new.concepts);
        END;

        CREATE TRIGGER IF NOT EXISTS observations_ad AFTER DELETE ON observations BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts, concepts)
            VALUES ('delete', old.id, old.title, old.subtitle, old.narrative, old.facts, old.concepts);
        END;

        CREATE TRIGGER IF NOT EXISTS observations_au AFTER UPDATE ON observations BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts, concepts)
            VALUES ('delete', old.id, old.title, old.subtitle, old.narrative, old.facts, old.concepts);
            INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts)
            VALUES (new.id, new.title, new.subtitle, new.narrative, new.facts, new.concepts);
        END;

        CREATE VIRTUAL TABLE IF NOT EXISTS summaries_fts USING fts5(
            request, investigated, learned, completed, next_steps, notes,
            content='session_summaries',
            content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS summaries_ai AFTER INSERT ON session_summaries BEGIN
            INSERT INTO summaries_fts(rowid, request, investigated, learned, completed, next_steps, notes)
            VALUES (new.id, new.request, new.investigated, new.learned, new.completed, new.next_steps, new.notes);
        END;

        CREATE TRIGGER IF NOT EXISTS summaries_ad AFTER DELETE ON session_summaries BEGIN
            INSERT INTO summaries_fts(summaries_fts, rowid, request, investigated, learned, completed, next_steps, notes)
            VALUES ('delete', old.id, old.request, old.investigated, old.learned, old.completed, old.next_steps, old.notes);
        END;

        CREATE TRIGGER IF NOT EXISTS summaries_au AFTER UPDATE ON session_summaries BEGIN
            INSERT INTO summaries_fts(summaries_fts, rowid, request, investigated, learned, completed, next_steps, notes)
            VALUES ('delete', old.id, old.request, old.investigated, old.learned, old.completed, old.next_steps, old.notes);
            INSERT INTO summaries_fts(rowid, request, investigated, learned, completed, next_steps, notes)
            VALUES (new.id, new.request, new.investigated, new.learned, new.completed, new.next_steps, new.notes);
        END;

        CREATE INDEX IF NOT EXISTS idx_observations_status ON observations(status);
        CREATE INDEX IF NOT EXISTS idx_observations_project_status
          ON observations(project, status, created_at_epoch DESC);
        CREATE INDEX IF NOT EXISTS idx_observations_created
          ON observations(created_at_epoch DESC);
        CREATE INDEX IF NOT EXISTS idx_summaries_project_created
          ON session_summaries(project, created_at_epoch DESC);

        CREATE TABLE IF NOT EXISTS summarize_cooldown (
            project TEXT PRIMARY KEY,
            last_summarize_epoch INTEGER NOT NULL,
            last_message_hash TEXT
        );",
    )?;
    Ok(())
}

fn ensure_pending_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS pending_observations (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL,
            project TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            tool_input TEXT,
            tool_response TEXT,
            cwd TEXT,
            created_at_epoch INTEGER NOT NULL,
            claimed_by TEXT,
            claimed_at_epoch INTEGER
        )",
    )?;
    Ok(())
}

// --- Session lifecycle (spec §4.1 naming) ---

/// `CreateOrGetSession` — collapses concurrent hook invocations for the
/// same external session id onto one row.
pub fn create_or_get_session(
    conn: &Connection,
    external_session_id: &str,
    project: &str,
    user_prompt: Option<&str>,
) -> Result<(i64, bool)> {
    let now = chrono::Utc::now();
    let memory_session_id = format!("mem-{}", truncate_str(external_session_id, 8));

    let changed = conn.execute(
        "INSERT INTO sdk_sessions
         (content_session_id, memory_session_id, project, user_prompt, started_at, started_at_epoch, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')
         ON CONFLICT(content_session_id) DO NOTHING",
        params![
            external_session_id,
            memory_session_id,
            project,
            user_prompt,
            now.to_rfc3339(),
            now.timestamp(),
        ],
    )?;

    let id: i64 = conn.query_row(
        "SELECT id FROM sdk_sessions WHERE content_session_id = ?1",
        params![external_session_id],
        |row| row.get(0),
    )?;

    Ok((id, changed == 1))
}

pub fn get_session_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<Session>> {
    let result = conn.query_row(
        "SELECT id, content_session_id, project, user_prompt, started_at_epoch,
                completed_at_epoch, status, prompt_counter
         FROM sdk_sessions WHERE content_session_id = ?1",
        params![external_id],
        |row| {
            Ok(Session {
                id: row.get(0)?,
                external_session_id: row.get(1)?,
                project: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                user_prompt: row.get(3)?,
                started_at_epoch: row.get(4)?,
                completed_at_epoch: row.get(5)?,
                status: row.get(6)?,
                prompt_counter: row.get(7)?,
            })
        },
    );
    match result {
        Ok(s) => Ok(Some(s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// `IncrementPromptCounter` — one statement, no read-modify-write race
/// between concurrent `UserPromptSubmit` hooks for the same session.
pub fn increment_prompt_counter(conn: &Connection, external_session_id: &str) -> Result<i64> {
    conn.execute(
        "UPDATE sdk_sessions SET prompt_counter = prompt_counter + 1
         WHERE content_session_id = ?1",
        params![external_session_id],
    )?;
    let count: i64 = conn.query_row(
        "SELECT prompt_counter FROM sdk_sessions WHERE content_session_id = ?1",
        params![external_session_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn update_session_status(conn: &Connection, external_session_id: &str, status: &str) -> Result<()> {
    if matches!(status, "completed" | "failed") {
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "UPDATE sdk_sessions SET status = ?1, completed_at_epoch = ?2 WHERE content_session_id = ?3",
            params![status, now, external_session_id],
        )?;
    } else {
        conn.execute(
            "UPDATE sdk_sessions SET status = ?1 WHERE content_session_id = ?2",
            params![status, external_session_id],
        )?;
    }
    Ok(())
}

/// Teacher's original upsert, kept for the hook commands that still
/// address sessions by `content_session_id` and want the derived
/// `memory_session_id` back in one call.
pub fn upsert_session(
    conn: &Connection,
    content_session_id: &str,
    project: &str,
    user_prompt: Option<&str>,
) -> Result<String> {
    let now = chrono::Utc::now();
    let memory_session_id = format!("mem-{}", truncate_str(content_session_id, 8));

    conn.execute(
        "INSERT INTO sdk_sessions
         (content_session_id, memory_session_id, project, user_prompt, started_at, started_at_epoch, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')
         ON CONFLICT(content_session_id) DO UPDATE SET
         prompt_counter = prompt_counter + 1",
        params![
            content_session_id,
            memory_session_id,
            project,
            user_prompt,
            now.to_rfc3339(),
            now.timestamp(),
        ],
    )?;

    let mid: String = conn.query_row(
        "SELECT memory_session_id FROM sdk_sessions WHERE content_session_id = ?1",
        params![content_session_id],
        |row| row.get(0),
    )?;
    Ok(mid)
}

pub fn save_prompt(
    conn: &Connection,
    external_session_id: &str,
    prompt_number: i64,
    prompt_text: Option<&str>,
) -> Result<i64> {
    let now = chrono::Utc::now();
    conn.execute(
        "INSERT INTO user_prompts (content_session_id, prompt_number, prompt_text, created_at, created_at_epoch)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(content_session_id, prompt_number) DO UPDATE SET prompt_text = ?3",
        params![
            external_session_id,
            prompt_number,
            prompt_text,
            now.to_rfc3339(),
            now.timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// --- Observation / summary writes ---

#[allow(clippy::too_many_arguments)]
pub fn insert_observation(
    conn: &Connection,
    memory_session_id: &str,
    project: &str,
    obs_type: &str,
    title: Option<&str>,
    subtitle: Option<&str>,
    narrative: Option<&str>,
    facts: Option<&str>,
    concepts: Option<&str>,
    files_read: Option<&str>,
    files_modified: Option<&str>,
    prompt_number: Option<i64>,
    discovery_tokens: i64,
) -> Result<i64> {
    let now = chrono::Utc::now();
    let created_at = now.to_rfc3339();
    let created_at_epoch = now.timestamp();

    conn.execute(
        "INSERT INTO observations \
         (memory_session_id, project, type, title, subtitle, narrative, \
          facts, concepts, files_read, files_modified, prompt_number, \
          created_at, created_at_epoch, discovery_tokens) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            memory_session_id, project, obs_type, title, subtitle, narrative,
            facts, concepts, files_read, files_modified, prompt_number,
            created_at, created_at_epoch, discovery_tokens
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub fn insert_summary(
    conn: &Connection,
    memory_session_id: &str,
    project: &str,
    request: Option<&str>,
    investigated: Option<&str>,
    learned: Option<&str>,
    completed: Option<&str>,
    next_steps: Option<&str>,
    notes: Option<&str>,
    prompt_number: Option<i64>,
    discovery_tokens: i64,
) -> Result<i64> {
    let now = chrono::Utc::now();
    let created_at = now.to_rfc3339();
    let created_at_epoch = now.timestamp();

    conn.execute(
        "INSERT INTO session_summaries \
         (memory_session_id, project, request, investigated, learned, completed, \
          next_steps, notes, prompt_number, \
          created_at, created_at_epoch, discovery_tokens) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            memory_session_id, project, request, investigated, learned, completed,
            next_steps, notes, prompt_number,
            created_at, created_at_epoch, discovery_tokens
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_observation_embedding(conn: &Connection, id: i64, embedding: &[f32]) -> Result<()> {
    let bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
    conn.execute(
        "UPDATE observations SET embedding = ?1 WHERE id = ?2",
        params![bytes, id],
    )?;
    Ok(())
}

pub fn get_observations_without_embeddings(conn: &Connection, limit: i64) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, COALESCE(title, '') || ' ' || COALESCE(narrative, '')
         FROM observations WHERE embedding IS NULL AND status = 'active'
         ORDER BY created_at_epoch DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn mark_stale_by_files(
    conn: &Connection,
    new_obs_id: i64,
    project: &str,
    files_modified: &[String],
) -> Result<usize> {
    if files_modified.is_empty() {
        return Ok(0);
    }
    let files_json = serde_json::to_string(files_modified)?;
    let count = conn.execute(
        "UPDATE observations SET status = 'stale'
         WHERE id != ?1 AND project = ?2 AND status = 'active'
           AND id IN (
             SELECT DISTINCT o.id FROM observations o, json_each(o.files_modified) AS old_f
             WHERE o.id != ?1 AND o.project = ?2 AND o.status = 'active'
               AND o.files_modified IS NOT NULL AND length(o.files_modified) > 2
               AND old_f.value IN (SELECT value FROM json_each(?3))
           )",
        params![new_obs_id, project, files_json],
    )?;
    Ok(count)
}

/// Mark observations as compressed (they won't appear in context loading).
pub fn mark_observations_compressed(conn: &Connection, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "UPDATE observations SET status = 'compressed' WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
        ids.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::types::ToSql>).collect();
    let refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
    let count = stmt.execute(refs.as_slice())?;
    Ok(count)
}

pub fn update_last_accessed(conn: &Connection, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let now = chrono::Utc::now().timestamp();
    let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "UPDATE observations SET last_accessed_epoch = ?1 WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    param_values.push(Box::new(now));
    for id in ids {
        param_values.push(Box::new(*id));
    }
    let refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
    stmt.execute(refs.as_slice())?;
    Ok(())
}

// --- Pending observation queue (router's durable companion) ---

#[derive(Debug, Clone)]
pub struct PendingObservation {
    pub id: i64,
    pub session_id: String,
    pub project: String,
    pub tool_name: String,
    pub tool_input: Option<String>,
    pub tool_response: Option<String>,
    pub cwd: Option<String>,
    pub created_at_epoch: i64,
}

pub fn enqueue_pending(
    conn: &Connection,
    session_id: &str,
    project: &str,
    tool_name: &str,
    tool_input: Option<&str>,
    tool_response: Option<&str>,
    cwd: Option<&str>,
) -> Result<i64> {
    let epoch = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO pending_observations \
         (session_id, project, tool_name, tool_input, tool_response, cwd, created_at_epoch) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![session_id, project, tool_name, tool_input, tool_response, cwd, epoch],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn dequeue_pending(conn: &Connection, session_id: &str) -> Result<Vec<PendingObservation>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, project, tool_name, tool_input, tool_response, cwd, created_at_epoch \
         FROM pending_observations WHERE session_id = ?1 ORDER BY id ASC"
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        Ok(PendingObservation {
            id: row.get(0)?,
            session_id: row.get(1)?,
            project: row.get(2)?,
            tool_name: row.get(3)?,
            tool_input: row.get(4)?,
            tool_response: row.get(5)?,
            cwd: row.get(6)?,
            created_at_epoch: row.get(7)?,
        })
    })?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

pub fn count_pending(conn: &Connection, session_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pending_observations WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Atomically claim up to `limit` unclaimed (or lease-expired) pending
/// rows for this session under `lease_owner`, FIFO. Completes the
/// teacher's `observe.rs`, which already called a `claim_pending` that
/// was never defined.
pub fn claim_pending(
    conn: &mut Connection,
    session_id: &str,
    limit: usize,
    lease_owner: &str,
    lease_secs: i64,
) -> Result<Vec<PendingObservation>> {
    let now = chrono::Utc::now().timestamp();
    let cutoff = now - lease_secs;
    let tx = conn.transaction()?;

    let ids: Vec<i64> = {
        let mut stmt = tx.prepare(
            "SELECT id FROM pending_observations
             WHERE session_id = ?1 AND (claimed_by IS NULL OR claimed_at_epoch < ?2)
             ORDER BY id ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![session_id, cutoff, limit as i64], |row| row.get(0))?;
        let mut ids = Vec::new();
        for r in rows {
            ids.push(r?);
        }
        ids
    };

    if ids.is_empty() {
        tx.commit()?;
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let update_sql = format!(
        "UPDATE pending_observations SET claimed_by = ?{}, claimed_at_epoch = ?{} WHERE id IN ({})",
        ids.len() + 1,
        ids.len() + 2,
        placeholders.join(", ")
    );
    {
        let mut stmt = tx.prepare(&update_sql)?;
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            ids.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::types::ToSql>).collect();
        param_values.push(Box::new(lease_owner.to_string()));
        param_values.push(Box::new(now));
        let refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
        stmt.execute(refs.as_slice())?;
    }

    let select_sql = format!(
        "SELECT id, session_id, project, tool_name, tool_input, tool_response, cwd, created_at_epoch
         FROM pending_observations WHERE id IN ({}) ORDER BY id ASC",
        placeholders.join(", ")
    );
    let result = {
        let mut stmt = tx.prepare(&select_sql)?;
        let param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            ids.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::types::ToSql>).collect();
        let refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), |row| {
            Ok(PendingObservation {
                id: row.get(0)?,
                session_id: row.get(1)?,
                project: row.get(2)?,
                tool_name: row.get(3)?,
                tool_input: row.get(4)?,
                tool_response: row.get(5)?,
                cwd: row.get(6)?,
                created_at_epoch: row.get(7)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        out
    };

    tx.commit()?;
    Ok(result)
}

pub fn release_pending_claims(conn: &Connection, lease_owner: &str) -> Result<usize> {
    let count = conn.execute(
        "UPDATE pending_observations SET claimed_by = NULL, claimed_at_epoch = NULL WHERE claimed_by = ?1",
        params![lease_owner],
    )?;
    Ok(count)
}

pub fn delete_pending_claimed(conn: &Connection, lease_owner: &str, ids: &[i64]) -> Result<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "DELETE FROM pending_observations WHERE claimed_by = ?1 AND id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(lease_owner.to_string())];
    for id in ids {
        param_values.push(Box::new(*id));
    }
    let refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
    Ok(stmt.execute(refs.as_slice())?)
}

pub fn delete_pending(conn: &Connection, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!("DELETE FROM pending_observations WHERE id IN ({})", placeholders.join(", "));
    let mut stmt = conn.prepare(&sql)?;
    let param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
        ids.iter().map(|id| Box::new(*id) as Box<dyn rusqlite::types::ToSql>).collect();
    let refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
    stmt.execute(refs.as_slice())?;
    Ok(())
}

// --- Summarize rate limiting ---

pub fn is_summarize_on_cooldown(conn: &Connection, project: &str, cooldown_secs: i64) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let result: Option<i64> = conn.query_row(
        "SELECT last_summarize_epoch FROM summarize_cooldown WHERE project = ?1",
        params![project],
        |row| row.get(0),
    ).ok();

    match result {
        Some(last_epoch) => Ok(now - last_epoch < cooldown_secs),
        None => Ok(false),
    }
}

pub fn is_duplicate_message(conn: &Connection, project: &str, message_hash: &str) -> Result<bool> {
    let result: Option<String> = conn.query_row(
        "SELECT last_message_hash FROM summarize_cooldown WHERE project = ?1",
        params![project],
        |row| row.get(0),
    ).ok().flatten();

    match result {
        Some(prev_hash) => Ok(prev_hash == message_hash),
        None => Ok(false),
    }
}

pub fn record_summarize(conn: &Connection, project: &str, message_hash: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO summarize_cooldown (project, last_summarize_epoch, last_message_hash)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(project) DO UPDATE SET
           last_summarize_epoch = ?2,
           last_message_hash = ?3",
        params![project, now, message_hash],
    )?;
    Ok(())
}

// --- Cleanup ---

pub fn cleanup_orphan_summaries(conn: &Connection) -> Result<usize> {
    let count = conn.execute(
        "DELETE FROM session_summaries
         WHERE memory_session_id LIKE 'mem-%'
           AND memory_session_id NOT IN (
             SELECT DISTINCT memory_session_id FROM observations
           )",
        [],
    )?;
    Ok(count)
}

pub fn cleanup_duplicate_summaries(conn: &Connection) -> Result<usize> {
    let count = conn.execute(
        "DELETE FROM session_summaries
         WHERE id NOT IN (
           SELECT MAX(id)
           FROM session_summaries
           GROUP BY memory_session_id, project
         )",
        [],
    )?;
    Ok(count)
}

pub fn cleanup_stale_pending(conn: &Connection) -> Result<usize> {
    let cutoff = chrono::Utc::now().timestamp() - 3600;
    let count = conn.execute(
        "DELETE FROM pending_observations WHERE created_at_epoch < ?1 AND claimed_by IS NULL",
        params![cutoff],
    )?;
    Ok(count)
}
