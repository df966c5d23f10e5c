//! Process-wide configuration snapshot, captured once at startup.
//!
//! Generalizes the teacher's scattered `std::env::var` call sites
//! (`db.rs::db_path`, `context.rs::load_config`, `log.rs::log_path`) into
//! one struct so later code never re-reads the environment mid-request.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub model_dir: PathBuf,
    pub port: u16,
    pub skip_tools: Vec<String>,
    pub batch_window_ms: u64,
    pub backend: ModelBackend,
    pub gen_model: String,
    pub embed_model: String,
    pub gen_dtype: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelBackend {
    Remote,
    Local,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("REMEM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".claude-mem")
            });

        let db_path = std::env::var("DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("memory.db"));

        let model_dir = std::env::var("CLAUDE_MEM_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let port: u16 = std::env::var("CLAUDE_MEM_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3456);

        let skip_tools = env_string(
            "CLAUDE_MEM_SKIP_TOOLS",
            "TodoRead,TodoWrite,LS",
        )
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

        let batch_window_ms: u64 = env_string("CLAUDE_MEM_BATCH_WINDOW_MS", "3000")
            .parse()
            .unwrap_or(3000);

        let backend = match std::env::var("CLAUDE_MEM_BACKEND").ok().as_deref() {
            Some("local") => ModelBackend::Local,
            _ => ModelBackend::Remote,
        };

        Config {
            data_dir,
            db_path,
            model_dir,
            port,
            skip_tools,
            batch_window_ms,
            backend,
            gen_model: env_string("CLAUDE_MEM_GEN_MODEL", "claude-sonnet-4-5-20250929"),
            embed_model: env_string("CLAUDE_MEM_EMBED_MODEL", "BAAI/bge-small-en-v1.5"),
            gen_dtype: env_string("CLAUDE_MEM_GEN_DTYPE", "f32"),
        }
    }
}
