//! Error taxonomy for the memory service (SPEC_FULL §7).
//!
//! Library code returns `MemError` so callers can match on kind; CLI
//! commands and HTTP/MCP handlers flatten it through `anyhow` or map it
//! to a status code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("model error: {0}")]
    Model(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("canceled")]
    Canceled,

    #[error("router error: {0}")]
    Router(String),

    /// Catch-all for the `anyhow::Result` boundary the store/search
    /// layer (`db::*`, `search::*`) is built on — `http.rs` handlers
    /// need a `MemError` to report a status code, but most store
    /// functions predate this taxonomy and still return `anyhow::Error`.
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl MemError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn router(msg: impl Into<String>) -> Self {
        Self::Router(msg.into())
    }

    /// HTTP status code per the §7 propagation policy.
    pub fn status_code(&self) -> u16 {
        match self {
            MemError::Validation(_) => 400,
            MemError::NotFound(_) => 404,
            MemError::Store(_) => 500,
            MemError::Model(_) => 500,
            MemError::Parse(_) => 200, // acknowledged-with-nothing-to-store, not an error
            MemError::Canceled => 499,
            MemError::Router(_) => 503,
            MemError::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, MemError>;
