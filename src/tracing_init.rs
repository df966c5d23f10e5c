//! `tracing` subscriber init for the long-running daemons (`serve`,
//! `mcp-server`). Mirrors the teacher's existing
//! `tracing_subscriber::fmt().with_writer(std::io::stderr)` call in
//! `mcp.rs`, pulled into a shared helper both daemons call so stdout
//! stays protocol-clean (JSON-RPC frames on stdout, logs on stderr).

pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
