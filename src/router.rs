//! Message Router (SPEC_FULL §4.4): an in-process, single-consumer FIFO
//! that decouples the ingestion surface (`http.rs`) from the durable
//! pending queue and the AI flush. Grounded on
//! `ConaryLabs-Mira/src/api/ws/chat/message_router.rs`'s
//! channel-spawn-forward idiom — there it forwards operation events from
//! an `mpsc` channel onto a websocket; here it forwards ingested tool
//! events into `db::enqueue_pending` and wakes the flush worker. The
//! teacher never had a router at all: `observe.rs`'s hook commands write
//! straight to SQLite from the calling process. SPEC_FULL's always-on
//! `serve` command needs a queue in front of the store instead, since
//! many hook invocations can race to enqueue concurrently.

use crate::db;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// One unit of work handed to the router: a tool-use event to persist
/// to the durable pending queue under `session_id`.
#[derive(Debug)]
pub struct IngestMessage {
    pub session_id: String,
    pub project: String,
    pub tool_name: String,
    pub tool_input: Option<String>,
    pub tool_response: Option<String>,
    pub cwd: Option<String>,
}

enum RouterCommand {
    Ingest(IngestMessage),
    Shutdown(oneshot::Sender<()>),
}

/// Handle held by callers (the HTTP server) to submit work to the
/// router's single consumer task.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<RouterCommand>,
    pending: Arc<AtomicI64>,
}

impl RouterHandle {
    /// Enqueue a tool event. Returns immediately; the consumer task
    /// persists it to `pending_observations` in the background.
    pub fn ingest(&self, msg: IngestMessage) -> Result<(), crate::error::MemError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(RouterCommand::Ingest(msg))
            .map_err(|_| crate::error::MemError::router("router consumer has shut down"))
    }

    /// Number of messages submitted but not yet persisted.
    pub fn pending(&self) -> i64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Ask the consumer task to drain its queue and stop, waiting for
    /// its acknowledgement.
    pub async fn shutdown(&self) -> Result<(), crate::error::MemError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(RouterCommand::Shutdown(ack_tx))
            .map_err(|_| crate::error::MemError::router("router consumer has shut down"))?;
        ack_rx
            .await
            .map_err(|_| crate::error::MemError::router("router did not acknowledge shutdown"))
    }
}

/// Spawns the single consumer task and returns a cloneable handle to it.
/// The consumer opens its own `rusqlite::Connection` (SQLite connections
/// aren't `Send` across an await point the way the teacher's short-lived
/// CLI commands use them) and persists every `Ingest` message via
/// `db::enqueue_pending` before looping for the next message — FIFO,
/// one writer, no connection contention with concurrent HTTP handlers.
pub fn spawn() -> RouterHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<RouterCommand>();
    let pending = Arc::new(AtomicI64::new(0));
    let pending_for_task = pending.clone();

    tokio::task::spawn_blocking(move || {
        let conn = match db::open_db() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "router: failed to open store, consumer exiting");
                return;
            }
        };

        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                RouterCommand::Ingest(msg) => {
                    let result = db::enqueue_pending(
                        &conn,
                        &msg.session_id,
                        &msg.project,
                        &msg.tool_name,
                        msg.tool_input.as_deref(),
                        msg.tool_response.as_deref(),
                        msg.cwd.as_deref(),
                    );
                    pending_for_task.fetch_sub(1, Ordering::SeqCst);
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "router: enqueue failed");
                    }
                }
                RouterCommand::Shutdown(ack) => {
                    let _ = ack.send(());
                    break;
                }
            }
        }
    });

    RouterHandle { tx, pending }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ingest_then_shutdown_drains_queue() {
        std::env::set_var("REMEM_DATA_DIR", std::env::temp_dir().join(format!(
            "claude-mem-router-test-{}",
            std::process::id()
        )));
        let handle = spawn();
        handle
            .ingest(IngestMessage {
                session_id: "s1".to_string(),
                project: "proj".to_string(),
                tool_name: "Write".to_string(),
                tool_input: None,
                tool_response: None,
                cwd: None,
            })
            .unwrap();
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_after_consumer_exit_errs_instead_of_panicking() {
        let handle = spawn();
        handle.shutdown().await.unwrap();
        // Consumer task has exited; a second ingest must not panic.
        let second = handle.ingest(IngestMessage {
            session_id: "s2".to_string(),
            project: "proj".to_string(),
            tool_name: "Write".to_string(),
            tool_input: None,
            tool_response: None,
            cwd: None,
        });
        assert!(second.is_err());
    }
}
