//! HTTP ingestion server (SPEC_FULL §4.5): `serve` runs a long-lived
//! axum service alongside the hook-driven CLI, grounded on
//! `ConaryLabs-Mira/src/api/http/router.rs`'s route composition and
//! `handlers.rs`'s health-check shape. The teacher has no HTTP surface
//! at all — every command is a short-lived hook invocation that opens
//! its own SQLite connection and exits. SPEC_FULL needs something that
//! can stay resident, hold the Message Router's consumer task, and
//! take ingestion traffic from something other than a Claude Code hook.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db;
use crate::error::MemError;
use crate::router::{IngestMessage, RouterHandle};

#[derive(Clone)]
pub struct AppState {
    pub router: RouterHandle,
}

impl IntoResponse for MemError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, MemError>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    pending: i64,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        pending: state.router.pending(),
    })
}

#[derive(Deserialize)]
struct PromptBody {
    session_id: String,
    cwd: String,
    prompt: Option<String>,
}

#[derive(Serialize)]
struct PromptResponse {
    session_row_id: i64,
    prompt_number: i64,
}

async fn prompt_handler(Json(body): Json<PromptBody>) -> ApiResult<PromptResponse> {
    let project = db::project_from_cwd(&body.cwd);
    let conn = db::open_db()?;
    let (session_row_id, _was_created) =
        db::create_or_get_session(&conn, &body.session_id, &project, body.prompt.as_deref())?;
    let prompt_number = db::increment_prompt_counter(&conn, &body.session_id)?;
    if body.prompt.is_some() {
        db::save_prompt(&conn, &body.session_id, prompt_number, body.prompt.as_deref())?;
    }
    Ok(Json(PromptResponse {
        session_row_id,
        prompt_number,
    }))
}

#[derive(Deserialize)]
struct ObservationBody {
    session_id: String,
    cwd: String,
    tool_name: String,
    tool_input: Option<serde_json::Value>,
    tool_response: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct AcceptedResponse {
    accepted: bool,
    pending: i64,
}

async fn observation_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ObservationBody>,
) -> ApiResult<AcceptedResponse> {
    let project = db::project_from_cwd(&body.cwd);
    state.router.ingest(IngestMessage {
        session_id: body.session_id,
        project,
        tool_name: body.tool_name,
        tool_input: body.tool_input.map(|v| v.to_string()),
        tool_response: body.tool_response.map(|v| v.to_string()),
        cwd: Some(body.cwd),
    })?;
    Ok(Json(AcceptedResponse {
        accepted: true,
        pending: state.router.pending(),
    }))
}

#[derive(Deserialize)]
struct SummaryBody {
    session_id: String,
    cwd: String,
    transcript_path: Option<String>,
    last_assistant_message: Option<String>,
}

#[derive(Serialize)]
struct SummaryResponse {
    summary_id: Option<i64>,
}

async fn summary_handler(Json(body): Json<SummaryBody>) -> Result<Json<SummaryResponse>, (StatusCode, String)> {
    let summary_id = crate::summarize::run_summary(
        body.session_id,
        body.cwd,
        body.transcript_path,
        body.last_assistant_message,
    )
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(SummaryResponse { summary_id }))
}

#[derive(Deserialize)]
struct CompleteBody {
    session_id: String,
    status: String,
}

async fn complete_handler(Json(body): Json<CompleteBody>) -> ApiResult<AcceptedResponse> {
    let conn = db::open_db()?;
    db::update_session_status(&conn, &body.session_id, &body.status)?;
    Ok(Json(AcceptedResponse {
        accepted: true,
        pending: 0,
    }))
}

#[derive(Deserialize)]
struct ContextQuery {
    cwd: String,
    format: Option<String>,
}

async fn context_handler(Query(q): Query<ContextQuery>) -> Result<String, (StatusCode, String)> {
    let format = q.format.as_deref().unwrap_or("index");
    crate::context::build_context(&q.cwd, false, format)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/prompt", post(prompt_handler))
        .route("/observation", post(observation_handler))
        .route("/summary", post(summary_handler))
        .route("/complete", post(complete_handler))
        .route("/context", get(context_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(port: u16) -> anyhow::Result<()> {
    crate::tracing_init::init();

    let router_handle = crate::router::spawn();
    let state = Arc::new(AppState { router: router_handle });
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "claude-mem http server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
