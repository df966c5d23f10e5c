use anyhow::Result;
use serde::Deserialize;

use crate::db;
use crate::observe;
use crate::parser::xml::extract_field;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummarizeInput {
    session_id: Option<String>,
    cwd: Option<String>,
    transcript_path: Option<String>,
    last_assistant_message: Option<String>,
}

fn project_from_cwd(cwd: &str) -> String {
    std::path::Path::new(cwd)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| cwd.to_string())
}

fn extract_last_assistant_message(transcript_path: &str) -> Option<String> {
    let content = std::fs::read_to_string(transcript_path).ok()?;
    let mut last_assistant = None;

    for line in content.lines().rev() {
        let val: serde_json::Value = serde_json::from_str(line).ok()?;
        if val["type"].as_str() == Some("assistant") {
            let text_parts: Vec<&str> = val["message"]["content"]
                .as_array()?
                .iter()
                .filter_map(|c| {
                    if c["type"].as_str() == Some("text") {
                        c["text"].as_str()
                    } else {
                        None
                    }
                })
                .collect();
            if !text_parts.is_empty() {
                last_assistant = Some(text_parts.join("\n"));
                break;
            }
        }
    }
    last_assistant
}

pub struct ParsedSummary {
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
}

pub fn parse_summary(text: &str) -> Option<ParsedSummary> {
    // Check for skip
    if text.contains("<skip_summary") {
        return None;
    }

    let start = text.find("<summary>")?;
    let end = text.find("</summary>")?;
    let content = &text[start + "<summary>".len()..end];

    Some(ParsedSummary {
        request: extract_field(content, "request"),
        investigated: extract_field(content, "investigated"),
        learned: extract_field(content, "learned"),
        completed: extract_field(content, "completed"),
        next_steps: extract_field(content, "next_steps"),
        notes: extract_field(content, "notes"),
    })
}

/// Stop hook dispatcher: reads stdin once, hands it to a detached
/// `summarize-worker` child, and returns immediately — the Stop hook
/// must not block the session on an AI call. Mirrors the
/// stdin-forwarding pattern `observe.rs::flush_pending` already uses
/// for its own single-AI-call batch, generalized to a cross-process
/// spawn since the worker needs to keep running after the hook exits.
pub async fn summarize() -> Result<()> {
    use std::io::Write;

    let input = std::io::read_to_string(std::io::stdin())?;
    let bin = std::env::current_exe()?;

    let mut child = std::process::Command::new(bin)
        .arg("summarize-worker")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(input.as_bytes());
    }
    // Deliberately not awaited/waited on — the worker outlives this process.
    drop(child);

    crate::log::info("summarize", "dispatched to summarize-worker");
    Ok(())
}

pub async fn summarize_worker() -> Result<()> {
    let input = std::io::read_to_string(std::io::stdin())?;
    let hook: SummarizeInput = serde_json::from_str(&input)?;
    run_summary(
        hook.session_id
            .ok_or_else(|| anyhow::anyhow!("missing session_id"))?,
        hook.cwd.unwrap_or_else(|| ".".to_string()),
        hook.transcript_path,
        hook.last_assistant_message,
    )
    .await?;
    Ok(())
}

/// Core summarization pipeline, independent of how the caller obtained
/// its inputs (stdin hook payload in `summarize_worker`, an HTTP POST
/// body in `http::summary_handler`). Returns the inserted summary ID,
/// or `None` if the session was skipped as trivial or had nothing to
/// summarize.
pub async fn run_summary(
    session_id: String,
    cwd: String,
    transcript_path: Option<String>,
    last_assistant_message: Option<String>,
) -> Result<Option<i64>> {
    let timer = crate::log::Timer::start("summarize-worker", "");
    let project = project_from_cwd(&cwd);

    crate::log::info("summarize", &format!("project={} session={}", project, session_id));

    // Flush pending observation queue before summarizing
    match observe::flush_pending(&session_id, &project).await {
        Ok(n) => {
            if n > 0 {
                crate::log::info("summarize", &format!("flushed {} observations from queue", n));
            }
        }
        Err(e) => {
            crate::log::warn("summarize", &format!("flush failed (continuing): {}", e));
        }
    }

    // Get last assistant message
    let assistant_msg = last_assistant_message
        .or_else(|| transcript_path.as_deref().and_then(extract_last_assistant_message))
        .unwrap_or_default();

    if assistant_msg.is_empty() {
        crate::log::warn("summarize", "no assistant message, skipping");
        timer.done("no message");
        return Ok(None);
    }

    crate::log::info("summarize", &format!("message len={}B", assistant_msg.len()));

    // Truncate if too long
    let msg = if assistant_msg.len() > 12000 {
        assistant_msg[..12000].to_string()
    } else {
        assistant_msg
    };

    let user_message = format!(
        "Here is the assistant's last response from the session:\n\n{}",
        msg
    );

    let ai_start = std::time::Instant::now();
    let response = observe::call_model(&crate::prompts::summary_system(), &user_message).await?;
    let ai_ms = ai_start.elapsed().as_millis();
    crate::log::info("summarize", &format!("AI response {}ms {}B", ai_ms, response.text.len()));

    let Some(summary) = parse_summary(&response.text) else {
        crate::log::info("summarize", "session skipped (trivial)");
        timer.done("skipped");
        return Ok(None);
    };

    let conn = db::open_db()?;
    let memory_session_id = db::upsert_session(&conn, &session_id, &project, None)?;

    let usage = response.text.len() as i64 / 4;
    let summary_id = db::insert_summary(
        &conn,
        &memory_session_id,
        &project,
        summary.request.as_deref(),
        summary.investigated.as_deref(),
        summary.learned.as_deref(),
        summary.completed.as_deref(),
        summary.next_steps.as_deref(),
        summary.notes.as_deref(),
        None,
        usage,
    )?;

    let request_preview = summary.request.as_deref().unwrap_or("-");
    timer.done(&format!("~{}tok request=\"{}\"", usage, request_preview));
    Ok(Some(summary_id))
}
