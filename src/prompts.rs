//! Prompt text, loaded at compile time the way the teacher already does
//! (`include_str!("../prompts/observation.txt")` in `observe.rs`/
//! `summarize.rs`). `system.txt` is new — a shared observer-stance
//! preamble neither teacher prompt had, since the teacher sent `system`
//! straight from the per-command prompt constant.

pub const SYSTEM_PROMPT: &str = include_str!("../prompts/system.txt");
pub const OBSERVATION_PROMPT: &str = include_str!("../prompts/observation.txt");
pub const SUMMARY_PROMPT: &str = include_str!("../prompts/summary.txt");

pub fn observation_system() -> String {
    format!("{SYSTEM_PROMPT}\n\n{OBSERVATION_PROMPT}")
}

pub fn summary_system() -> String {
    format!("{SYSTEM_PROMPT}\n\n{SUMMARY_PROMPT}")
}
