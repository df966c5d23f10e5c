//! Tolerant JSON tool-call parsing (SPEC_FULL §4.3). The teacher's model
//! always answered in the `<observation>`/`<summary>` XML dialect
//! (`parser::xml`); SPEC_FULL also has to accept a model that answers
//! with a `create_observation`/`create_summary` tool call, wrapped in a
//! fenced code block, bare, or as the `tool_call` field `model::remote`
//! already extracts from the Anthropic response's `tool_use` block.
//! Built on `serde_json::Value`, the same lenient-untrusted-JSON style
//! the teacher's own `HookInput` deserialization already uses.

use crate::parser::xml::ParsedObservation;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawObservation {
    r#type: Option<String>,
    title: Option<String>,
    subtitle: Option<String>,
    narrative: Option<String>,
    facts: Vec<String>,
    concepts: Vec<String>,
    files_read: Vec<String>,
    files_modified: Vec<String>,
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
    }
    trimmed
}

/// Accepts either `{"name": "create_observation", "input": {...}}`
/// (the shape `model::remote::call_http` builds from a `tool_use`
/// block) or a bare observation object/array.
pub fn parse_tool_call_observations(text: &str) -> Vec<ParsedObservation> {
    let cleaned = strip_code_fence(text);
    let Ok(value) = serde_json::from_str::<serde_json::Value>(cleaned) else {
        return vec![];
    };

    let items: Vec<serde_json::Value> = match &value {
        serde_json::Value::Object(obj) if obj.contains_key("name") => {
            match obj.get("input") {
                Some(serde_json::Value::Object(input)) if input.contains_key("observations") => {
                    input["observations"].as_array().cloned().unwrap_or_default()
                }
                Some(v) => vec![v.clone()],
                None => vec![],
            }
        }
        serde_json::Value::Array(arr) => arr.clone(),
        serde_json::Value::Object(_) => vec![value.clone()],
        _ => vec![],
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawObservation>(item).ok())
        .map(|raw| {
            let obs_type = raw
                .r#type
                .filter(|t| crate::parser::xml::OBSERVATION_TYPES.contains(&t.as_str()))
                .unwrap_or_else(|| "discovery".to_string());
            ParsedObservation {
                obs_type,
                title: raw.title,
                subtitle: raw.subtitle,
                facts: raw.facts,
                narrative: raw.narrative,
                concepts: raw.concepts,
                files_read: raw.files_read,
                files_modified: raw.files_modified,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json_object() {
        let text = r#"{"type": "bugfix", "title": "fixed the thing", "facts": ["a"], "concepts": [], "files_read": [], "files_modified": []}"#;
        let parsed = parse_tool_call_observations(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].obs_type, "bugfix");
    }

    #[test]
    fn parses_fenced_array() {
        let text = "```json\n[{\"type\": \"feature\", \"title\": \"added x\"}]\n```";
        let parsed = parse_tool_call_observations(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title.as_deref(), Some("added x"));
    }

    #[test]
    fn unknown_type_falls_back_to_discovery() {
        let text = r#"{"type": "nonsense", "title": "t"}"#;
        let parsed = parse_tool_call_observations(text);
        assert_eq!(parsed[0].obs_type, "discovery");
    }

    #[test]
    fn garbage_input_never_panics() {
        assert!(parse_tool_call_observations("not json at all { [ }").is_empty());
        assert!(parse_tool_call_observations("").is_empty());
    }
}
