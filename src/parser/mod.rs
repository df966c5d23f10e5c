pub mod tool_call;
pub mod xml;

use xml::ParsedObservation;

/// Try the tolerant JSON tool-call shape first (what `model::remote`
/// returns when the API answered with a native `tool_use` block), then
/// fall back to the legacy XML dialect every prompt still documents as
/// the free-text fallback.
pub fn parse_observations(text: &str, tool_call: Option<&serde_json::Value>) -> Vec<ParsedObservation> {
    if let Some(call) = tool_call {
        let parsed = tool_call::parse_tool_call_observations(&call.to_string());
        if !parsed.is_empty() {
            return parsed;
        }
    }
    let from_json = tool_call::parse_tool_call_observations(text);
    if !from_json.is_empty() {
        return from_json;
    }
    xml::parse_observations(text)
}
