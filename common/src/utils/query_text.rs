//! Heuristics over free-text query expressions.

use std::sync::LazyLock;

use regex::Regex;

static SELECT_FIELDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)\bSELECT\s+(.+?)\s+FROM\b").expect("valid regex"));

static ALIAS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\s+AS\s+("?)([^"]+)"?\s*$"#).expect("valid regex"));

/// Columns used when nothing better can be derived.
pub const FALLBACK_COLUMNS: [&str; 2] = ["time", "value"];

/// Whether `expression` is a schema-discovery command (`SHOW ...` without a
/// `FROM` clause). Such queries carry no time range, so the backend must not
/// inject one.
pub fn is_schema_discovery(expression: &str) -> bool {
    let mut words = expression.split_whitespace();
    let starts_with_show = words
        .next()
        .is_some_and(|w| w.eq_ignore_ascii_case("SHOW"));
    starts_with_show && !words.any(|w| w.eq_ignore_ascii_case("FROM"))
}

/// Column names for an empty export, guessed from a `SELECT <fields> FROM`
/// clause. Always starts with `time`; falls back to `time,value`.
pub fn header_from_select(query: Option<&str>) -> Vec<String> {
    let fields = query
        .and_then(|q| SELECT_FIELDS.captures(q))
        .map(|caps| {
            split_fields(&caps[1])
                .into_iter()
                .map(column_name)
                .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case("time"))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if fields.is_empty() {
        return FALLBACK_COLUMNS.iter().map(|c| c.to_string()).collect();
    }
    std::iter::once("time".to_string()).chain(fields).collect()
}

/// Splits a select list on commas that are not inside parentheses.
fn split_fields(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts
}

fn column_name(field: &str) -> String {
    let field = field.trim();
    let name = match ALIAS.captures(field) {
        Some(caps) => caps[2].to_string(),
        None => field.to_string(),
    };
    name.trim().trim_matches('"').to_string()
}
