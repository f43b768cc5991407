//! Sensitive-field redaction (§4.2).
//!
//! Two redaction paths share the same sensitive-key set: a recursive walk
//! over mapping-shaped JSON (request/response metadata) and a pattern-based
//! scrub of raw SQL text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Key fragments considered sensitive, matched case-insensitively.
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "pass",
    "token",
    "auth_token",
    "access_token",
    "refresh_token",
    "api_key",
    "secret",
    "private_key",
    "credit_card",
    "card_number",
    "cvv",
    "cvc",
    "ssn",
];

/// Headers that are always redacted regardless of the sensitive-key match.
pub const ALWAYS_REDACTED_HEADERS: &[&str] =
    &["authorization", "x-api-key", "x-auth-token", "cookie"];

const MAX_RECURSION_DEPTH: u32 = 5;
const MAX_STRING_LEN: usize = 1000;
const MAX_HEADER_VALUE_LEN: usize = 500;
const REDACTED: &str = "[REDACTED]";
const MAX_DEPTH_MARKER: &str = "[MAX_DEPTH_EXCEEDED]";
const TRUNCATED_SUFFIX: &str = "...[TRUNCATED]";
const CARD_REDACTED: &str = "[CARD-REDACTED]";

#[must_use]
pub fn is_sensitive_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|k| lowered.contains(k))
}

#[must_use]
pub fn is_always_redacted_header(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    ALWAYS_REDACTED_HEADERS.contains(&lowered.as_str())
}

/// Recursively redact a JSON value representing request/response metadata.
///
/// Keys matching [`is_sensitive_key`] have their value replaced wholesale.
/// Strings longer than 1000 chars are truncated with a marker. Recursion
/// deeper than 5 levels collapses to a marker rather than descending
/// further.
#[must_use]
pub fn redact_value(value: &Value, depth: u32) -> Value {
    if depth > MAX_RECURSION_DEPTH {
        return Value::String(MAX_DEPTH_MARKER.to_string());
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive_key(k) {
                    out.insert(k.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k.clone(), redact_value(v, depth + 1));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_value(item, depth + 1))
                .collect(),
        ),
        Value::String(s) => Value::String(truncate_string(s, MAX_STRING_LEN)),
        other => other.clone(),
    }
}

/// Redact a single header value. Headers in [`ALWAYS_REDACTED_HEADERS`] are
/// fully replaced; others are only truncated if long.
#[must_use]
pub fn redact_header(name: &str, value: &str) -> String {
    if is_always_redacted_header(name) {
        REDACTED.to_string()
    } else {
        truncate_string(value, MAX_HEADER_VALUE_LEN)
    }
}

fn truncate_string(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max).collect();
    format!("{truncated}{TRUNCATED_SUFFIX}")
}

/// Pattern catching `key=value` / `key='value'` assignment forms in SQL
/// text, case-insensitive over the sensitive-key alternation.
static SENSITIVE_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    let alternation = SENSITIVE_KEYS.join("|");
    Regex::new(&format!(
        r"(?i)\b({alternation})\s*=\s*('(?:[^'\\]|\\.)*'|[^\s,)]+)"
    ))
    .expect("sensitive-assignment pattern must compile")
});

/// 16-digit sequences (optionally grouped by spaces/dashes), treated as
/// credit-card numbers.
static CARD_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){16}\b").expect("card pattern must compile"));

/// Redact sensitive fragments from raw SQL text (§4.2, §8 S5).
///
/// Replaces `key=value` / `key='value'` assignments where `key` matches the
/// sensitive set with `key='[REDACTED]'`, and any 16-digit sequence with
/// `[CARD-REDACTED]`.
#[must_use]
pub fn redact_sql(sql: &str) -> String {
    let stripped_cards = CARD_NUMBER.replace_all(sql, CARD_REDACTED);
    SENSITIVE_ASSIGNMENT
        .replace_all(&stripped_cards, |caps: &regex::Captures<'_>| {
            format!("{}='[REDACTED]'", &caps[1])
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_sql_assignment_update() {
        let sql = "UPDATE users SET password='s3cret!' WHERE api_key='abc123' \
                    AND card_number='4111 1111 1111 1111'";
        let redacted = redact_sql(sql);
        assert!(redacted.contains("password='[REDACTED]'"));
        assert!(redacted.contains("api_key='[REDACTED]'"));
        assert!(redacted.contains(CARD_REDACTED));
        assert!(!redacted.contains("4111"));
    }

    #[test]
    fn redacts_unquoted_assignment() {
        let redacted = redact_sql("token=abcdef123 AND x=1");
        assert!(redacted.contains("token='[REDACTED]'"));
    }

    #[test]
    fn redact_value_replaces_sensitive_keys() {
        let value = json!({"password": "hunter2", "username": "bob"});
        let redacted = redact_value(&value, 0);
        assert_eq!(redacted["password"], "[REDACTED]");
        assert_eq!(redacted["username"], "bob");
    }

    #[test]
    fn redact_value_caps_recursion_depth() {
        let mut value = json!("leaf");
        for _ in 0..10 {
            value = json!({ "nested": value });
        }
        let redacted = redact_value(&value, 0);
        let as_str = redacted.to_string();
        assert!(as_str.contains(MAX_DEPTH_MARKER));
    }

    #[test]
    fn long_strings_are_truncated_with_marker() {
        let long = "a".repeat(2000);
        let value = json!({ "note": long });
        let redacted = redact_value(&value, 0);
        let note = redacted["note"].as_str().unwrap();
        assert!(note.len() < 2000);
        assert!(note.ends_with(TRUNCATED_SUFFIX));
    }

    #[test]
    fn always_redacted_headers() {
        assert_eq!(redact_header("Authorization", "Bearer xyz"), "[REDACTED]");
        assert_eq!(redact_header("Cookie", "session=abc"), "[REDACTED]");
        assert_eq!(redact_header("Content-Type", "application/json"), "application/json");
    }
}
