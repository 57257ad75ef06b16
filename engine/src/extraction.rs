//! Structured record extraction from free-form agent output.
//!
//! Agents are asked to reply with a single JSON object but routinely wrap it
//! in prose, markdown fences, or both. Extraction tries, in order:
//!
//! ```text
//! raw text
//!   ├─ strict parse of the trimmed text          → Strict
//!   ├─ strip the first ``` fence, strict parse   → Fenced
//!   ├─ balanced-brace scan, first region that    → BalancedScan
//!   │  parses as an object wins
//!   └─ nothing parses                            → ExtractionFailure
//! ```
//!
//! The scan tracks brace depth and skips braces inside string literals, so a
//! nested record is always recovered whole. A region that fails to parse is
//! skipped in its entirety; the scan never falls back to one of its inner
//! fragments.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A generic structured record: the top-level JSON object an agent returned.
pub type Record = serde_json::Map<String, Value>;

/// Maximum number of characters of raw agent output kept on a failure.
pub const RAW_EXCERPT_CHARS: usize = 200;

/// Why a raw response could not be turned into a usable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Nothing but whitespace.
    Empty,
    /// No balanced `{ ... }` region anywhere in the text.
    NoStructuredRecord,
    /// Balanced regions were found but none of them parsed.
    InvalidJson,
    /// The text is valid JSON, but not an object.
    NotAnObject,
    /// The record parsed but does not have the phase's required fields.
    SchemaMismatch,
    /// Required fields are present but hold unusable values.
    InvalidValue,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::NoStructuredRecord => write!(f, "no_structured_record"),
            Self::InvalidJson => write!(f, "invalid_json"),
            Self::NotAnObject => write!(f, "not_an_object"),
            Self::SchemaMismatch => write!(f, "schema_mismatch"),
            Self::InvalidValue => write!(f, "invalid_value"),
        }
    }
}

/// Typed extraction failure with a bounded excerpt of the offending text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("extraction failed ({reason}): {detail}")]
pub struct ExtractionFailure {
    pub reason: FailureReason,
    pub detail: String,
    /// First [`RAW_EXCERPT_CHARS`] characters of the raw response.
    pub raw_excerpt: String,
}

impl ExtractionFailure {
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            raw_excerpt: String::new(),
        }
    }

    pub fn schema_mismatch(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::SchemaMismatch, detail)
    }

    pub fn invalid_value(detail: impl Into<String>) -> Self {
        Self::new(FailureReason::InvalidValue, detail)
    }

    /// Attach the raw response the failure came from.
    pub fn with_raw(mut self, raw: &str) -> Self {
        self.raw_excerpt = excerpt(raw, RAW_EXCERPT_CHARS);
        self
    }
}

/// Which extraction step produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Strict,
    Fenced,
    BalancedScan,
}

/// Extract a record from raw agent output.
pub fn extract_record(raw: &str) -> Result<Record, ExtractionFailure> {
    extract_with_method(raw).map(|(record, _)| record)
}

/// Extract a record and report which step recovered it.
pub fn extract_with_method(raw: &str) -> Result<(Record, ExtractionMethod), ExtractionFailure> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ExtractionFailure::new(FailureReason::Empty, "response is empty").with_raw(raw));
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(record)) => return Ok((record, ExtractionMethod::Strict)),
        Ok(other) => {
            return Err(ExtractionFailure::new(
                FailureReason::NotAnObject,
                format!("expected a JSON object, found {}", value_kind(&other)),
            )
            .with_raw(raw));
        }
        Err(_) => {}
    }

    if let Some(inner) = strip_fence(text) {
        match serde_json::from_str::<Value>(inner.trim()) {
            Ok(Value::Object(record)) => return Ok((record, ExtractionMethod::Fenced)),
            Ok(other) => {
                return Err(ExtractionFailure::new(
                    FailureReason::NotAnObject,
                    format!("fenced block holds {}, not an object", value_kind(&other)),
                )
                .with_raw(raw));
            }
            Err(_) => {}
        }
    }

    let regions = top_level_regions(text);
    if regions.is_empty() {
        return Err(ExtractionFailure::new(
            FailureReason::NoStructuredRecord,
            "no balanced object found",
        )
        .with_raw(raw));
    }

    let mut last_error = String::new();
    for region in &regions {
        match serde_json::from_str::<Value>(region) {
            Ok(Value::Object(record)) => return Ok((record, ExtractionMethod::BalancedScan)),
            Ok(_) => {}
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(ExtractionFailure::new(
        FailureReason::InvalidJson,
        format!(
            "{} balanced region(s) found, none parsed: {last_error}",
            regions.len()
        ),
    )
    .with_raw(raw))
}

/// Deserialize a record into a phase-specific type.
///
/// Missing or mistyped required fields become [`FailureReason::SchemaMismatch`].
pub fn decode<T: DeserializeOwned>(record: &Record) -> Result<T, ExtractionFailure> {
    serde_json::from_value(Value::Object(record.clone()))
        .map_err(|e| ExtractionFailure::schema_mismatch(e.to_string()))
}

/// Contents of the first markdown fence, with the language tag line dropped.
fn strip_fence(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_ticks = &text[open + 3..];
    let body_start = after_ticks.find('\n')? + 1;
    let body = &after_ticks[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Every top-level balanced `{ ... }` region, in order of appearance.
///
/// Quotes are only treated as string delimiters inside an object, so stray
/// quotes in surrounding prose do not disturb the scan. All delimiters are
/// ASCII, which keeps byte offsets on char boundaries.
fn top_level_regions(text: &str) -> Vec<&str> {
    let mut regions = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, byte) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    regions.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    regions
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// First `max_chars` characters of `text`, marking truncation with `...`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_object() {
        let (record, method) = extract_with_method(r#"  {"a": 1}  "#).unwrap();
        assert_eq!(method, ExtractionMethod::Strict);
        assert_eq!(record["a"], 1);
    }

    #[test]
    fn test_fenced_block_with_language_tag() {
        let raw = "Here you go:\n```json\n{\"winner\": \"a\"}\n```\nthanks";
        let (record, method) = extract_with_method(raw).unwrap();
        assert_eq!(method, ExtractionMethod::Fenced);
        assert_eq!(record["winner"], "a");
    }

    #[test]
    fn test_nested_record_recovered_whole() {
        let raw = r#"Analysis follows. {"outer": {"inner": {"deep": [1, {"x": 2}]}}, "score": 0.7} done."#;
        let (record, method) = extract_with_method(raw).unwrap();
        assert_eq!(method, ExtractionMethod::BalancedScan);
        assert_eq!(record["score"], 0.7);
        assert_eq!(record["outer"]["inner"]["deep"][1]["x"], 2);
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let raw = r#"note: {"text": "set {x} and } then \"{\"", "ok": true} trailing }"#;
        let record = extract_record(raw).unwrap();
        assert_eq!(record["ok"], true);
        assert_eq!(record["text"], "set {x} and } then \"{\"");
    }

    #[test]
    fn test_failed_region_skipped_not_inner_fragment() {
        // The first region is broken; its inner {"b": 1} must not be returned.
        let raw = r#"{"a": oops {"b": 1} } and then {"c": 3}"#;
        let record = extract_record(raw).unwrap();
        assert!(record.contains_key("c"));
        assert!(!record.contains_key("b"));
    }

    #[test]
    fn test_prose_quotes_do_not_break_scan() {
        let raw = r#"The judge said "pick one" and chose {"winner": "b"}"#;
        assert_eq!(extract_record(raw).unwrap()["winner"], "b");
    }

    #[test]
    fn test_empty_response() {
        let err = extract_record("   \n\t").unwrap_err();
        assert_eq!(err.reason, FailureReason::Empty);
    }

    #[test]
    fn test_non_object_json() {
        let err = extract_record(r#"[{"a": 1}]"#).unwrap_err();
        assert_eq!(err.reason, FailureReason::NotAnObject);
    }

    #[test]
    fn test_no_braces() {
        let err = extract_record("I think hypothesis A is better.").unwrap_err();
        assert_eq!(err.reason, FailureReason::NoStructuredRecord);
    }

    #[test]
    fn test_unbalanced_object() {
        let err = extract_record(r#"{"a": {"b": 1}"#).unwrap_err();
        assert_eq!(err.reason, FailureReason::NoStructuredRecord);
    }

    #[test]
    fn test_invalid_json_region() {
        let err = extract_record("result: {not json at all}").unwrap_err();
        assert_eq!(err.reason, FailureReason::InvalidJson);
        assert!(err.raw_excerpt.starts_with("result:"));
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let raw = "x".repeat(1_000);
        let err = extract_record(&raw).unwrap_err();
        assert_eq!(err.raw_excerpt.chars().count(), RAW_EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_multibyte_text_around_record() {
        let raw = "résumé → {\"ключ\": \"значение\"} ✓";
        assert_eq!(extract_record(raw).unwrap()["ключ"], "значение");
    }

    #[test]
    fn test_decode_missing_field_is_schema_mismatch() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Needs {
            required: String,
        }
        let record = extract_record(r#"{"other": 1}"#).unwrap();
        let err = decode::<Needs>(&record).unwrap_err();
        assert_eq!(err.reason, FailureReason::SchemaMismatch);
    }
}
