//! Post-processing: turn the model's text reply into an [`ExtractionOutcome`].
//!
//! Even when told "output ONLY the JSON object", chat models regularly wrap
//! the answer in ` ```json ... ``` ` fences or prepend a BOM. Those are
//! stripped before parsing. Anything that still does not parse as a JSON
//! object is reported as a parse failure in the payload rather than raised.

use crate::output::{ExtractionOutcome, ReceiptRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").unwrap());

/// Strip an outer Markdown fence and invisible leading characters.
pub fn clean_reply(input: &str) -> String {
    let trimmed = input.trim().trim_start_matches('\u{FEFF}').trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a model reply into a receipt record.
///
/// Never fails: a reply that is not a JSON object yields
/// [`ExtractionOutcome::ParseFailure`].
pub fn parse_reply(reply: &str) -> ExtractionOutcome {
    let cleaned = clean_reply(reply);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value @ Value::Object(_)) => match serde_json::from_value::<ReceiptRecord>(value) {
            Ok(record) => ExtractionOutcome::Record(record),
            Err(e) => {
                warn!("Model reply is an object but not a receipt record: {}", e);
                ExtractionOutcome::parse_failure()
            }
        },
        Ok(other) => {
            warn!("Model reply is JSON but not an object: {}", json_kind(&other));
            ExtractionOutcome::parse_failure()
        }
        Err(e) => {
            warn!(
                "Model reply is not valid JSON ({}); first 120 chars: {:?}",
                e,
                cleaned.chars().take(120).collect::<String>()
            );
            ExtractionOutcome::parse_failure()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
