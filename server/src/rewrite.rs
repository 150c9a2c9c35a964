//! The request-rewriting policy layer (spec §4.3): path repair, query-key
//! stripping, and a body rewrite that removes conflicting fields and
//! enforces a fixed safety-settings policy.

use indexmap::IndexMap;
use serde_json::{json, Value};
use session_bridge_protocol::QueryValue;

const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

/// Repair a `/models/models/` double segment, replacing the first
/// occurrence with `/models/`. Returns the repaired path and whether the
/// repair fired (so the caller can log it, per §4.3 step 1).
#[must_use]
pub fn repair_path(path: &str) -> (String, bool) {
    const DOUBLED: &str = "/models/models/";
    match path.find(DOUBLED) {
        Some(idx) => {
            let mut repaired = String::with_capacity(path.len());
            repaired.push_str(&path[..idx]);
            repaired.push_str("/models/");
            repaired.push_str(&path[idx + DOUBLED.len()..]);
            (repaired, true)
        }
        None => (path.to_string(), false),
    }
}

/// Remove the `key` query parameter so a caller-supplied key never reaches
/// upstream; authentication must come from the browser's cookies (§4.3
/// step 2).
pub fn strip_key_param(query_params: &mut IndexMap<String, QueryValue>) {
    query_params.shift_remove("key");
}

/// Apply the body rewrite (§4.3 step 3) if `body` parses as a JSON object.
/// A non-JSON (or non-object) body passes through unchanged.
#[must_use]
pub fn rewrite_body(body: Option<&str>) -> Option<String> {
    let body = body?;
    let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(body) else {
        return Some(body.to_string());
    };

    if matches!(map.get("tools"), Some(Value::Array(items)) if !items.is_empty()) {
        map.remove("tools");
    }

    map.insert(
        "safetySettings".to_string(),
        Value::Array(
            SAFETY_CATEGORIES
                .iter()
                .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
                .collect(),
        ),
    );

    Some(Value::Object(map).to_string())
}
