//! Pure functions that strip headers which must never reach the upstream
//! call or be replayed back to the local client (spec §4.2).
//!
//! Kept free of any I/O so they are trivially unit-testable and, per the
//! spec's round-trip law, idempotent: stripping a fixed set of names twice
//! removes nothing extra the second time.

use std::collections::HashMap;

const REQUEST_HOP_BY_HOP: &[&str] = &["host", "connection", "content-length"];

const RESPONSE_FORBIDDEN: &[&str] = &[
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "connection",
];

/// Strip headers the server must never forward upstream (§4.2,
/// "Request-header stripping").
pub fn strip_request_headers(headers: &mut HashMap<String, String>) {
    strip_case_insensitive(headers, REQUEST_HOP_BY_HOP);
}

/// Strip headers that would break re-chunking when replaying an upstream
/// response back to the local client (§4.2, "Response-header filtering").
pub fn strip_response_headers(headers: &mut HashMap<String, String>) {
    strip_case_insensitive(headers, RESPONSE_FORBIDDEN);
}

fn strip_case_insensitive(headers: &mut HashMap<String, String>, names: &[&str]) {
    let doomed: Vec<String> = headers
        .keys()
        .filter(|key| names.iter().any(|name| key.eq_ignore_ascii_case(name)))
        .cloned()
        .collect();
    for key in doomed {
        headers.remove(&key);
    }
}

/// If the filtered status is 200 and no `content-type` survives, synthesize
/// `text/event-stream` (§4.2, "Content-type salvage"). Many upstream SSE
/// responses arrive without an explicit type after filtering.
pub fn salvage_content_type(status: u16, headers: &mut HashMap<String, String>) {
    if status != 200 {
        return;
    }
    let has_content_type = headers.keys().any(|key| key.eq_ignore_ascii_case("content-type"));
    if !has_content_type {
        headers.insert("content-type".to_string(), "text/event-stream".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn strips_request_headers_case_insensitively() {
        let mut h = headers(&[
            ("Host", "evil.example"),
            ("Connection", "keep-alive"),
            ("Content-Length", "4"),
            ("Authorization", "Bearer x"),
        ]);
        strip_request_headers(&mut h);
        assert_eq!(h.len(), 1);
        assert!(h.contains_key("Authorization"));
    }

    #[test]
    fn strips_response_headers() {
        let mut h = headers(&[
            ("Transfer-Encoding", "chunked"),
            ("content-encoding", "gzip"),
            ("CONTENT-LENGTH", "10"),
            ("connection", "close"),
            ("x-request-id", "abc"),
        ]);
        strip_response_headers(&mut h);
        assert_eq!(h.len(), 1);
        assert!(h.contains_key("x-request-id"));
    }

    #[test]
    fn request_stripping_is_idempotent() {
        let mut h = headers(&[("host", "x"), ("connection", "y")]);
        strip_request_headers(&mut h);
        let once = h.clone();
        strip_request_headers(&mut h);
        assert_eq!(once, h);
    }

    #[test]
    fn salvages_content_type_for_200_with_none() {
        let mut h = HashMap::new();
        salvage_content_type(200, &mut h);
        assert_eq!(h.get("content-type").map(String::as_str), Some("text/event-stream"));
    }

    #[test]
    fn does_not_override_existing_content_type() {
        let mut h = headers(&[("content-type", "application/json")]);
        salvage_content_type(200, &mut h);
        assert_eq!(h.get("content-type").map(String::as_str), Some("application/json"));
    }

    #[test]
    fn does_not_salvage_non_200_status() {
        let mut h = HashMap::new();
        salvage_content_type(404, &mut h);
        assert!(h.get("content-type").is_none());
    }
}
