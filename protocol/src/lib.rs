//! Wire types for the control channel between the session-bridge server
//! plane and its browser-plane agent.
//!
//! Every message on the control channel is a single JSON text frame. This
//! crate owns the one true definition of that shape so the server and the
//! agent binaries can never drift apart on it.

mod ids;

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use ids::RequestIdGenerator;

/// Opaque identifier for one in-flight request, unique for the lifetime of
/// the server process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// HTTP method accepted from the local client and forwarded upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    /// Whether a request using this method may carry a body.
    #[must_use]
    pub fn allows_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        };
        f.write_str(s)
    }
}

/// A query parameter value: either a single string or a repeated key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl QueryValue {
    /// Flatten to the individual values this key carries, in order.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(value) => vec![value.as_str()],
            Self::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// A request built by the server plane and sent to the bound browser agent
/// for out-of-process execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub request_id: RequestId,
    pub method: Method,
    /// Suffix appended to the fixed upstream host; may or may not start
    /// with `/`.
    pub path: String,
    #[serde(default)]
    pub query_params: IndexMap<String, QueryValue>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// One event emitted by the browser agent for a specific `request_id`.
///
/// Internally tagged on `event_type` so unknown fields on any variant
/// round-trip untouched and an unrecognized tag decodes as [`Event::Unknown`]
/// instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    ResponseHeaders {
        request_id: RequestId,
        status: u16,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Chunk {
        request_id: RequestId,
        data: String,
    },
    StreamClose {
        request_id: RequestId,
    },
    Error {
        request_id: RequestId,
        status: u16,
        message: String,
    },
    /// Catch-all for any `event_type` this codec version does not know
    /// about. Decodes successfully so the socket is never killed by an
    /// unrecognized frame (spec §4.1); callers log and drop it.
    #[serde(other)]
    Unknown,
}

impl Event {
    /// The `request_id` this event belongs to, if any (`Unknown` has none).
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::ResponseHeaders { request_id, .. }
            | Self::Chunk { request_id, .. }
            | Self::StreamClose { request_id }
            | Self::Error { request_id, .. } => Some(request_id),
            Self::Unknown => None,
        }
    }

    /// Whether this event is a terminal event for its request (`stream_close`
    /// or `error`).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StreamClose { .. } | Self::Error { .. })
    }
}

/// Failure to decode a control-channel frame. Always non-fatal to the
/// socket: callers log it and continue (spec §4.5, §7).
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Encode a [`RequestSpec`] as the JSON text that goes out on the control
/// channel.
pub fn encode_request(spec: &RequestSpec) -> String {
    serde_json::to_string(spec).expect("RequestSpec always serializes")
}

/// Decode a [`RequestSpec`] received by the agent.
pub fn decode_request(text: &str) -> Result<RequestSpec, FrameError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode an [`Event`] as the JSON text sent back on the control channel.
pub fn encode_event(event: &Event) -> String {
    serde_json::to_string(event).expect("Event always serializes")
}

/// Decode an [`Event`] received by the server. Unknown keys are ignored by
/// construction (serde drops fields the target struct doesn't declare);
/// an unrecognized `event_type` decodes as [`Event::Unknown`] rather than
/// erroring.
pub fn decode_event(text: &str) -> Result<Event, FrameError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_spec_round_trips() {
        let mut query_params = IndexMap::new();
        query_params.insert("alt".to_string(), QueryValue::Single("sse".to_string()));
        let spec = RequestSpec {
            request_id: RequestId("42-1700000000".to_string()),
            method: Method::Post,
            path: "/v1beta/models/gemini-pro:generateContent".to_string(),
            query_params,
            headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: Some(r#"{"contents":[]}"#.to_string()),
        };
        let encoded = encode_request(&spec);
        let decoded = decode_request(&encoded).unwrap();
        assert_eq!(spec, decoded);
    }

    #[test]
    fn response_headers_event_round_trips() {
        let event = Event::ResponseHeaders {
            request_id: RequestId("1".to_string()),
            status: 200,
            headers: HashMap::from([("content-type".to_string(), "text/event-stream".to_string())]),
        };
        let encoded = encode_event(&event);
        assert!(encoded.contains("\"event_type\":\"response_headers\""));
        let decoded = decode_event(&encoded).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn unknown_event_type_decodes_as_unknown_not_an_error() {
        let text = r#"{"event_type":"ping","request_id":"1"}"#;
        let decoded = decode_event(text).unwrap();
        assert_eq!(decoded, Event::Unknown);
        assert_eq!(decoded.request_id(), None);
    }

    #[test]
    fn unknown_top_level_keys_are_ignored_on_decode() {
        let text = r#"{"event_type":"stream_close","request_id":"9","future_field":123}"#;
        let decoded = decode_event(text).unwrap();
        assert_eq!(
            decoded,
            Event::StreamClose {
                request_id: RequestId("9".to_string())
            }
        );
    }

    #[test]
    fn malformed_json_is_a_frame_error_not_a_panic() {
        let err = decode_event("not json").unwrap_err();
        assert!(matches!(err, FrameError::InvalidJson(_)));
    }

    #[test]
    fn terminal_events_are_mutually_recognized() {
        let close = Event::StreamClose {
            request_id: RequestId("1".to_string()),
        };
        let error = Event::Error {
            request_id: RequestId("1".to_string()),
            status: 500,
            message: "boom".to_string(),
        };
        let chunk = Event::Chunk {
            request_id: RequestId("1".to_string()),
            data: "x".to_string(),
        };
        assert!(close.is_terminal());
        assert!(error.is_terminal());
        assert!(!chunk.is_terminal());
    }

    #[test]
    fn query_value_flattens_single_and_multi() {
        let single = QueryValue::Single("a".to_string());
        let multi = QueryValue::Multi(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(single.values(), vec!["a"]);
        assert_eq!(multi.values(), vec!["a", "b"]);
    }
}
