//! Frozen wire-format examples for the control-channel protocol. These pin
//! down the exact JSON shape so the server and agent binaries (built from
//! separate processes, possibly separate deploys) never silently drift.

use session_bridge_protocol::{decode_event, decode_request, encode_event, Event, Method, RequestId};

#[test]
fn request_spec_contract_example() {
    let text = r#"{
        "request_id": "7-1700000000000",
        "method": "POST",
        "path": "/v1beta/models/gemini-pro:generateContent",
        "query_params": {"alt": "sse"},
        "headers": {"content-type": "application/json"},
        "body": "{\"contents\":[]}"
    }"#;
    let spec = decode_request(text).expect("contract fixture must decode");
    assert_eq!(spec.request_id, RequestId("7-1700000000000".to_string()));
    assert_eq!(spec.method, Method::Post);
    assert!(spec.method.allows_body());
    assert_eq!(spec.path, "/v1beta/models/gemini-pro:generateContent");
    assert_eq!(spec.body.as_deref(), Some("{\"contents\":[]}"));
}

#[test]
fn response_headers_contract_example() {
    let text = r#"{"event_type":"response_headers","request_id":"1","status":200,"headers":{}}"#;
    let event = decode_event(text).unwrap();
    match event {
        Event::ResponseHeaders {
            request_id,
            status,
            headers,
        } => {
            assert_eq!(request_id, RequestId("1".to_string()));
            assert_eq!(status, 200);
            assert!(headers.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn chunk_contract_examples_concatenate_in_order() {
    let first = decode_event(r#"{"event_type":"chunk","request_id":"1","data":"dat"}"#).unwrap();
    let second = decode_event(r#"{"event_type":"chunk","request_id":"1","data":"a: A\n\n"}"#).unwrap();
    let mut body = String::new();
    for event in [first, second] {
        if let Event::Chunk { data, .. } = event {
            body.push_str(&data);
        }
    }
    assert_eq!(body, "data: A\n\n");
}

#[test]
fn error_event_contract_example() {
    let text = r#"{"event_type":"error","request_id":"3","status":502,"message":"upstream failed"}"#;
    let event = decode_event(text).unwrap();
    assert!(event.is_terminal());
    assert_eq!(event.request_id(), Some(&RequestId("3".to_string())));
}

#[test]
fn encode_then_decode_event_is_byte_stable_modulo_key_order() {
    let event = Event::StreamClose {
        request_id: RequestId("99".to_string()),
    };
    let encoded_once = encode_event(&event);
    let decoded = decode_event(&encoded_once).unwrap();
    let encoded_twice = encode_event(&decoded);
    assert_eq!(encoded_once, encoded_twice);
}
