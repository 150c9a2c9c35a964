//! The browser streamer (spec §4.8): turns a successful 2xx response into
//! the ordered sequence of frames the dispatcher replays to the local
//! client.
//!
//! Bytes are decoded through `encoding_rs`'s streaming UTF-8 decoder, which
//! carries partial multi-byte sequences across chunk boundaries in its own
//! internal state — the same incremental-decode shape the teacher's own
//! `salvo_core` test response body reader uses `encoding_rs` for.

use std::collections::HashMap;

use encoding_rs::UTF_8;
use futures_util::StreamExt;
use session_bridge_protocol::{Event, RequestId};
use tokio_util::sync::CancellationToken;

/// Drive `response`'s body to completion, calling `emit` with each frame in
/// order: exactly one `response_headers`, zero or more `chunk`s, then
/// exactly one of `stream_close` or `error`.
///
/// If `cancel` fires mid-stream, reading stops immediately and nothing
/// further is emitted — the caller's control-channel binding has already
/// moved on, so these frames would be discarded anyway (§4.9).
pub async fn stream_response(
    response: reqwest::Response,
    request_id: &RequestId,
    cancel: &CancellationToken,
    mut emit: impl FnMut(Event),
) {
    let status = response.status().as_u16();
    let headers = flatten_headers(response.headers());
    emit(Event::ResponseHeaders {
        request_id: request_id.clone(),
        status,
        headers,
    });

    let mut decoder = UTF_8.new_decoder();
    let mut body = response.bytes_stream();

    loop {
        let next = tokio::select! {
            next = body.next() => next,
            () = cancel.cancelled() => return,
        };
        match next {
            Some(Ok(bytes)) => {
                let mut decoded = String::with_capacity(bytes.len());
                let (_, _, had_errors) = decoder.decode_to_string(&bytes, &mut decoded, false);
                if had_errors {
                    tracing::debug!(request_id = %request_id.0, "replacement characters inserted decoding a chunk");
                }
                if !decoded.is_empty() {
                    emit(Event::Chunk {
                        request_id: request_id.clone(),
                        data: decoded,
                    });
                }
            }
            Some(Err(err)) => {
                emit(Event::Error {
                    request_id: request_id.clone(),
                    status: 500,
                    message: format!("stream read failed: {err}"),
                });
                return;
            }
            None => break,
        }
    }

    let mut tail = String::new();
    decoder.decode_to_string(&[], &mut tail, true);
    if !tail.is_empty() {
        emit(Event::Chunk {
            request_id: request_id.clone(),
            data: tail,
        });
    }
    emit(Event::StreamClose {
        request_id: request_id.clone(),
    });
}

fn flatten_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_headers_keeps_every_valid_utf8_header() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("content-type", "text/event-stream".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());
        let flat = flatten_headers(&headers);
        assert_eq!(flat.get("content-type").map(String::as_str), Some("text/event-stream"));
        assert_eq!(flat.get("x-request-id").map(String::as_str), Some("abc"));
    }

    #[test]
    fn decoder_preserves_multibyte_sequences_split_across_chunks() {
        let snowman = "\u{2603}".as_bytes().to_vec();
        let (first_half, second_half) = snowman.split_at(1);
        let mut decoder = UTF_8.new_decoder();
        let mut out = String::new();
        decoder.decode_to_string(first_half, &mut out, false);
        assert!(out.is_empty());
        decoder.decode_to_string(second_half, &mut out, false);
        assert_eq!(out, "\u{2603}");
    }
}
