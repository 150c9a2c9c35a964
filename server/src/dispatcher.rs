//! The per-request dispatcher (spec §4.6): the state machine that turns a
//! decoded upstream `RequestSpec` into a streamed HTTP response, driven by
//! whatever `Signal`s arrive on this request's channel.
//!
//! The handler only blocks on the *first* meaningful signal. Once headers
//! (or a pre-header chunk forcing synthetic headers) are ready, it hands the
//! remaining lifecycle off to a spawned task and returns immediately — the
//! same "set headers, `res.channel()`, `tokio::spawn`, return" shape
//! `Response::channel`'s own doc example uses. Returning early is what lets
//! the framework start polling the body stream concurrently with the
//! spawned task feeding it, so a slow local client naturally backpressures
//! the task instead of buffering the whole response in memory (§5).

use std::collections::HashMap;

use salvo::http::HeaderMap;
use salvo::prelude::*;
use session_bridge_protocol::{Event, RequestId, RequestSpec};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{render_error, render_forwarded_error, BridgeError};
use crate::pending::{PendingEntry, Signal};
use crate::sanitize;
use crate::state::AppState;

/// Dispatch `spec` to the bound browser and drive `res` until either a
/// synchronous outcome is known or the response has been handed off to a
/// background streaming task.
pub async fn drive(state: &AppState, spec: RequestSpec, res: &mut Response) {
    let request_id = spec.request_id.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();
    if state
        .pending
        .insert(request_id.clone(), PendingEntry { tx, created_at: std::time::Instant::now() })
        .is_err()
    {
        tracing::error!(request_id = %request_id.0, "duplicate request id, this should be unreachable");
        render_error(res, BridgeError::NoBrowserBound, &request_id);
        return;
    }

    if let Err(err) = state.channel.dispatch(&spec) {
        state.pending.take(&request_id);
        tracing::debug!(request_id = %request_id.0, %err, "dispatch failed, no browser bound");
        render_error(res, BridgeError::NoBrowserBound, &request_id);
        return;
    }

    let deadline = Instant::now() + state.config.initial_idle_timeout;
    match await_first_signal(&mut rx, deadline).await {
        FirstSignal::Timeout => {
            state.pending.take(&request_id);
            tracing::warn!(
                request_id = %request_id.0,
                pending_count = state.pending.len(),
                "idle timeout before any response_headers, replying 504"
            );
            render_error(res, BridgeError::TimedOut, &request_id);
        }
        FirstSignal::ChannelClosed => {
            state.pending.take(&request_id);
            render_error(res, BridgeError::BrowserGone, &request_id);
        }
        FirstSignal::BrowserGone => {
            state.pending.take(&request_id);
            render_error(res, BridgeError::BrowserGone, &request_id);
        }
        FirstSignal::StreamClose => {
            state.pending.take(&request_id);
            res.status_code(StatusCode::OK);
        }
        FirstSignal::Error { status, message } => {
            state.pending.take(&request_id);
            render_forwarded_error(res, status, &message, &request_id);
        }
        FirstSignal::ResponseHeaders { status, headers } => {
            let sender = open_stream(res, status, headers);
            spawn_stream_task(state.clone(), request_id, rx, sender, Vec::new());
        }
        FirstSignal::Chunk(data) => {
            let sender = open_synthetic_stream(res);
            spawn_stream_task(state.clone(), request_id, rx, sender, vec![data]);
        }
    }
}

/// The outcome of waiting for the first signal worth acting on. Unknown
/// event types are swallowed transparently by `await_first_signal` — they
/// never reach this enum.
enum FirstSignal {
    ResponseHeaders { status: u16, headers: HashMap<String, String> },
    Chunk(String),
    StreamClose,
    Error { status: u16, message: String },
    BrowserGone,
    ChannelClosed,
    Timeout,
}

async fn await_first_signal(rx: &mut mpsc::UnboundedReceiver<Signal>, deadline: Instant) -> FirstSignal {
    loop {
        let signal = tokio::select! {
            signal = rx.recv() => signal,
            () = tokio::time::sleep_until(deadline) => return FirstSignal::Timeout,
        };
        match signal {
            None => return FirstSignal::ChannelClosed,
            Some(Signal::BrowserGone) => return FirstSignal::BrowserGone,
            Some(Signal::Frame(Event::ResponseHeaders { status, headers, .. })) => {
                return FirstSignal::ResponseHeaders { status, headers }
            }
            Some(Signal::Frame(Event::Chunk { data, .. })) => return FirstSignal::Chunk(data),
            Some(Signal::Frame(Event::StreamClose { .. })) => return FirstSignal::StreamClose,
            Some(Signal::Frame(Event::Error { status, message, .. })) => {
                return FirstSignal::Error { status, message }
            }
            Some(Signal::Frame(Event::Unknown)) => continue,
        }
    }
}

fn open_stream(res: &mut Response, status: u16, mut headers: HashMap<String, String>) -> salvo::http::body::BodySender {
    sanitize::strip_response_headers(&mut headers);
    sanitize::salvage_content_type(status, &mut headers);
    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    res.status_code(status_code);
    apply_headers(res.headers_mut(), &headers);
    res.channel()
}

/// A `chunk` arrived with no prior `response_headers` (§4.6, the ordering
/// guarantee: the dispatcher must force 200 + SSE headers rather than
/// reorder bytes ahead of a status line).
fn open_synthetic_stream(res: &mut Response) -> salvo::http::body::BodySender {
    res.status_code(StatusCode::OK);
    let mut headers = HashMap::new();
    sanitize::salvage_content_type(200, &mut headers);
    apply_headers(res.headers_mut(), &headers);
    res.channel()
}

fn apply_headers(target: &mut HeaderMap, headers: &HashMap<String, String>) {
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            salvo::http::HeaderName::from_bytes(name.as_bytes()),
            salvo::http::HeaderValue::from_str(value),
        ) {
            target.insert(name, value);
        }
    }
}

/// Hands the `Streaming` half of the state machine to a background task:
/// write `buffered` (a pre-header chunk that already arrived, if any), then
/// keep consuming `rx` until a terminal signal, timeout, or disconnect.
fn spawn_stream_task(
    state: AppState,
    request_id: RequestId,
    mut rx: mpsc::UnboundedReceiver<Signal>,
    mut sender: salvo::http::body::BodySender,
    buffered: Vec<String>,
) {
    tokio::spawn(async move {
        for chunk in buffered {
            if sender.send_data(chunk).await.is_err() {
                state.pending.take(&request_id);
                return;
            }
        }

        let mut deadline = Instant::now() + state.config.progress_idle_timeout;
        loop {
            let signal = tokio::select! {
                signal = rx.recv() => signal,
                () = tokio::time::sleep_until(deadline) => {
                    state.pending.take(&request_id);
                    tracing::warn!(
                        request_id = %request_id.0,
                        pending_count = state.pending.len(),
                        "idle timeout mid-stream, closing response"
                    );
                    sender.close();
                    return;
                }
            };

            match signal {
                None => {
                    state.pending.take(&request_id);
                    sender.close();
                    return;
                }
                Some(Signal::BrowserGone) => {
                    sender.close();
                    return;
                }
                Some(Signal::Frame(event)) => {
                    deadline = Instant::now() + state.config.progress_idle_timeout;
                    match event {
                        Event::Chunk { data, .. } => {
                            if sender.send_data(data).await.is_err() {
                                state.pending.take(&request_id);
                                return;
                            }
                        }
                        Event::StreamClose { .. } => {
                            state.pending.take(&request_id);
                            // Dropping `sender` at return finalizes the
                            // body normally (§4.6, Closed).
                            return;
                        }
                        Event::Error { status, message, .. } => {
                            state.pending.take(&request_id);
                            tracing::warn!(
                                request_id = %request_id.0,
                                status,
                                message,
                                "browser reported an error mid-stream, truncating"
                            );
                            sender.close();
                            return;
                        }
                        // A repeated `response_headers` or an unrecognized
                        // event type is a no-op once streaming: the status
                        // line is already frozen (§3 invariants).
                        Event::ResponseHeaders { .. } | Event::Unknown => {}
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_events_are_skipped_while_awaiting_the_first_signal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Signal::Frame(Event::Unknown)).unwrap();
        tx.send(Signal::Frame(Event::StreamClose {
            request_id: RequestId("1".to_string()),
        }))
        .unwrap();
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let first = await_first_signal(&mut rx, deadline).await;
        assert!(matches!(first, FirstSignal::StreamClose));
    }

    #[tokio::test]
    async fn response_headers_is_recognized_as_the_first_signal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Signal::Frame(Event::ResponseHeaders {
            request_id: RequestId("1".to_string()),
            status: 200,
            headers: HashMap::new(),
        }))
        .unwrap();
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let first = await_first_signal(&mut rx, deadline).await;
        assert!(matches!(first, FirstSignal::ResponseHeaders { status: 200, .. }));
    }

    #[tokio::test]
    async fn browser_gone_short_circuits_even_with_queued_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Signal::BrowserGone).unwrap();
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let first = await_first_signal(&mut rx, deadline).await;
        assert!(matches!(first, FirstSignal::BrowserGone));
    }
}
