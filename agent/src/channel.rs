//! The control-channel client (spec §4.9): the agent's single connection to
//! the server plane, with automatic reconnect and in-flight cancellation on
//! drop.
//!
//! Built on `tokio-tungstenite` — the same WebSocket implementation
//! `salvo`'s server-side `websocket` feature uses under the hood, so both
//! planes speak literally the same wire implementation (§9). The outbound
//! side mirrors the server's `ChannelManager` binding: a shared slot that is
//! `Some` only while connected, so a send attempted while disconnected is a
//! no-op rather than a panic (§4.9, "Send discipline").

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use session_bridge_protocol::{decode_request, encode_event, Event, RequestId, RequestSpec};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::{fetcher, streamer};

/// Shared connection state: the outbound sender (present only while
/// connected) and the set of in-flight requests' cancellation tokens.
pub struct AgentChannel {
    outbound: Mutex<Option<tokio::sync::mpsc::UnboundedSender<Message>>>,
    in_flight: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl AgentChannel {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            outbound: Mutex::new(None),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Run the connect/serve/reconnect loop forever. Returns only if the
    /// process is shutting down and the caller drops the future (see
    /// `main.rs`'s `tokio::select!` against the shutdown signal).
    pub async fn run(self: Arc<Self>, config: AgentConfig, http_client: reqwest::Client) {
        loop {
            tracing::info!(url = %config.control_channel_url, "connecting to control channel");
            match tokio_tungstenite::connect_async(config.control_channel_url.as_str()).await {
                Ok((ws, _response)) => {
                    tracing::info!("control channel connected");
                    self.clone().serve(ws, &config, &http_client).await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to connect to control channel");
                }
            }

            *self.outbound.lock() = None;
            self.abort_all_in_flight();
            tokio::time::sleep(config.reconnect_delay).await;
        }
    }

    /// Serve one connected session until the socket closes.
    async fn serve(
        self: Arc<Self>,
        ws: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        config: &AgentConfig,
        http_client: &reqwest::Client,
    ) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();
        *self.outbound.lock() = Some(tx);

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = stream.next().await {
            let message = match frame {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(error = %err, "control channel read error");
                    break;
                }
            };
            match message {
                Message::Text(text) => match decode_request(&text) {
                    Ok(spec) => self.clone().spawn_request(spec, config.clone(), http_client.clone()),
                    Err(err) => tracing::warn!(error = %err, "malformed request spec, dropping"),
                },
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
            }
        }

        writer.abort();
        tracing::info!("control channel disconnected");
    }

    /// Run one request's fetch-then-stream lifecycle to completion in its
    /// own task, tracked in `in_flight` so a disconnect can cancel it.
    fn spawn_request(self: Arc<Self>, spec: RequestSpec, config: AgentConfig, http_client: reqwest::Client) {
        let request_id = spec.request_id.clone();
        let cancel = CancellationToken::new();
        self.in_flight.lock().insert(request_id.clone(), cancel.clone());

        tokio::spawn(async move {
            match fetcher::fetch(&http_client, &spec, &config, &cancel).await {
                Ok(response) => {
                    let channel = self.clone();
                    streamer::stream_response(response, &request_id, &cancel, |event| channel.send(&event)).await;
                }
                Err(err) if err.is_cancelled() => {
                    tracing::debug!(request_id = %request_id.0, "fetch cancelled, dropping silently");
                }
                Err(err) => {
                    tracing::warn!(request_id = %request_id.0, error = %err, "fetch failed after all retries");
                    self.send(&Event::Error {
                        request_id: request_id.clone(),
                        status: err.status(),
                        message: err.to_string(),
                    });
                }
            }
            self.in_flight.lock().remove(&request_id);
        });
    }

    /// Serialize and send `event` if currently connected; otherwise drop it
    /// and log (§4.9, "Send discipline").
    fn send(&self, event: &Event) {
        let outbound = self.outbound.lock();
        match outbound.as_ref() {
            Some(tx) => {
                let text = encode_event(event);
                if tx.send(Message::Text(text.into())).is_err() {
                    tracing::warn!("control channel writer is gone, dropping frame");
                }
            }
            None => tracing::warn!("control channel is disconnected, dropping frame"),
        }
    }

    /// Cancel every tracked in-flight request (§4.9, "On disconnected,
    /// actively abort every in-flight Fetcher"). Their tasks notice via
    /// `cancel` and exit without emitting anything further.
    fn abort_all_in_flight(&self) {
        for (_, token) in self.in_flight.lock().drain() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_channel_starts_with_no_in_flight_requests() {
        let channel = AgentChannel::new();
        assert!(channel.in_flight.lock().is_empty());
    }

    #[test]
    fn send_while_disconnected_does_not_panic() {
        let channel = AgentChannel::new();
        channel.send(&Event::StreamClose {
            request_id: RequestId("1".to_string()),
        });
    }

    #[test]
    fn abort_all_in_flight_cancels_every_token_and_clears_the_map() {
        let channel = AgentChannel::new();
        let token = CancellationToken::new();
        channel.in_flight.lock().insert(RequestId("1".to_string()), token.clone());
        channel.abort_all_in_flight();
        assert!(token.is_cancelled());
        assert!(channel.in_flight.lock().is_empty());
    }
}
