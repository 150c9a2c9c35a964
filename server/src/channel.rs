//! The control-channel manager (spec §4.1, §9): holds at most one bound
//! browser connection and serializes everything written to it.
//!
//! Binding replacement uses a generation counter rather than a boolean
//! "connected" flag. A new WebSocket accept always wins immediately; the
//! reader loop for the *previous* connection only tears down state that is
//! still current when it finally notices its socket is gone, so a slow old
//! reader can never clobber a newer binding (§9, "process-scoped holder with
//! well-defined replace semantics").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use salvo::websocket::{Message, WebSocket};
use session_bridge_protocol::{decode_event, encode_request, RequestSpec};
use tokio::sync::mpsc;

use crate::pending::{PendingTable, Signal};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no browser is currently connected")]
    NoBrowser,
    #[error("the bound browser's outbound channel is closed")]
    Closed,
}

struct Binding {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    /// Dropped (or fired) to tell this binding's reader loop to stop
    /// immediately instead of waiting for its socket to notice it has been
    /// superseded.
    superseded: tokio::sync::oneshot::Sender<()>,
}

/// Shared owner of the single active browser-plane binding.
pub struct ChannelManager {
    pending: Arc<PendingTable>,
    binding: RwLock<Option<Binding>>,
    generation: AtomicU64,
}

impl ChannelManager {
    #[must_use]
    pub fn new(pending: Arc<PendingTable>) -> Self {
        Self {
            pending,
            binding: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Whether a browser is currently bound, for `/health` (§4.9).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.binding.read().is_some()
    }

    /// Send a request to the bound browser. Fails without side effects if
    /// nobody is bound; the caller turns that into a 503 (§6).
    pub fn dispatch(&self, spec: &RequestSpec) -> Result<(), DispatchError> {
        let binding = self.binding.read();
        let binding = binding.as_ref().ok_or(DispatchError::NoBrowser)?;
        let text = encode_request(spec);
        binding
            .outbound
            .send(Message::text(text))
            .map_err(|_| DispatchError::Closed)
    }

    /// Accept a newly upgraded WebSocket as the new binding, replacing
    /// whatever was bound before (§9). Runs the writer and reader halves
    /// until the socket closes, then tears down if this binding is still
    /// the current one.
    pub async fn accept(self: Arc<Self>, ws: WebSocket) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let (superseded_tx, mut superseded_rx) = tokio::sync::oneshot::channel();

        let previous = {
            let mut binding = self.binding.write();
            binding.replace(Binding {
                generation,
                outbound: tx,
                superseded: superseded_tx,
            })
        };
        if let Some(previous) = previous {
            // Drop the previous binding without grace: fire its shutdown
            // signal and fail everything it had in flight right away,
            // rather than waiting for its socket to notice it is gone
            // (§4.5, "dropped without grace").
            let _ = previous.superseded.send(());
            tracing::info!(
                previous_generation = previous.generation,
                generation,
                "replacing bound browser"
            );
            self.fail_all_pending();
        }
        tracing::info!(generation, "browser bound");

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        loop {
            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = &mut superseded_rx => {
                    tracing::debug!(generation, "reader loop superseded by a newer binding");
                    break;
                }
            };
            let Some(frame) = frame else { break };
            let message = match frame {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(generation, error = %err, "control channel read error");
                    break;
                }
            };
            if message.is_close() {
                break;
            }
            let Ok(text) = message.as_str() else {
                continue;
            };
            match decode_event(text) {
                Ok(event) => {
                    if let Some(request_id) = event.request_id().cloned() {
                        self.pending.deliver(&request_id, Signal::Frame(event));
                    }
                }
                Err(err) => {
                    tracing::warn!(generation, error = %err, "malformed control-channel frame");
                }
            }
        }

        writer.abort();
        self.on_disconnect(generation);
    }

    /// Only tear down state if `generation` is still the live binding. A
    /// stale reader loop from a replaced connection calls this too, but its
    /// generation no longer matches and the call is a no-op.
    fn on_disconnect(&self, generation: u64) {
        let was_current = {
            let mut binding = self.binding.write();
            match binding.as_ref() {
                Some(current) if current.generation == generation => {
                    *binding = None;
                    true
                }
                _ => false,
            }
        };
        if was_current {
            tracing::info!(generation, "browser disconnected");
            self.fail_all_pending();
        }
    }

    /// Fan out `BrowserGone` to every in-flight request (§4.5, §4.6). Used
    /// both when the bound browser disconnects and, implicitly, whenever a
    /// new binding replaces an old one (the old reader loop's own
    /// `on_disconnect` call handles that case identically).
    fn fail_all_pending(&self) {
        for (request_id, entry) in self.pending.drain() {
            let _ = entry.tx.send(Signal::BrowserGone);
            drop(request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_without_a_binding_is_no_browser() {
        let pending = Arc::new(PendingTable::new());
        let manager = ChannelManager::new(pending);
        let spec = RequestSpec {
            request_id: session_bridge_protocol::RequestId("1".to_string()),
            method: session_bridge_protocol::Method::Get,
            path: "/v1beta/models".to_string(),
            query_params: Default::default(),
            headers: Default::default(),
            body: None,
        };
        assert!(matches!(manager.dispatch(&spec), Err(DispatchError::NoBrowser)));
    }

    #[test]
    fn is_connected_starts_false() {
        let pending = Arc::new(PendingTable::new());
        let manager = ChannelManager::new(pending);
        assert!(!manager.is_connected());
    }
}
