//! The pending-request table (spec §4.4): a concurrency-safe map from
//! `request_id` to the channel that feeds events to the task holding that
//! request's client response.
//!
//! The table itself only ever hands out or removes a whole entry; nothing
//! reaches into another task's entry. That is what makes coarse-grained
//! synchronization (a single [`parking_lot::Mutex`]) sufficient even though
//! many HTTP handler tasks and the single control-channel receive task all
//! touch the table concurrently (§5).

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use session_bridge_protocol::{Event, RequestId};
use tokio::sync::mpsc;

/// A signal delivered to the task owning one in-flight request.
#[derive(Debug)]
pub enum Signal {
    /// A decoded event addressed to this request.
    Frame(Event),
    /// The bound browser disconnected; every still-open request must wind
    /// down (§4.5, §4.6).
    BrowserGone,
}

#[derive(Debug)]
pub struct PendingEntry {
    pub tx: mpsc::UnboundedSender<Signal>,
    pub created_at: Instant,
}

#[derive(Debug, thiserror::Error)]
#[error("request id already pending")]
pub struct DuplicateId;

/// The shared pending-request table.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<RequestId, PendingEntry>>,
}

impl PendingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly transmitted request's entry. Fails if the id is
    /// already present — under correct counter use this must not happen.
    pub fn insert(&self, id: RequestId, entry: PendingEntry) -> Result<(), DuplicateId> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(DuplicateId);
        }
        entries.insert(id, entry);
        Ok(())
    }

    /// Atomically remove and return an entry (terminal frames, idle expiry).
    pub fn take(&self, id: &RequestId) -> Option<PendingEntry> {
        self.entries.lock().remove(id)
    }

    /// Deliver a signal to the entry for `id`, if still live. Returns
    /// `false` (and logs nothing itself — callers log) when the id is
    /// unknown, so frames for a dead or never-existing request are
    /// silently dropped per §3's invariant.
    pub fn deliver(&self, id: &RequestId, signal: Signal) -> bool {
        let entries = self.entries.lock();
        match entries.get(id) {
            Some(entry) => entry.tx.send(signal).is_ok(),
            None => false,
        }
    }

    /// Remove every entry (browser disconnect fan-out, §4.5).
    pub fn drain(&self) -> Vec<(RequestId, PendingEntry)> {
        self.entries.lock().drain().collect()
    }

    /// Number of requests currently in flight, for `/health` and logging.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the longest-lived still-pending entry, for `/health`'s
    /// companion data and structured timeout logging. Not a spec
    /// requirement; carried as ambient observability (SPEC_FULL.md,
    /// "Pending-Request Table").
    #[must_use]
    pub fn oldest_age(&self) -> Option<std::time::Duration> {
        self.entries.lock().values().map(|entry| entry.created_at.elapsed()).max()
    }
}
