use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::RequestId;

/// Allocates `request_id`s that are unique for the lifetime of the process:
/// a monotonically increasing counter combined with a wall-clock value
/// (spec §3), so ids remain sortable by issue order even though the
/// timestamp component alone could collide under load.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id.
    pub fn next(&self) -> RequestId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        RequestId(format!("{seq}-{millis}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let gen = RequestIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
        let a_seq: u64 = a.0.split('-').next().unwrap().parse().unwrap();
        let b_seq: u64 = b.0.split('-').next().unwrap().parse().unwrap();
        assert!(b_seq > a_seq);
    }
}
