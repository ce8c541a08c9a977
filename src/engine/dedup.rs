use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::models::event::DomainEvent;

/// Short-lived memory of recently seen `(order_key, sequence)` pairs. The
/// stream and push channels often announce the same backend change; within
/// the retention window only the first sighting triggers a reconciliation.
pub struct DedupWindow {
    retention: Duration,
    seen: DashMap<(String, u64), Instant>,
}

impl DedupWindow {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            seen: DashMap::new(),
        }
    }

    /// Records the event and reports whether an equivalent one was already
    /// seen inside the retention window.
    pub fn is_duplicate(&self, event: &DomainEvent) -> bool {
        let now = Instant::now();
        self.seen
            .retain(|_, stamp| now.duration_since(*stamp) < self.retention);

        let key = (event.order_key().to_string(), event.sequence);
        if self.seen.contains_key(&key) {
            return true;
        }

        self.seen.insert(key, now);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
