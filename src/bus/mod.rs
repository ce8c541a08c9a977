use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::models::event::DomainEvent;

/// In-process fan-out for domain events. The bus holds no domain state;
/// each subscriber owns an independent buffer, so a slow consumer lags and
/// skips rather than blocking publishers or its peers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver to every current subscriber. Never blocks; with no
    /// subscribers the event is dropped.
    pub fn publish(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> BusSubscription {
        BusSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct BusSubscription {
    rx: broadcast::Receiver<DomainEvent>,
}

impl BusSubscription {
    /// Next event for this subscriber; `None` once the bus is gone. A gap
    /// from falling behind the buffer is logged and skipped.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "bus subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = DomainEvent> {
        BroadcastStream::new(self.rx).filter_map(|item| item.ok())
    }
}
