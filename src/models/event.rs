use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::RiderOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Stream,
    Push,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    NewGroupOrder(Box<RiderOrder>),
    OrderStatusChanged { order_key: String, operation: String },
}

/// Unit carried on the bus. `sequence` is monotonically non-decreasing per
/// source and only a hint: the engine uses `(order_key, sequence)` for
/// short-window de-duplication, never for ordering decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub source: EventSource,
    pub sequence: u64,
    pub kind: EventKind,
}

impl DomainEvent {
    pub fn new(source: EventSource, sequence: u64, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            sequence,
            kind,
        }
    }

    pub fn order_key(&self) -> &str {
        match &self.kind {
            EventKind::NewGroupOrder(order) => &order.order_key,
            EventKind::OrderStatusChanged { order_key, .. } => order_key,
        }
    }
}
