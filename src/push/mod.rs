pub mod token;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::HostNotifier;
use crate::bus::EventBus;
use crate::error::RelayError;
use crate::models::event::{DomainEvent, EventKind, EventSource};
use crate::observability::metrics::Metrics;

/// One message handed over from the OS push channel. Display messages carry
/// no domain meaning and are surfaced as-is; data messages become domain
/// events.
#[derive(Debug, Clone)]
pub enum PushMessage {
    Display { title: String, body: String },
    Data(HashMap<String, String>),
}

/// Decodes out-of-band push payloads into the same event shape the stream
/// adapter publishes. Decoding fails closed: a payload missing a required
/// key publishes nothing.
pub struct PushAdapter {
    bus: EventBus,
    notifier: Arc<dyn HostNotifier>,
    sequence: AtomicU64,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl PushAdapter {
    pub fn new(
        bus: EventBus,
        notifier: Arc<dyn HostNotifier>,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bus,
            notifier,
            sequence: AtomicU64::new(0),
            metrics,
            shutdown,
        }
    }

    pub async fn run(self, mut inbox: mpsc::Receiver<PushMessage>) {
        info!("push adapter started");

        loop {
            let message = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match message {
                PushMessage::Display { title, body } => {
                    self.notifier.notify(&title, &body).await;
                }
                PushMessage::Data(map) => match decode_data(&map) {
                    Ok((order_key, operation)) => {
                        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                        self.bus.publish(DomainEvent::new(
                            EventSource::Push,
                            sequence,
                            EventKind::OrderStatusChanged {
                                order_key,
                                operation,
                            },
                        ));
                        self.metrics
                            .events_published_total
                            .with_label_values(&["push"])
                            .inc();
                    }
                    Err(err) => warn!(error = %err, "rejected push data payload"),
                },
            }
        }

        info!("push adapter stopped");
    }
}

pub fn decode_data(map: &HashMap<String, String>) -> Result<(String, String), RelayError> {
    let order_key = map
        .get("order_key")
        .filter(|value| !value.is_empty())
        .ok_or(RelayError::MissingField("order_key"))?;
    let operation = map
        .get("operation")
        .filter(|value| !value.is_empty())
        .ok_or(RelayError::MissingField("operation"))?;

    Ok((order_key.clone(), operation.clone()))
}
