pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::models::event::{DomainEvent, EventKind, EventSource};
use crate::models::order::RiderOrder;
use crate::observability::metrics::Metrics;
use transport::{StreamConnection, StreamTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Active,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(1_000),
        }
    }
}

#[derive(Serialize)]
struct JoinFrame<'a> {
    event: &'static str,
    room: &'a str,
}

/// Inbound "new group order" frame shape.
#[derive(Deserialize)]
struct GroupOrderFrame {
    message: String,
    data: RiderOrder,
}

enum SessionEnd {
    Shutdown,
    Dropped,
    JoinFailed,
}

/// Owns the persistent connection to the backend: dial, join the broadcast
/// room, decode frames into domain events, reconnect on failure. All
/// blocking stays inside this task; the bus and engine never wait on it.
pub struct StreamAdapter {
    transport: Arc<dyn StreamTransport>,
    bus: EventBus,
    room: String,
    policy: ReconnectPolicy,
    ping_interval: Duration,
    state_tx: watch::Sender<ConnState>,
    sequence: AtomicU64,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl StreamAdapter {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        bus: EventBus,
        room: String,
        policy: ReconnectPolicy,
        ping_interval: Duration,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (state_tx, _unused_rx) = watch::channel(ConnState::Disconnected);
        Arc::new(Self {
            transport,
            bus,
            room,
            policy,
            ping_interval,
            state_tx,
            sequence: AtomicU64::new(0),
            metrics,
            shutdown,
        })
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnState) {
        self.state_tx.send_replace(state);
    }

    /// Run until shutdown or until the reconnect budget is exhausted.
    /// Consecutive failed attempts are bounded by the policy; a session
    /// that reaches `Active` resets the counter.
    pub async fn run(self: Arc<Self>) {
        info!(room = %self.room, "stream adapter started");
        let mut failures: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnState::Connecting);
            let dial = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                dial = self.transport.connect() => dial,
            };

            match dial {
                Ok(conn) => {
                    self.set_state(ConnState::Connected);
                    match self.run_session(conn).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Dropped => failures = 0,
                        SessionEnd::JoinFailed => failures += 1,
                    }
                }
                Err(err) => {
                    failures += 1;
                    self.metrics.reconnect_attempts_total.inc();
                    warn!(error = %err, attempt = failures, "stream connection failed");
                }
            }

            if failures >= self.policy.max_attempts {
                warn!(
                    attempts = failures,
                    "reconnect budget exhausted; staying disconnected"
                );
                self.set_state(ConnState::Disconnected);
                return;
            }

            self.set_state(ConnState::Disconnected);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(self.policy.delay) => {}
            }
        }

        self.set_state(ConnState::Disconnected);
        info!("stream adapter stopped");
    }

    async fn run_session(&self, mut conn: Box<dyn StreamConnection>) -> SessionEnd {
        let join = match serde_json::to_string(&JoinFrame {
            event: "join",
            room: &self.room,
        }) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "failed to encode join frame");
                return SessionEnd::JoinFailed;
            }
        };

        if let Err(err) = conn.send(join).await {
            warn!(error = %err, "room join failed");
            return SessionEnd::JoinFailed;
        }

        self.set_state(ConnState::Active);
        info!(room = %self.room, "joined broadcast room");

        let mut ping = interval(self.ping_interval);
        ping.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    conn.close().await;
                    return SessionEnd::Shutdown;
                }
                _ = ping.tick() => {
                    if let Err(err) = conn.ping().await {
                        warn!(error = %err, "keepalive ping failed");
                        return SessionEnd::Dropped;
                    }
                }
                frame = conn.recv() => {
                    match frame {
                        Some(Ok(text)) => self.handle_frame(&text),
                        Some(Err(err)) => {
                            warn!(error = %err, "stream read failed");
                            return SessionEnd::Dropped;
                        }
                        None => {
                            info!("stream closed by server");
                            return SessionEnd::Dropped;
                        }
                    }
                }
            }
        }
    }

    /// Malformed or invalid frames are logged and dropped; they never take
    /// the session down.
    fn handle_frame(&self, text: &str) {
        let frame: GroupOrderFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed stream frame");
                return;
            }
        };

        if let Err(err) = frame.data.validate() {
            warn!(error = %err, "dropping invalid order frame");
            return;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        debug!(
            message = %frame.message,
            order_key = %frame.data.order_key,
            "new group order frame"
        );

        self.bus.publish(DomainEvent::new(
            EventSource::Stream,
            sequence,
            EventKind::NewGroupOrder(Box::new(frame.data)),
        ));
        self.metrics
            .events_published_total
            .with_label_values(&["stream"])
            .inc();
    }
}
