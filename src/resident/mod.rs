use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{HostNotifier, OrderApi};
use crate::bus::EventBus;
use crate::config::Config;
use crate::engine::LifecycleEngine;
use crate::models::session::SessionContext;
use crate::observability::metrics::Metrics;
use crate::push::token::TokenRegistrar;
use crate::push::{PushAdapter, PushMessage};
use crate::stream::transport::WsTransport;
use crate::stream::{ReconnectPolicy, StreamAdapter};

/// Long-lived owner of the relay's background tasks: the stream adapter's
/// connect/reconnect loop, the push adapter, and the engine's subscriber
/// loop. The host's boot hook starts one of these and keeps it for the
/// process lifetime; `shutdown` closes the transport and halts reconnect
/// scheduling before returning.
pub struct ResidentProcess {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    notifier: Arc<dyn HostNotifier>,
}

impl ResidentProcess {
    pub async fn start(
        bus: &EventBus,
        stream: Arc<StreamAdapter>,
        push: PushAdapter,
        push_inbox: mpsc::Receiver<PushMessage>,
        engine: Arc<LifecycleEngine>,
        notifier: Arc<dyn HostNotifier>,
        shutdown: CancellationToken,
    ) -> Self {
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(
            engine.run_event_loop(bus.subscribe(), shutdown.clone()),
        ));
        tasks.push(tokio::spawn(push.run(push_inbox)));

        // The stream task ending on its own means the reconnect budget ran
        // out; surface that to the rider.
        let stream_task = tokio::spawn(stream.run());
        let alert_notifier = notifier.clone();
        let alert_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let _ = stream_task.await;
            if !alert_shutdown.is_cancelled() {
                warn!("stream adapter gave up reconnecting");
                alert_notifier
                    .notify("Delivery service", "Connection to dispatch lost")
                    .await;
            }
        }));

        notifier
            .notify("Delivery service", "Running in background")
            .await;
        info!("resident process started");

        Self {
            shutdown,
            tasks,
            notifier,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Tear everything down. In-flight verify/claim calls are left to their
    /// owners; their results land after the engine loop is gone and are
    /// discarded.
    pub async fn shutdown(mut self) {
        info!("resident process shutting down");
        self.shutdown.cancel();

        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }

        self.notifier.notify("Delivery service", "Stopped").await;
        info!("resident process stopped");
    }
}

/// Everything the embedding host needs after boot: the engine for the
/// presentation layer, the push inbox for the OS channel to feed, and the
/// registrar for token rotations.
pub struct Relay {
    pub engine: Arc<LifecycleEngine>,
    pub registrar: Arc<TokenRegistrar>,
    pub push_inbox: mpsc::Sender<PushMessage>,
    pub bus: EventBus,
    pub metrics: Arc<Metrics>,
    resident: ResidentProcess,
}

impl Relay {
    /// Wire the whole relay from config against the real websocket
    /// transport and start it.
    pub async fn launch(
        config: &Config,
        api: Arc<dyn OrderApi>,
        notifier: Arc<dyn HostNotifier>,
        session: SessionContext,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let bus = EventBus::new(config.event_buffer_size);
        let shutdown = CancellationToken::new();

        let transport = Arc::new(WsTransport::new(config.stream_url.clone()));
        let stream = StreamAdapter::new(
            transport,
            bus.clone(),
            config.broadcast_room.clone(),
            ReconnectPolicy {
                max_attempts: config.reconnect_max_attempts,
                delay: config.reconnect_delay,
            },
            config.ping_interval,
            metrics.clone(),
            shutdown.clone(),
        );

        let engine = LifecycleEngine::new(
            api.clone(),
            session.clone(),
            config.call_timeout,
            config.dedup_retention,
            metrics.clone(),
        );

        let registrar = Arc::new(TokenRegistrar::new(api));
        registrar.bind_session(session).await;

        let (push_tx, push_rx) = mpsc::channel(config.push_queue_size);
        let push = PushAdapter::new(
            bus.clone(),
            notifier.clone(),
            metrics.clone(),
            shutdown.clone(),
        );

        let resident =
            ResidentProcess::start(&bus, stream, push, push_rx, engine.clone(), notifier, shutdown)
                .await;

        Self {
            engine,
            registrar,
            push_inbox: push_tx,
            bus,
            metrics,
            resident,
        }
    }

    pub async fn shutdown(self) {
        self.resident.shutdown().await;
    }
}
