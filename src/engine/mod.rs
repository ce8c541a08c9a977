pub mod dedup;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::OrderApi;
use crate::bus::BusSubscription;
use crate::error::ApiError;
use crate::models::event::DomainEvent;
use crate::models::order::{DeliveryType, RiderOrder};
use crate::models::session::{RiderProfile, SessionContext};
use crate::observability::metrics::Metrics;
use dedup::DedupWindow;

/// Complete, internally consistent view of the session's orders, newest
/// first. Replaced wholesale on every mutation.
pub type OrderSnapshot = Arc<Vec<RiderOrder>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    IncorrectCode,
    TransientFailure,
}

impl VerifyOutcome {
    fn as_label(self) -> &'static str {
        match self {
            VerifyOutcome::Verified => "verified",
            VerifyOutcome::IncorrectCode => "incorrect",
            VerifyOutcome::TransientFailure => "transient",
        }
    }
}

/// A failed refresh is distinct from an empty listing: the previous set
/// stays visible either way, but the caller can tell the difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(usize),
    Failed,
}

/// A claim is a request, not a commitment; the authoritative result is the
/// next refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Requested,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed,
    AlreadyGone,
    NotReady,
    TransientFailure,
}

/// Single writer of the in-memory order set. Mutations arrive from the bus
/// subscriber loop and from UI-triggered commands; all of them serialize on
/// the internal lock, and readers only ever see full snapshots through the
/// watch channel.
pub struct LifecycleEngine {
    api: Arc<dyn OrderApi>,
    session: SessionContext,
    orders: Mutex<HashMap<String, RiderOrder>>,
    snapshot_tx: watch::Sender<OrderSnapshot>,
    profile: Mutex<Option<RiderProfile>>,
    dedup: DedupWindow,
    call_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl LifecycleEngine {
    pub fn new(
        api: Arc<dyn OrderApi>,
        session: SessionContext,
        call_timeout: Duration,
        dedup_retention: Duration,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (snapshot_tx, _unused_rx) = watch::channel(OrderSnapshot::default());
        Arc::new(Self {
            api,
            session,
            orders: Mutex::new(HashMap::new()),
            snapshot_tx,
            profile: Mutex::new(None),
            dedup: DedupWindow::new(dedup_retention),
            call_timeout,
            metrics,
        })
    }

    pub fn orders(&self) -> OrderSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn watch_orders(&self) -> watch::Receiver<OrderSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Replace the full order set from the listing call. On failure the
    /// previous set stays intact.
    pub async fn refresh(&self) -> RefreshOutcome {
        match self.call(self.api.list_orders()).await {
            Ok(list) => {
                let mut orders = self.orders.lock().await;
                orders.clear();
                for order in list {
                    orders.insert(order.order_key.clone(), order);
                }
                let count = orders.len();
                self.publish_snapshot(&orders);
                drop(orders);

                self.metrics.reconciliations_total.inc();
                self.metrics.orders_active.set(count as i64);
                debug!(count, "order set refreshed");
                RefreshOutcome::Refreshed(count)
            }
            Err(err) => {
                warn!(error = %err, "order refresh failed; keeping previous set");
                RefreshOutcome::Failed
            }
        }
    }

    /// Request assignment of an unclaimed order to this session's rider.
    /// Fire-and-forget: no local state changes until the next refresh
    /// confirms what the backend decided.
    pub async fn claim(&self, order_key: &str) -> ClaimOutcome {
        let target = {
            let orders = self.orders.lock().await;
            orders
                .get(order_key)
                .map(|order| (order.delivery_type, order.shared_group_id().map(str::to_owned)))
        };

        let Some((delivery_type, group_id)) = target else {
            warn!(order_key, "claim requested for unknown order");
            return ClaimOutcome::Failed;
        };

        let result = match delivery_type {
            DeliveryType::Pickup => {
                let Some(group_id) = group_id else {
                    warn!(order_key, "pickup order has no group reference");
                    return ClaimOutcome::Failed;
                };
                self.call(self.api.assign_pickup(&group_id, &self.session.rider_id))
                    .await
            }
            DeliveryType::Delivery => {
                self.call(self.api.assign_delivery(order_key, &self.session.rider_id))
                    .await
            }
        };

        match result {
            Ok(()) => {
                info!(order_key, "claim requested");
                ClaimOutcome::Requested
            }
            Err(err) => {
                warn!(order_key, error = %err, "claim request failed");
                ClaimOutcome::Failed
            }
        }
    }

    /// Dispatch an OTP to the verification endpoint the order's current leg
    /// calls for. Local flags move optimistically on the verified outcome
    /// only; a refresh immediately reconciles the authoritative statuses.
    pub async fn verify(&self, order_key: &str, code: &str, leg_id: Option<&str>) -> VerifyOutcome {
        let target = {
            let orders = self.orders.lock().await;
            orders.get(order_key).map(|order| {
                (
                    order.delivery_type,
                    order.is_pickup_verified,
                    order.shared_group_id().map(str::to_owned),
                )
            })
        };

        let Some((delivery_type, pickup_verified, group_id)) = target else {
            warn!(order_key, "verify requested for unknown order");
            return VerifyOutcome::TransientFailure;
        };

        let started = Instant::now();
        let result = match (delivery_type, pickup_verified) {
            (DeliveryType::Pickup, false) => {
                let Some(group_id) = group_id else {
                    warn!(order_key, "pickup order has no group reference");
                    return VerifyOutcome::TransientFailure;
                };
                self.call(self.api.verify_pickup(&group_id, code)).await
            }
            (DeliveryType::Pickup, true) => {
                let Some(group_id) = group_id else {
                    warn!(order_key, "pickup order has no group reference");
                    return VerifyOutcome::TransientFailure;
                };
                self.call(self.api.verify_admin_drop(&group_id, code)).await
            }
            (DeliveryType::Delivery, false) => {
                self.call(self.api.verify_admin_pickup(order_key, code))
                    .await
            }
            (DeliveryType::Delivery, true) => {
                let Some(leg_id) = leg_id else {
                    warn!(order_key, "shop drop verification requires a leg id");
                    return VerifyOutcome::TransientFailure;
                };
                self.call(self.api.verify_shop_drop(leg_id, code)).await
            }
        };

        let outcome = match result {
            Ok(200) => VerifyOutcome::Verified,
            Ok(status) => {
                debug!(order_key, status, "verification code rejected");
                VerifyOutcome::IncorrectCode
            }
            Err(ApiError::Status(status)) => {
                debug!(order_key, status, "verification code rejected");
                VerifyOutcome::IncorrectCode
            }
            Err(err) => {
                warn!(order_key, error = %err, "verification call failed");
                VerifyOutcome::TransientFailure
            }
        };

        self.metrics
            .verify_latency_seconds
            .with_label_values(&[outcome.as_label()])
            .observe(started.elapsed().as_secs_f64());

        if outcome == VerifyOutcome::Verified {
            {
                let mut orders = self.orders.lock().await;
                if let Some(order) = orders.get_mut(order_key) {
                    if order.is_pickup_verified {
                        order.is_drop_verified = true;
                    } else {
                        order.is_pickup_verified = true;
                    }
                    self.publish_snapshot(&orders);
                }
            }
            self.refresh().await;
        }

        outcome
    }

    /// Finish an order whose pickup and drop are both verified. Idempotent:
    /// once the order has left the active set, further calls are no-ops.
    pub async fn complete_transit(&self, order_key: &str) -> CompleteOutcome {
        {
            let orders = self.orders.lock().await;
            match orders.get(order_key) {
                None => return CompleteOutcome::AlreadyGone,
                Some(order) if !(order.is_pickup_verified && order.is_drop_verified) => {
                    debug!(order_key, "complete requested before both verifications");
                    return CompleteOutcome::NotReady;
                }
                Some(_) => {}
            }
        }

        match self.call(self.api.complete_transit(order_key)).await {
            Ok(()) => {
                {
                    let mut orders = self.orders.lock().await;
                    if let Some(order) = orders.get_mut(order_key) {
                        order.is_completed = true;
                    }
                    self.publish_snapshot(&orders);
                }
                self.refresh().await;
                info!(order_key, "transit completed");
                CompleteOutcome::Completed
            }
            Err(err) => {
                warn!(order_key, error = %err, "complete transit failed");
                CompleteOutcome::TransientFailure
            }
        }
    }

    /// Rider profile from the detail call, cached for the session.
    pub async fn rider_profile(&self) -> Result<RiderProfile, ApiError> {
        {
            let cached = self.profile.lock().await;
            if let Some(profile) = cached.as_ref() {
                return Ok(profile.clone());
            }
        }

        let profile = self
            .call(self.api.rider_detail(&self.session.rider_id))
            .await?;
        *self.profile.lock().await = Some(profile.clone());
        Ok(profile)
    }

    /// Subscriber loop: every event triggers a full reconciliation. Event
    /// payloads are not trusted to be complete (push may carry only a key),
    /// so the listing call is the single source of truth.
    pub async fn run_event_loop(
        self: Arc<Self>,
        mut subscription: BusSubscription,
        shutdown: CancellationToken,
    ) {
        info!("lifecycle engine subscribed to event bus");

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_event(event).await;
        }

        info!("lifecycle engine event loop stopped");
    }

    async fn handle_event(&self, event: DomainEvent) {
        if self.dedup.is_duplicate(&event) {
            debug!(
                order_key = %event.order_key(),
                source = ?event.source,
                "duplicate event suppressed"
            );
            self.metrics.dedup_suppressed_total.inc();
            return;
        }

        debug!(
            order_key = %event.order_key(),
            source = ?event.source,
            "reconciling on event"
        );
        self.refresh().await;
    }

    fn publish_snapshot(&self, orders: &HashMap<String, RiderOrder>) {
        let mut list: Vec<RiderOrder> = orders.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.snapshot_tx.send_replace(Arc::new(list));
    }

    async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        match timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout),
        }
    }
}
