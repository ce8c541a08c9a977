use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub events_published_total: IntCounterVec,
    pub reconnect_attempts_total: IntCounter,
    pub reconciliations_total: IntCounter,
    pub dedup_suppressed_total: IntCounter,
    pub orders_active: IntGauge,
    pub verify_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_published_total = IntCounterVec::new(
            Opts::new(
                "events_published_total",
                "Domain events published to the bus by source",
            ),
            &["source"],
        )
        .expect("valid events_published_total metric");

        let reconnect_attempts_total = IntCounter::new(
            "reconnect_attempts_total",
            "Failed stream connection attempts",
        )
        .expect("valid reconnect_attempts_total metric");

        let reconciliations_total = IntCounter::new(
            "reconciliations_total",
            "Full order-set refreshes applied",
        )
        .expect("valid reconciliations_total metric");

        let dedup_suppressed_total = IntCounter::new(
            "dedup_suppressed_total",
            "Events suppressed by the de-duplication window",
        )
        .expect("valid dedup_suppressed_total metric");

        let orders_active = IntGauge::new("orders_active", "Orders in the current session set")
            .expect("valid orders_active metric");

        let verify_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "verify_latency_seconds",
                "Latency of OTP verification calls in seconds",
            ),
            &["outcome"],
        )
        .expect("valid verify_latency_seconds metric");

        registry
            .register(Box::new(events_published_total.clone()))
            .expect("register events_published_total");
        registry
            .register(Box::new(reconnect_attempts_total.clone()))
            .expect("register reconnect_attempts_total");
        registry
            .register(Box::new(reconciliations_total.clone()))
            .expect("register reconciliations_total");
        registry
            .register(Box::new(dedup_suppressed_total.clone()))
            .expect("register dedup_suppressed_total");
        registry
            .register(Box::new(orders_active.clone()))
            .expect("register orders_active");
        registry
            .register(Box::new(verify_latency_seconds.clone()))
            .expect("register verify_latency_seconds");

        Self {
            registry,
            events_published_total,
            reconnect_attempts_total,
            reconciliations_total,
            dedup_suppressed_total,
            orders_active,
            verify_latency_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
