//! Prometheus instruments for the worker pool and translation outcomes.
//!
//! Every instrument is labelled by the engine tag; worker lifecycle
//! instruments additionally by worker id; request and connection instruments
//! additionally by outcome. Pool gauges, uptime and memory are refreshed by
//! the pool's periodic sampler; everything else is observed at the call
//! site.

use prometheus::{
    HistogramVec, IntCounterVec, IntGaugeVec, Registry,
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry,
};

const LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
    300.0,
];

const SIZE_BYTE_BUCKETS: &[f64] = &[
    64.0, 256.0, 1024.0, 4096.0, 10240.0, 16384.0, 65536.0, 262144.0, 1048576.0,
];

/// Gauges, counters and histograms describing the pool and its traffic.
#[derive(Clone)]
pub struct GatewayMetrics {
    /// Configured pool size.
    pub pool_workers: IntGaugeVec,
    /// Workers with a live subprocess.
    pub pool_workers_active: IntGaugeVec,
    /// Workers currently serving a request.
    pub pool_workers_busy: IntGaugeVec,
    /// Live workers waiting for work.
    pub pool_workers_idle: IntGaugeVec,
    /// Callers blocked in worker acquisition.
    pub pool_queue_waiters: IntGaugeVec,
    /// Successful worker subprocess starts.
    pub worker_starts_total: IntCounterVec,
    /// Worker subprocess restarts after unexpected exit.
    pub worker_restarts_total: IntCounterVec,
    /// Seconds since the worker subprocess started.
    pub worker_uptime_seconds: IntGaugeVec,
    /// Worker subprocess resident set size, sampled from the OS.
    pub worker_memory_bytes: IntGaugeVec,
    /// Translate calls by outcome.
    pub translate_requests_total: IntCounterVec,
    /// Translate call duration by outcome.
    pub translate_duration_seconds: HistogramVec,
    /// Serialized request size on the worker wire.
    pub translate_request_bytes: HistogramVec,
    /// Serialized response size on the worker wire.
    pub translate_response_bytes: HistogramVec,
    /// Time spent waiting to acquire a worker.
    pub queue_wait_seconds: HistogramVec,
    /// Rendezvous connection attempts by outcome.
    pub worker_connections_total: IntCounterVec,
    /// Rendezvous connection-open latency.
    pub worker_connection_open_seconds: HistogramVec,
}

impl GatewayMetrics {
    /// Register the full instrument set against `registry`.
    pub fn new(registry: &Registry) -> Self {
        Self {
            pool_workers: register_int_gauge_vec_with_registry!(
                "iskoces_pool_workers",
                "Configured number of translator workers.",
                &["engine"],
                registry,
            )
            .unwrap(),
            pool_workers_active: register_int_gauge_vec_with_registry!(
                "iskoces_pool_workers_active",
                "Workers with a live subprocess.",
                &["engine"],
                registry,
            )
            .unwrap(),
            pool_workers_busy: register_int_gauge_vec_with_registry!(
                "iskoces_pool_workers_busy",
                "Workers currently serving a request.",
                &["engine"],
                registry,
            )
            .unwrap(),
            pool_workers_idle: register_int_gauge_vec_with_registry!(
                "iskoces_pool_workers_idle",
                "Live workers waiting for work.",
                &["engine"],
                registry,
            )
            .unwrap(),
            pool_queue_waiters: register_int_gauge_vec_with_registry!(
                "iskoces_pool_queue_waiters",
                "Callers blocked waiting for a free worker.",
                &["engine"],
                registry,
            )
            .unwrap(),
            worker_starts_total: register_int_counter_vec_with_registry!(
                "iskoces_worker_starts_total",
                "Successful worker subprocess starts.",
                &["engine", "worker_id"],
                registry,
            )
            .unwrap(),
            worker_restarts_total: register_int_counter_vec_with_registry!(
                "iskoces_worker_restarts_total",
                "Worker subprocess restarts after unexpected exit.",
                &["engine", "worker_id"],
                registry,
            )
            .unwrap(),
            worker_uptime_seconds: register_int_gauge_vec_with_registry!(
                "iskoces_worker_uptime_seconds",
                "Seconds since the worker subprocess started.",
                &["engine", "worker_id"],
                registry,
            )
            .unwrap(),
            worker_memory_bytes: register_int_gauge_vec_with_registry!(
                "iskoces_worker_memory_bytes",
                "Worker subprocess resident set size in bytes.",
                &["engine", "worker_id"],
                registry,
            )
            .unwrap(),
            translate_requests_total: register_int_counter_vec_with_registry!(
                "iskoces_translate_requests_total",
                "Translate calls by outcome.",
                &["engine", "outcome"],
                registry,
            )
            .unwrap(),
            translate_duration_seconds: register_histogram_vec_with_registry!(
                "iskoces_translate_duration_seconds",
                "Translate call duration in seconds, by outcome.",
                &["engine", "outcome"],
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            translate_request_bytes: register_histogram_vec_with_registry!(
                "iskoces_translate_request_bytes",
                "Serialized request size on the worker wire.",
                &["engine"],
                SIZE_BYTE_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            translate_response_bytes: register_histogram_vec_with_registry!(
                "iskoces_translate_response_bytes",
                "Serialized response size on the worker wire.",
                &["engine"],
                SIZE_BYTE_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            queue_wait_seconds: register_histogram_vec_with_registry!(
                "iskoces_queue_wait_seconds",
                "Time spent waiting to acquire a worker, in seconds.",
                &["engine"],
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            worker_connections_total: register_int_counter_vec_with_registry!(
                "iskoces_worker_connections_total",
                "Rendezvous connection attempts by outcome.",
                &["engine", "outcome"],
                registry,
            )
            .unwrap(),
            worker_connection_open_seconds: register_histogram_vec_with_registry!(
                "iskoces_worker_connection_open_seconds",
                "Rendezvous connection-open latency in seconds.",
                &["engine"],
                LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
        }
    }

    /// Instruments registered against a throwaway registry, for tests.
    pub fn new_for_tests() -> Self {
        Self::new(&Registry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayMetrics;

    #[test]
    fn instruments_register_once_per_registry() {
        let registry = prometheus::Registry::new();
        let metrics = GatewayMetrics::new(&registry);

        metrics
            .translate_requests_total
            .with_label_values(&["argos", "ok"])
            .inc();
        metrics
            .queue_wait_seconds
            .with_label_values(&["argos"])
            .observe(0.25);

        let families = registry.gather();
        assert!(
            families
                .iter()
                .any(|f| f.name() == "iskoces_translate_requests_total")
        );
        assert!(families.iter().any(|f| f.name() == "iskoces_queue_wait_seconds"));
    }
}
