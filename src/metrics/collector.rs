// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self { registry, collector })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        buffer
    }
}

pub struct MetricsCollector {
    /// Forward-outcome counts: `outcome` in {success, transport_retry,
    /// backend_error, no_route}.
    pub forward_outcomes_total: IntCounterVec,
    pub forward_duration_seconds: HistogramVec,

    /// Per-backend health gauge (1=healthy, 0=unhealthy).
    pub backend_health_status: IntGaugeVec,
    /// Per-backend EMA latency in milliseconds.
    pub backend_ema_latency_ms: IntGaugeVec,
    /// Per-backend slow-cooldown gauge (1=in cooldown, 0=not).
    pub backend_slow_cooldown: IntGaugeVec,
    /// Per-backend consecutive-failure counter.
    pub backend_consecutive_failures: IntGaugeVec,

    pub registry_size: IntGauge,
    pub healthy_backends: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let forward_outcomes_total = IntCounterVec::new(
            Opts::new(
                "lb_forward_outcomes_total",
                "Total forwarded requests by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(forward_outcomes_total.clone()))?;

        let forward_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_forward_duration_seconds",
                "Forwarded request duration in seconds",
            ),
            &["backend", "outcome"],
        )?;
        registry.register(Box::new(forward_duration_seconds.clone()))?;

        let backend_health_status = IntGaugeVec::new(
            Opts::new(
                "lb_backend_health_status",
                "Backend health status (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_health_status.clone()))?;

        let backend_ema_latency_ms = IntGaugeVec::new(
            Opts::new(
                "lb_backend_ema_latency_ms",
                "Exponentially weighted moving average backend latency in milliseconds",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_ema_latency_ms.clone()))?;

        let backend_slow_cooldown = IntGaugeVec::new(
            Opts::new(
                "lb_backend_slow_cooldown",
                "Whether a backend is currently quarantined for sustained slowness",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_slow_cooldown.clone()))?;

        let backend_consecutive_failures = IntGaugeVec::new(
            Opts::new(
                "lb_backend_consecutive_failures",
                "Consecutive unhealthy transitions observed for a backend",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_consecutive_failures.clone()))?;

        let registry_size = IntGauge::new("lb_registry_size", "Total tracked backends")?;
        registry.register(Box::new(registry_size.clone()))?;

        let healthy_backends =
            IntGauge::new("lb_healthy_backends", "Number of currently healthy backends")?;
        registry.register(Box::new(healthy_backends.clone()))?;

        Ok(Self {
            forward_outcomes_total,
            forward_duration_seconds,
            backend_health_status,
            backend_ema_latency_ms,
            backend_slow_cooldown,
            backend_consecutive_failures,
            registry_size,
            healthy_backends,
        })
    }

    pub fn record_forward_outcome(
        &self,
        backend: &str,
        outcome: &str,
        duration: std::time::Duration,
    ) {
        self.forward_outcomes_total
            .with_label_values(&[outcome])
            .inc();
        self.forward_duration_seconds
            .with_label_values(&[backend, outcome])
            .observe(duration.as_secs_f64());
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool) {
        self.backend_health_status
            .with_label_values(&[backend])
            .set(if healthy { 1 } else { 0 });
    }

    pub fn update_backend_ema_latency(&self, backend: &str, ema_ms: i64) {
        self.backend_ema_latency_ms
            .with_label_values(&[backend])
            .set(ema_ms);
    }

    pub fn update_backend_slow_cooldown(&self, backend: &str, in_cooldown: bool) {
        self.backend_slow_cooldown
            .with_label_values(&[backend])
            .set(if in_cooldown { 1 } else { 0 });
    }

    pub fn update_backend_consecutive_failures(&self, backend: &str, count: usize) {
        self.backend_consecutive_failures
            .with_label_values(&[backend])
            .set(count as i64);
    }

    pub fn update_registry_counts(&self, total: usize, healthy: usize) {
        self.registry_size.set(total as i64);
        self.healthy_backends.set(healthy as i64);
    }
}

/// Helper for timing operations, kept as a small wrapper around `Instant`
/// so call sites read the same as the teacher's original `Timer`.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
