//! Prometheus metrics service for CTOWatch

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Instant;
use tracing::info;

/// Metrics service for Prometheus
pub struct MetricsService {
    registry: Registry,
    start_time: Instant,

    // Pipeline metrics
    pub pipeline_runs: IntCounterVec,
    pub events_fetched: IntCounter,
    pub notifications: IntCounterVec,
    pub enrichment_misses: IntCounter,
    pub persist_failures: IntCounter,
    pub seen_saves: IntCounter,
    pub seen_tokens: IntGauge,

    // System metrics
    pub upstream_latency: HistogramVec,
    pub uptime: Gauge,
}

impl MetricsService {
    /// Create a new metrics service with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let pipeline_runs = IntCounterVec::new(
            Opts::new("ctowatch_pipeline_runs_total", "Pipeline runs by outcome"),
            &["outcome"],
        )?;
        let events_fetched =
            IntCounter::new("ctowatch_events_fetched_total", "CTO events returned by upstream")?;
        let notifications = IntCounterVec::new(
            Opts::new("ctowatch_notifications_total", "Notification attempts"),
            &["result"],
        )?;
        let enrichment_misses = IntCounter::new(
            "ctowatch_enrichment_misses_total",
            "Events delivered without token details",
        )?;
        let persist_failures = IntCounter::new(
            "ctowatch_persist_failures_total",
            "Failed writes of the seen-token file",
        )?;
        let seen_saves =
            IntCounter::new("ctowatch_seen_saves_total", "Writes of the seen-token file")?;
        let seen_tokens = IntGauge::new("ctowatch_seen_tokens", "Tokens in the seen set")?;

        let upstream_latency = HistogramVec::new(
            HistogramOpts::new("ctowatch_upstream_latency_seconds", "DexScreener latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["endpoint"],
        )?;
        let uptime = Gauge::new("ctowatch_uptime_seconds", "Application uptime")?;

        registry.register(Box::new(pipeline_runs.clone()))?;
        registry.register(Box::new(events_fetched.clone()))?;
        registry.register(Box::new(notifications.clone()))?;
        registry.register(Box::new(enrichment_misses.clone()))?;
        registry.register(Box::new(persist_failures.clone()))?;
        registry.register(Box::new(seen_saves.clone()))?;
        registry.register(Box::new(seen_tokens.clone()))?;
        registry.register(Box::new(upstream_latency.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        info!(target: "METRICS", "Prometheus metrics initialized");

        Ok(Self {
            registry,
            start_time: Instant::now(),
            pipeline_runs,
            events_fetched,
            notifications,
            enrichment_misses,
            persist_failures,
            seen_saves,
            seen_tokens,
            upstream_latency,
            uptime,
        })
    }

    /// Record the outcome label of a finished run
    pub fn record_run(&self, outcome: &str) {
        self.pipeline_runs.with_label_values(&[outcome]).inc();
    }

    /// Record a notification attempt
    pub fn record_notification(&self, delivered: bool) {
        let result = if delivered { "delivered" } else { "failed" };
        self.notifications.with_label_values(&[result]).inc();
    }

    /// Observe a request duration against an upstream endpoint
    pub fn observe_upstream(&self, endpoint: &str, started: Instant) {
        self.upstream_latency
            .with_label_values(&[endpoint])
            .observe(started.elapsed().as_secs_f64());
    }

    /// Get metrics as Prometheus text format
    pub fn get_metrics(&self) -> anyhow::Result<String> {
        self.uptime.set(self.start_time.elapsed().as_secs_f64());

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_recorded_values() {
        let metrics = MetricsService::new().unwrap();
        metrics.record_run("notified");
        metrics.record_notification(true);
        metrics.record_notification(false);
        metrics.seen_tokens.set(3);

        let text = metrics.get_metrics().unwrap();
        assert!(text.contains("ctowatch_pipeline_runs_total{outcome=\"notified\"} 1"));
        assert!(text.contains("ctowatch_notifications_total{result=\"failed\"} 1"));
        assert!(text.contains("ctowatch_seen_tokens 3"));
        assert!(text.contains("ctowatch_uptime_seconds"));
    }
}
