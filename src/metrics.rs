//! Prometheus-compatible metrics and health reporting.

use prometheus::{self, Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get or initialize the global metrics instance.
pub fn get_metrics() -> Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new())).clone()
}

/// Histogram buckets from 1ms to 10s (in seconds).
fn default_latency_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

/// All metrics for the retrieval service.
pub struct Metrics {
    pub registry: Registry,

    // Counters
    pub search_queries_total: IntCounter,
    pub search_errors_total: IntCounter,
    /// Individual candidates dropped because their rerank call failed.
    pub rerank_failures_total: IntCounter,
    /// Requests that fell back to fused order because every rerank call failed.
    pub rerank_fallbacks_total: IntCounter,
    pub documents_indexed_total: IntCounter,
    pub indexing_errors_total: IntCounter,
    pub embeddings_generated_total: IntCounter,
    pub cache_hits_total: IntCounter,
    pub cache_misses_total: IntCounter,

    // Gauges
    pub uptime_seconds: IntGauge,

    // Histograms (seconds)
    pub search_duration_seconds: Histogram,
    pub retrieval_duration_seconds: Histogram,
    pub embedding_duration_seconds: Histogram,
    pub reranking_duration_seconds: Histogram,
    pub indexing_duration_seconds: Histogram,

    start_time: RwLock<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(format!("hybrid_{}", name), help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn histogram(registry: &Registry, name: &str, help: &str) -> prometheus::Result<Histogram> {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(format!("hybrid_{}", name), help).buckets(default_latency_buckets()),
    )?;
    registry.register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Self {
        Self::try_new().expect("static metric definitions are valid")
    }

    fn try_new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let uptime_seconds = IntGauge::new("hybrid_uptime_seconds", "Server uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            search_queries_total: counter(
                &registry,
                "search_queries_total",
                "Total number of search requests",
            )?,
            search_errors_total: counter(
                &registry,
                "search_errors_total",
                "Total number of failed search requests",
            )?,
            rerank_failures_total: counter(
                &registry,
                "rerank_failures_total",
                "Total number of candidates dropped after a failed rerank call",
            )?,
            rerank_fallbacks_total: counter(
                &registry,
                "rerank_fallbacks_total",
                "Total number of searches served in fused order after reranking was unavailable",
            )?,
            documents_indexed_total: counter(
                &registry,
                "documents_indexed_total",
                "Total number of documents indexed",
            )?,
            indexing_errors_total: counter(
                &registry,
                "indexing_errors_total",
                "Total number of documents rejected during indexing",
            )?,
            embeddings_generated_total: counter(
                &registry,
                "embeddings_generated_total",
                "Total number of document embeddings generated",
            )?,
            cache_hits_total: counter(&registry, "cache_hits_total", "Total number of cache hits")?,
            cache_misses_total: counter(
                &registry,
                "cache_misses_total",
                "Total number of cache misses",
            )?,
            uptime_seconds,
            search_duration_seconds: histogram(
                &registry,
                "search_duration_seconds",
                "End-to-end search duration in seconds",
            )?,
            retrieval_duration_seconds: histogram(
                &registry,
                "retrieval_duration_seconds",
                "Concurrent lexical + vector retrieval duration in seconds",
            )?,
            embedding_duration_seconds: histogram(
                &registry,
                "embedding_duration_seconds",
                "Embedding generation duration in seconds",
            )?,
            reranking_duration_seconds: histogram(
                &registry,
                "reranking_duration_seconds",
                "Reranking stage duration in seconds",
            )?,
            indexing_duration_seconds: histogram(
                &registry,
                "indexing_duration_seconds",
                "Bulk indexing request duration in seconds",
            )?,
            registry,
            start_time: RwLock::new(Instant::now()),
        })
    }

    /// Update the uptime gauge.
    pub fn update_uptime(&self) {
        let uptime = self.start_time.read().elapsed();
        self.uptime_seconds.set(uptime.as_secs() as i64);
    }

    /// Seconds since the metrics were created.
    pub fn uptime(&self) -> Duration {
        self.start_time.read().elapsed()
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;
        self.update_uptime();

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Export counters as a serializable snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            search_queries_total: self.search_queries_total.get(),
            search_errors_total: self.search_errors_total.get(),
            rerank_failures_total: self.rerank_failures_total.get(),
            rerank_fallbacks_total: self.rerank_fallbacks_total.get(),
            documents_indexed_total: self.documents_indexed_total.get(),
            indexing_errors_total: self.indexing_errors_total.get(),
            embeddings_generated_total: self.embeddings_generated_total.get(),
            search_duration: HistogramSnapshot::from_prometheus(&self.search_duration_seconds),
            reranking_duration: HistogramSnapshot::from_prometheus(
                &self.reranking_duration_seconds,
            ),
        }
    }

    /// Start a timer that records its duration to a histogram when dropped.
    pub fn start_timer(histogram: &Histogram) -> HistogramTimer {
        HistogramTimer {
            histogram: histogram.clone(),
            start: Instant::now(),
        }
    }
}

/// Timer that records duration to a histogram when dropped.
pub struct HistogramTimer {
    histogram: Histogram,
    start: Instant,
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

impl HistogramTimer {
    /// Elapsed time without stopping the timer.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Counter snapshot for logs and JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub search_queries_total: u64,
    pub search_errors_total: u64,
    pub rerank_failures_total: u64,
    pub rerank_fallbacks_total: u64,
    pub documents_indexed_total: u64,
    pub indexing_errors_total: u64,
    pub embeddings_generated_total: u64,
    pub search_duration: HistogramSnapshot,
    pub reranking_duration: HistogramSnapshot,
}

/// Snapshot of a histogram for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub mean: Option<f64>,
}

impl HistogramSnapshot {
    /// Create a snapshot from a prometheus histogram.
    pub fn from_prometheus(h: &Histogram) -> Self {
        let count = h.get_sample_count();
        let sum = h.get_sample_sum();
        Self {
            count,
            sum,
            mean: (count > 0).then(|| sum / count as f64),
        }
    }
}

/// Health state enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    /// Convert to HTTP status code.
    pub fn to_status_code(self) -> u16 {
        match self {
            HealthState::Healthy => 200,
            HealthState::Degraded => 200, // still serving
            HealthState::Unhealthy => 503,
        }
    }
}

/// Individual health check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthState,
    pub message: Option<String>,
    pub duration_ms: Option<u64>,
}

impl HealthCheck {
    pub fn healthy_with_duration(name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: HealthState::Healthy,
            message: None,
            duration_ms: Some(duration_ms),
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthState::Degraded,
            message: Some(message.into()),
            duration_ms: None,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthState::Unhealthy,
            message: Some(message.into()),
            duration_ms: None,
        }
    }
}

/// Overall health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub version: String,
    pub uptime_seconds: u64,
    pub embedding_dimension: usize,
    pub embedding_model: String,
    pub reranker: String,
    pub checks: Vec<HealthCheck>,
}

impl HealthStatus {
    /// Worst state across all checks.
    pub fn aggregate(checks: &[HealthCheck]) -> HealthState {
        checks.iter().fold(HealthState::Healthy, |acc, check| {
            match (acc, check.status) {
                (HealthState::Unhealthy, _) | (_, HealthState::Unhealthy) => HealthState::Unhealthy,
                (HealthState::Degraded, _) | (_, HealthState::Degraded) => HealthState::Degraded,
                _ => HealthState::Healthy,
            }
        })
    }
}
