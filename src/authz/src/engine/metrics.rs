//! Prometheus-style metrics for the decision engine

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Engine counters and latency summary
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct EngineMetrics {
    /// Permission-set resolutions served (cached or not)
    pub resolutions: u64,

    /// Cache hits
    pub cache_hits: u64,

    /// Cache misses
    pub cache_misses: u64,

    /// `has_permission` checks that returned false
    pub denied_checks: u64,

    /// Safety checks run
    pub safety_checks: u64,

    /// Safety checks that rejected the mutation
    pub safety_rejections: u64,

    /// Directory reads that failed
    pub directory_failures: u64,

    /// Resolutions answered from the permissive fallback table
    pub fallback_resolutions: u64,

    /// Identity mutations committed
    pub mutations_committed: u64,

    /// Resolution latency percentiles (uncached path)
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    /// Calculate cache hit rate
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Metrics collector
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    /// Maximum samples to keep
    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(10_000))),
            max_samples: 10_000,
        }
    }

    pub async fn record_resolution(&self, cache_hit: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.resolutions += 1;
        if cache_hit {
            metrics.cache_hits += 1;
        } else {
            metrics.cache_misses += 1;
        }
    }

    pub async fn record_denied_check(&self) {
        self.metrics.write().await.denied_checks += 1;
    }

    pub async fn record_safety_check(&self, allowed: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.safety_checks += 1;
        if !allowed {
            metrics.safety_rejections += 1;
        }
    }

    pub async fn record_directory_failure(&self, used_fallback: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.directory_failures += 1;
        if used_fallback {
            metrics.fallback_resolutions += 1;
        }
    }

    pub async fn record_mutation(&self) {
        self.metrics.write().await.mutations_committed += 1;
    }

    /// Record uncached resolution latency
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        // Keep only recent samples
        if samples.len() > self.max_samples {
            samples.drain(0..1_000);
        }

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut metrics = self.metrics.write().await;
        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Get current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        *self.metrics.write().await = EngineMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export metrics in Prometheus text format
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;

        format!(
            r#"# HELP authz_resolutions_total Permission-set resolutions served
# TYPE authz_resolutions_total counter
authz_resolutions_total {}

# HELP authz_cache_hits_total Decision cache hits
# TYPE authz_cache_hits_total counter
authz_cache_hits_total {}

# HELP authz_cache_misses_total Decision cache misses
# TYPE authz_cache_misses_total counter
authz_cache_misses_total {}

# HELP authz_denied_checks_total Permission checks that returned false
# TYPE authz_denied_checks_total counter
authz_denied_checks_total {}

# HELP authz_safety_checks_total Safety checks run
# TYPE authz_safety_checks_total counter
authz_safety_checks_total {}

# HELP authz_safety_rejections_total Mutations rejected by a safety guardrail
# TYPE authz_safety_rejections_total counter
authz_safety_rejections_total {}

# HELP authz_directory_failures_total Failed permission directory reads
# TYPE authz_directory_failures_total counter
authz_directory_failures_total {}

# HELP authz_fallback_resolutions_total Resolutions answered by the fallback table
# TYPE authz_fallback_resolutions_total counter
authz_fallback_resolutions_total {}

# HELP authz_mutations_total Identity mutations committed
# TYPE authz_mutations_total counter
authz_mutations_total {}

# HELP authz_resolution_latency_seconds Uncached resolution latency
# TYPE authz_resolution_latency_seconds summary
authz_resolution_latency_seconds{{quantile="0.5"}} {}
authz_resolution_latency_seconds{{quantile="0.99"}} {}
"#,
            metrics.resolutions,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.denied_checks,
            metrics.safety_checks,
            metrics.safety_rejections,
            metrics.directory_failures,
            metrics.fallback_resolutions,
            metrics.mutations_committed,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
        )
    }

    /// Calculate percentile from sorted data
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
