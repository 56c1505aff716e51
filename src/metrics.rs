//! Metrics collection and export for resource pools

use crate::pool::PoolStats;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use async_resource_pool::{Factory, Pool, PoolConfiguration};
/// # use async_trait::async_trait;
/// # use std::convert::Infallible;
/// # struct Numbers;
/// # #[async_trait]
/// # impl Factory for Numbers {
/// #     type Resource = u64;
/// #     type Error = Infallible;
/// #     async fn create(&self) -> Result<u64, Infallible> { Ok(1) }
/// #     async fn destroy(&self, _resource: u64) -> Result<(), Infallible> { Ok(()) }
/// # }
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = Pool::new(Numbers, PoolConfiguration::new(3)).unwrap();
/// pool.start().await.unwrap();
///
/// let _resource = pool.acquire().await.unwrap();
/// let metrics = pool.metrics().await.unwrap();
/// assert_eq!(metrics.total_created, 1);
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.lent_resources, 1);
/// # }
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolMetrics {
    /// Resources produced by the factory
    pub total_created: usize,

    /// Resources removed from the pool
    pub total_destroyed: usize,

    /// Resources handed to callers
    pub total_acquired: usize,

    /// Resources returned by callers
    pub total_released: usize,

    /// Resources that failed validation
    pub validation_failures: usize,

    /// Factory `create` failures
    pub creation_failures: usize,

    /// Acquires that ran out of time in the queue
    pub acquire_timeouts: usize,

    /// Acquires turned away because the queue was full
    pub waiters_rejected: usize,

    /// Resources currently tracked
    pub pool_size: usize,

    /// Idle resources
    pub available_resources: usize,

    /// Resources on loan
    pub lent_resources: usize,

    /// Callers queued in `acquire()`
    pub pending_requests: usize,

    /// Lent share of the maximum size (0.0 to 1.0)
    pub utilization: f64,

    /// Maximum pool size
    pub max_capacity: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("creation_failures".to_string(), self.creation_failures.to_string());
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert("waiters_rejected".to_string(), self.waiters_rejected.to_string());
        metrics.insert("pool_size".to_string(), self.pool_size.to_string());
        metrics.insert("available_resources".to_string(), self.available_resources.to_string());
        metrics.insert("lent_resources".to_string(), self.lent_resources.to_string());
        metrics.insert("pending_requests".to_string(), self.pending_requests.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// Every sample carries a `pool` label plus the given tags.
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let registry = Registry::new_custom(Some("resourcepool".to_string()), Some(labels))?;

        let gauges = [
            ("resources", "Resources currently tracked", metrics.pool_size),
            ("resources_available", "Idle resources", metrics.available_resources),
            ("resources_lent", "Resources on loan", metrics.lent_resources),
            ("requests_pending", "Callers waiting for a resource", metrics.pending_requests),
            ("resources_max", "Maximum pool size", metrics.max_capacity),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(Opts::new(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(Opts::new("utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("created_total", "Resources created", metrics.total_created),
            ("destroyed_total", "Resources destroyed", metrics.total_destroyed),
            ("acquired_total", "Resources acquired", metrics.total_acquired),
            ("released_total", "Resources released", metrics.total_released),
            ("validation_failures_total", "Validation failures", metrics.validation_failures),
            ("creation_failures_total", "Creation failures", metrics.creation_failures),
            ("acquire_timeouts_total", "Acquire timeouts", metrics.acquire_timeouts),
            ("waiters_rejected_total", "Acquires rejected by a full queue", metrics.waiters_rejected),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Internal metrics tracker, updated by the engine
pub(crate) struct MetricsTracker {
    pub total_created: AtomicUsize,
    pub total_destroyed: AtomicUsize,
    pub total_acquired: AtomicUsize,
    pub total_released: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub creation_failures: AtomicUsize,
    pub acquire_timeouts: AtomicUsize,
    pub waiters_rejected: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            total_created: AtomicUsize::new(0),
            total_destroyed: AtomicUsize::new(0),
            total_acquired: AtomicUsize::new(0),
            total_released: AtomicUsize::new(0),
            validation_failures: AtomicUsize::new(0),
            creation_failures: AtomicUsize::new(0),
            acquire_timeouts: AtomicUsize::new(0),
            waiters_rejected: AtomicUsize::new(0),
        }
    }

    pub fn get_metrics(&self, stats: &PoolStats) -> PoolMetrics {
        let utilization = if stats.max_size > 0 {
            stats.lent() as f64 / stats.max_size as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            waiters_rejected: self.waiters_rejected.load(Ordering::Relaxed),
            pool_size: stats.size,
            available_resources: stats.available(),
            lent_resources: stats.lent(),
            pending_requests: stats.pending,
            utilization,
            max_capacity: stats.max_size,
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolStatus;
    use crate::resource::ResourceStatus;

    fn stats(available: usize, lent: usize) -> PoolStats {
        let mut counts = HashMap::new();
        counts.insert(ResourceStatus::Available, available);
        counts.insert(ResourceStatus::Lent, lent);
        PoolStats {
            status: PoolStatus::Started,
            size: available + lent,
            max_size: 4,
            min_size: 1,
            pending: 0,
            idle: available,
            counts,
        }
    }

    #[test]
    fn test_metrics_from_stats() {
        let tracker = MetricsTracker::new();
        tracker.total_created.fetch_add(3, Ordering::Relaxed);
        tracker.total_acquired.fetch_add(2, Ordering::Relaxed);

        let metrics = tracker.get_metrics(&stats(1, 2));
        assert_eq!(metrics.total_created, 3);
        assert_eq!(metrics.pool_size, 3);
        assert_eq!(metrics.lent_resources, 2);
        assert!((metrics.utilization - 0.5).abs() < f64::EPSILON);

        let exported = metrics.export();
        assert_eq!(exported.get("total_acquired").map(String::as_str), Some("2"));
        assert_eq!(exported.get("utilization").map(String::as_str), Some("0.50"));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsTracker::new().get_metrics(&stats(2, 1));
        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "api".to_string());

        let output = MetricsExporter::export_prometheus(&metrics, "db", Some(&tags)).unwrap();
        assert!(output.contains("resourcepool_resources_lent"));
        assert!(output.contains("pool=\"db\""));
        assert!(output.contains("service=\"api\""));
        assert!(output.contains("# TYPE resourcepool_created_total counter"));
    }
}
