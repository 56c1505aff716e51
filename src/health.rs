//! Health monitoring for resource pools

use crate::pool::{PoolStats, PoolStatus};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Health status of a resource pool
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Lent share of the maximum size (0.0 to 1.0)
    pub utilization: f64,

    pub available_resources: usize,

    pub lent_resources: usize,

    pub pending_requests: usize,

    pub max_size: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Derive health from a snapshot of the pool
    pub fn new(stats: &PoolStats) -> Self {
        let lent = stats.lent();
        let utilization = if stats.max_size > 0 {
            lent as f64 / stats.max_size as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if stats.status != PoolStatus::Started {
            warnings.push(format!("Pool is not serving requests: {:?}", stats.status));
            is_healthy = false;
        }

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if stats.pending > 0 {
            warnings.push(format!("{} callers waiting for a resource", stats.pending));
        }

        if stats.status == PoolStatus::Started && stats.size < stats.min_size {
            warnings.push(format!(
                "Pool below minimum size: {} of {}",
                stats.size, stats.min_size
            ));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            available_resources: stats.available(),
            lent_resources: lent,
            pending_requests: stats.pending,
            max_size: stats.max_size,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceStatus;
    use std::collections::HashMap;

    fn stats(status: PoolStatus, available: usize, lent: usize, pending: usize) -> PoolStats {
        let mut counts = HashMap::new();
        counts.insert(ResourceStatus::Available, available);
        counts.insert(ResourceStatus::Lent, lent);
        PoolStats {
            status,
            size: available + lent,
            max_size: 10,
            min_size: 2,
            pending,
            idle: available,
            counts,
        }
    }

    #[test]
    fn test_healthy_pool() {
        let health = HealthStatus::new(&stats(PoolStatus::Started, 3, 1, 0));
        assert!(health.is_healthy());
        assert_eq!(health.warning_count, 0);
        assert_eq!(health.available_resources, 3);
    }

    #[test]
    fn test_saturated_pool() {
        let health = HealthStatus::new(&stats(PoolStatus::Started, 0, 10, 4));
        assert!(!health.is_healthy());
        assert_eq!(health.warning_count, 2);
        assert_eq!(health.pending_requests, 4);
    }

    #[test]
    fn test_stopped_pool() {
        let health = HealthStatus::new(&stats(PoolStatus::Stopped, 0, 0, 0));
        assert!(!health.is_healthy());
        assert!(health.warnings[0].contains("Stopped"));
    }
}
