//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use async_resource_pool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new(20)
///     .with_min_size(5)
///     .with_max_waiting_clients(50)
///     .with_acquire_timeout(Duration::from_secs(3));
///
/// assert_eq!(config.max_size, 20);
/// assert_eq!(config.min_size, 5);
/// assert!(config.test_on_borrow);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfiguration {
    /// Maximum number of resources the pool may hold
    pub max_size: usize,

    /// Population the pool keeps itself at
    pub min_size: usize,

    /// Maximum number of callers queued in `acquire()`
    pub max_waiting_clients: usize,

    /// Validate resources before lending them
    pub test_on_borrow: bool,

    /// Validate resources when they are released
    pub test_on_release: bool,

    /// How long a queued `acquire()` waits before failing
    pub acquire_timeout: Duration,

    /// Reserved: limit on concurrent factory `create` calls (not enforced)
    pub max_concurrent_create: Option<usize>,

    /// Reserved: interval of the idle eviction sweep (not run)
    pub eviction_run_interval: Option<Duration>,

    /// Reserved: resources inspected per eviction sweep (not run)
    pub num_tests_per_run: Option<usize>,

    /// Reserved: idle time after which a resource may be evicted (not run)
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_size: 1,
            max_waiting_clients: 10,
            test_on_borrow: true,
            test_on_release: false,
            acquire_timeout: Duration::from_millis(1000),
            max_concurrent_create: None,
            eviction_run_interval: None,
            num_tests_per_run: None,
            idle_timeout: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a configuration with the given maximum size and defaults
    /// for everything else
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    /// Set the maximum pool size
    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the minimum pool size
    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set how many callers may wait for a resource
    pub fn with_max_waiting_clients(mut self, count: usize) -> Self {
        self.max_waiting_clients = count;
        self
    }

    /// Enable or disable validation on borrow
    pub fn with_test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    /// Enable or disable validation on release
    pub fn with_test_on_release(mut self, enabled: bool) -> Self {
        self.test_on_release = enabled;
        self
    }

    /// Set the acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the reserved concurrent-creation limit
    pub fn with_max_concurrent_create(mut self, count: usize) -> Self {
        self.max_concurrent_create = Some(count);
        self
    }

    /// Set the reserved eviction settings
    pub fn with_eviction(mut self, run_interval: Duration, tests_per_run: usize, idle_timeout: Duration) -> Self {
        self.eviction_run_interval = Some(run_interval);
        self.num_tests_per_run = Some(tests_per_run);
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Check the configuration for inconsistent values
    ///
    /// # Examples
    ///
    /// ```
    /// use async_resource_pool::PoolConfiguration;
    ///
    /// assert!(PoolConfiguration::new(0).validate().is_err());
    /// assert!(PoolConfiguration::new(2).with_min_size(3).validate().is_err());
    /// ```
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_size must be greater than 0".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::InvalidConfiguration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.max_waiting_clients == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_waiting_clients must be greater than 0".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::InvalidConfiguration(
                "acquire_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
