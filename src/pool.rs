//! Public pool handle and lent-resource wrapper

use crate::config::PoolConfiguration;
use crate::engine::{Command, Engine, Mailbox};
use crate::errors::{PoolError, PoolResult};
use crate::factory::Factory;
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::resource::{ResourceId, ResourceStatus};

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Process-wide source of pool identities
static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// Lifecycle status of a pool. Pools only ever move one step forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PoolStatus {
    NotStarted,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl PoolStatus {
    /// The only status this one may move to
    pub fn next(self) -> Option<PoolStatus> {
        match self {
            PoolStatus::NotStarted => Some(PoolStatus::Starting),
            PoolStatus::Starting => Some(PoolStatus::Started),
            PoolStatus::Started => Some(PoolStatus::Stopping),
            PoolStatus::Stopping => Some(PoolStatus::Stopped),
            PoolStatus::Stopped => None,
        }
    }

    /// # Examples
    ///
    /// ```
    /// use async_resource_pool::PoolStatus;
    ///
    /// assert!(PoolStatus::Started.can_transition_to(PoolStatus::Stopping));
    /// assert!(!PoolStatus::NotStarted.can_transition_to(PoolStatus::Started));
    /// assert!(!PoolStatus::Stopped.can_transition_to(PoolStatus::NotStarted));
    /// ```
    pub fn can_transition_to(self, next: PoolStatus) -> bool {
        self.next() == Some(next)
    }
}

/// Point-in-time view of the engine's registries
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolStats {
    pub status: PoolStatus,

    /// Resources currently tracked
    pub size: usize,

    pub max_size: usize,

    pub min_size: usize,

    /// Callers queued in `acquire()`
    pub pending: usize,

    /// Resources queued for `acquire()`. Lower than the `Available` count
    /// while a borrow validation holds one back.
    pub idle: usize,

    /// Tracked resources per status
    pub counts: HashMap<ResourceStatus, usize>,
}

impl PoolStats {
    pub fn count(&self, status: ResourceStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn available(&self) -> usize {
        self.count(ResourceStatus::Available)
    }

    pub fn lent(&self) -> usize {
        self.count(ResourceStatus::Lent)
    }
}

/// A resource on loan from a pool.
///
/// Dereferences to the resource. Dropping it without calling
/// [`Pool::release`] returns it to the pool it came from.
pub struct Pooled<R> {
    resource: Option<R>,
    identity: Option<ResourceId>,
    returner: Option<Mailbox<R>>,
}

impl<R> Pooled<R> {
    pub(crate) fn managed(identity: ResourceId, resource: R, returner: Option<Mailbox<R>>) -> Self {
        Self {
            resource: Some(resource),
            identity: Some(identity),
            returner,
        }
    }

    /// Pool-assigned identity, `None` for resources no pool handed out
    pub fn identity(&self) -> Option<ResourceId> {
        self.identity
    }

    /// Take the resource out for good.
    ///
    /// The pool stops tracking it without destroying it and creates a
    /// replacement if it drops below its minimum size.
    pub fn detach(mut self) -> R {
        if let (Some(id), Some(returner)) = (self.identity, self.returner.take()) {
            let _ = returner.send(Command::Detach { id });
        }
        self.resource.take().expect("Value already taken")
    }

    pub(crate) fn into_parts(mut self) -> Option<(ResourceId, R)> {
        self.returner = None;
        Some((self.identity?, self.resource.take()?))
    }
}

impl<R> From<R> for Pooled<R> {
    /// Wrap a resource that did not come from a pool
    fn from(resource: R) -> Self {
        Self {
            resource: Some(resource),
            identity: None,
            returner: None,
        }
    }
}

impl<R> Deref for Pooled<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("Value already taken")
    }
}

impl<R> DerefMut for Pooled<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("Value already taken")
    }
}

impl<R> Drop for Pooled<R> {
    fn drop(&mut self) {
        if let (Some(id), Some(resource), Some(returner)) =
            (self.identity, self.resource.take(), self.returner.take())
        {
            let _ = returner.send(Command::Release {
                id,
                resource,
                reply: None,
            });
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Pooled<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("identity", &self.identity)
            .field("resource", &self.resource)
            .finish()
    }
}

/// Asynchronous pool of factory-made resources.
///
/// `Pool` is a cheap handle to an engine task that owns all pool state;
/// clones share the same pool.
///
/// # Examples
///
/// ```
/// use async_resource_pool::{Factory, Pool, PoolConfiguration};
/// use async_trait::async_trait;
/// use std::convert::Infallible;
///
/// struct Numbers;
///
/// #[async_trait]
/// impl Factory for Numbers {
///     type Resource = u64;
///     type Error = Infallible;
///
///     async fn create(&self) -> Result<u64, Infallible> {
///         Ok(42)
///     }
///
///     async fn destroy(&self, _resource: u64) -> Result<(), Infallible> {
///         Ok(())
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> async_resource_pool::PoolResult<()> {
/// let pool = Pool::new(Numbers, PoolConfiguration::new(4).with_min_size(2))?;
/// pool.start().await?;
///
/// let number = pool.acquire().await?;
/// assert_eq!(*number, 42);
/// pool.release(number).await?;
///
/// assert_eq!(pool.available_count().await?, 2);
/// pool.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Pool<F: Factory> {
    pool_id: usize,
    config: Arc<PoolConfiguration>,
    metrics: Arc<MetricsTracker>,
    mailbox: Mailbox<F::Resource>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            pool_id: self.pool_id,
            config: Arc::clone(&self.config),
            metrics: Arc::clone(&self.metrics),
            mailbox: self.mailbox.clone(),
        }
    }
}

impl<F: Factory> Pool<F> {
    /// Create a pool and spawn its engine.
    ///
    /// Must be called from within a Tokio runtime. The pool does nothing
    /// until [`start`](Self::start) is called.
    pub fn new(factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;
        let pool_id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        let config = Arc::new(config);
        let metrics = Arc::new(MetricsTracker::new());
        let (mailbox, inbox) = mpsc::unbounded_channel();

        let engine = Engine::new(
            pool_id,
            Arc::new(factory),
            Arc::clone(&config),
            Arc::clone(&metrics),
            mailbox.downgrade(),
        );
        tokio::spawn(engine.run(inbox));

        Ok(Self {
            pool_id,
            config,
            metrics,
            mailbox,
        })
    }

    /// Identity stamped on every resource this pool creates
    pub fn pool_id(&self) -> usize {
        self.pool_id
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.config
    }

    /// Create the minimum number of resources, one at a time, and start
    /// serving acquires
    pub async fn start(&self) -> PoolResult<()> {
        self.call(|reply| Command::Start { reply }).await?
    }

    /// Destroy idle resources, reject queued acquires and arrange for lent
    /// resources to be destroyed when they come back.
    ///
    /// Completes without waiting for lent resources.
    pub async fn stop(&self) -> PoolResult<()> {
        self.call(|reply| Command::Stop { reply }).await?
    }

    /// Borrow a resource, waiting up to the configured acquire timeout
    pub async fn acquire(&self) -> PoolResult<Pooled<F::Resource>> {
        self.call(|reply| Command::Acquire { reply }).await?
    }

    /// Return a borrowed resource.
    ///
    /// Releasing a resource the pool no longer tracks succeeds silently.
    /// A resource from another pool is rejected with `WrongPool` and goes
    /// back to its own pool when dropped.
    pub async fn release(&self, resource: Pooled<F::Resource>) -> PoolResult<()> {
        let owner = resource.identity().ok_or(PoolError::NotManagedResource)?.pool_id();
        if owner != self.pool_id {
            return Err(PoolError::WrongPool {
                owner,
                pool: self.pool_id,
            });
        }
        let (id, resource) = resource.into_parts().ok_or(PoolError::NotManagedResource)?;
        self.call(|reply| Command::Release {
            id,
            resource,
            reply: Some(reply),
        })
        .await?
    }

    /// Snapshot of the pool's registries
    pub async fn stats(&self) -> PoolResult<PoolStats> {
        self.call(|reply| Command::Inspect { reply }).await
    }

    pub async fn status(&self) -> PoolResult<PoolStatus> {
        Ok(self.stats().await?.status)
    }

    /// Number of resources the pool tracks
    pub async fn size(&self) -> PoolResult<usize> {
        Ok(self.stats().await?.size)
    }

    /// Resources an `acquire()` could take right now.
    ///
    /// A resource being validated for a borrow is still `Available` by
    /// status but is not counted here.
    pub async fn available_count(&self) -> PoolResult<usize> {
        Ok(self.stats().await?.idle)
    }

    pub async fn pending_count(&self) -> PoolResult<usize> {
        Ok(self.stats().await?.pending)
    }

    pub async fn count_by_status(&self, status: ResourceStatus) -> PoolResult<usize> {
        Ok(self.stats().await?.count(status))
    }

    pub async fn status_counts(&self) -> PoolResult<HashMap<ResourceStatus, usize>> {
        Ok(self.stats().await?.counts)
    }

    /// Counters combined with the current gauges
    pub async fn metrics(&self) -> PoolResult<PoolMetrics> {
        let stats = self.stats().await?;
        Ok(self.metrics.get_metrics(&stats))
    }

    pub async fn health(&self) -> PoolResult<HealthStatus> {
        Ok(HealthStatus::new(&self.stats().await?))
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command<F::Resource>,
    ) -> PoolResult<T> {
        let (reply, response) = oneshot::channel();
        self.mailbox
            .send(command(reply))
            .map_err(|_| PoolError::PoolClosed)?;
        response.await.map_err(|_| PoolError::PoolClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    #[derive(Default)]
    struct Connections {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        healthy: AtomicBool,
        failing: AtomicBool,
    }

    #[async_trait]
    impl Factory for Arc<Connections> {
        type Resource = usize;
        type Error = Refused;

        async fn create(&self) -> Result<usize, Refused> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Refused);
            }
            Ok(self.created.fetch_add(1, Ordering::SeqCst))
        }

        async fn destroy(&self, _resource: usize) -> Result<(), Refused> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn validate(&self, _resource: &mut usize) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn connections() -> Arc<Connections> {
        let connections = Arc::new(Connections::default());
        connections.healthy.store(true, Ordering::SeqCst);
        connections
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_start_populates_min_size() {
        let factory = connections();
        let pool = Pool::new(Arc::clone(&factory), PoolConfiguration::new(5).with_min_size(3)).unwrap();
        assert_eq!(pool.status().await.unwrap(), PoolStatus::NotStarted);

        pool.start().await.unwrap();

        assert_eq!(pool.status().await.unwrap(), PoolStatus::Started);
        assert_eq!(pool.available_count().await.unwrap(), 3);
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let pool = Pool::new(connections(), PoolConfiguration::new(2)).unwrap();
        pool.start().await.unwrap();
        assert!(matches!(pool.start().await, Err(PoolError::PoolAlreadyStarted)));
    }

    #[tokio::test]
    async fn test_start_propagates_factory_error() {
        let factory = connections();
        factory.failing.store(true, Ordering::SeqCst);
        let pool = Pool::new(Arc::clone(&factory), PoolConfiguration::new(2)).unwrap();

        match pool.start().await {
            Err(PoolError::Factory(error)) => assert!(error.downcast_ref::<Refused>().is_some()),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(pool.status().await.unwrap(), PoolStatus::Started);
        assert_eq!(pool.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_acquire_before_start_fails() {
        let pool = Pool::new(connections(), PoolConfiguration::new(2)).unwrap();
        assert!(matches!(
            pool.acquire().await,
            Err(PoolError::InvalidPoolState {
                expected: PoolStatus::Started,
                actual: PoolStatus::NotStarted
            })
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start_fails() {
        let pool = Pool::new(connections(), PoolConfiguration::new(2)).unwrap();
        assert!(matches!(
            pool.stop().await,
            Err(PoolError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_acquire_marks_lent() {
        let pool = Pool::new(connections(), PoolConfiguration::new(2)).unwrap();
        pool.start().await.unwrap();

        let resource = pool.acquire().await.unwrap();
        assert_eq!(resource.identity().unwrap().pool_id(), pool.pool_id());
        assert_eq!(pool.count_by_status(ResourceStatus::Lent).await.unwrap(), 1);
        assert_eq!(pool.available_count().await.unwrap(), 0);

        pool.release(resource).await.unwrap();
        assert_eq!(pool.count_by_status(ResourceStatus::Lent).await.unwrap(), 0);
        assert_eq!(pool.available_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_resource_replaced_on_borrow() {
        let factory = connections();
        let pool = Pool::new(Arc::clone(&factory), PoolConfiguration::new(2)).unwrap();
        pool.start().await.unwrap();

        factory.healthy.store(false, Ordering::SeqCst);
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        settle().await;
        factory.healthy.store(true, Ordering::SeqCst);

        // The failed resource was destroyed and a replacement dispatched to the waiter
        let resource = waiter.await.unwrap().unwrap();
        assert!(*resource >= 1);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().await.unwrap().validation_failures, 1);
    }

    #[tokio::test]
    async fn test_invalid_resource_destroyed_on_release() {
        let factory = connections();
        let pool = Pool::new(
            Arc::clone(&factory),
            PoolConfiguration::new(2).with_test_on_release(true),
        )
        .unwrap();
        pool.start().await.unwrap();

        let resource = pool.acquire().await.unwrap();
        factory.healthy.store(false, Ordering::SeqCst);
        pool.release(resource).await.unwrap();
        settle().await;

        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        // Replenished back to the minimum size
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_release_rejects_unmanaged_and_foreign() {
        let pool = Pool::new(connections(), PoolConfiguration::new(2)).unwrap();
        let other = Pool::new(connections(), PoolConfiguration::new(2)).unwrap();
        pool.start().await.unwrap();
        other.start().await.unwrap();

        assert!(matches!(
            pool.release(Pooled::from(7)).await,
            Err(PoolError::NotManagedResource)
        ));

        let foreign = other.acquire().await.unwrap();
        assert!(matches!(
            pool.release(foreign).await,
            Err(PoolError::WrongPool { .. })
        ));
        settle().await;
        // Went back to the pool it came from
        assert_eq!(other.available_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drop_returns_resource() {
        let pool = Pool::new(connections(), PoolConfiguration::new(2)).unwrap();
        pool.start().await.unwrap();
        {
            let _resource = pool.acquire().await.unwrap();
            assert_eq!(pool.available_count().await.unwrap(), 0);
        }
        assert_eq!(pool.available_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_detach_replaces_resource() {
        let factory = connections();
        let pool = Pool::new(Arc::clone(&factory), PoolConfiguration::new(2)).unwrap();
        pool.start().await.unwrap();

        let resource = pool.acquire().await.unwrap().detach();
        assert_eq!(resource, 0);
        settle().await;

        assert_eq!(pool.size().await.unwrap(), 1);
        assert_eq!(pool.available_count().await.unwrap(), 1);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let factory = connections();
        let pool = Pool::new(Arc::clone(&factory), PoolConfiguration::new(3).with_min_size(2)).unwrap();
        pool.start().await.unwrap();
        pool.stop().await.unwrap();
        pool.stop().await.unwrap();
        settle().await;

        assert_eq!(pool.status().await.unwrap(), PoolStatus::Stopped);
        assert_eq!(pool.size().await.unwrap(), 0);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 2);
        assert!(matches!(
            pool.acquire().await,
            Err(PoolError::InvalidPoolState { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_rejects_waiters() {
        let pool = Pool::new(
            connections(),
            PoolConfiguration::new(1).with_acquire_timeout(Duration::from_secs(5)),
        )
        .unwrap();
        pool.start().await.unwrap();
        let _held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        settle().await;
        assert_eq!(pool.pending_count().await.unwrap(), 1);

        pool.stop().await.unwrap();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(PoolError::PoolShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_max_waiting_clients() {
        let pool = Pool::new(
            connections(),
            PoolConfiguration::new(1)
                .with_max_waiting_clients(1)
                .with_acquire_timeout(Duration::from_secs(5)),
        )
        .unwrap();
        pool.start().await.unwrap();
        let _held = pool.acquire().await.unwrap();

        let _waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        settle().await;

        assert!(matches!(
            pool.acquire().await,
            Err(PoolError::MaxWaitingClientsReached)
        ));
        assert_eq!(pool.metrics().await.unwrap().waiters_rejected, 1);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_count() {
        let pool = Pool::new(
            connections(),
            PoolConfiguration::new(1)
                .with_max_waiting_clients(1)
                .with_acquire_timeout(Duration::from_secs(5)),
        )
        .unwrap();
        pool.start().await.unwrap();
        let held = pool.acquire().await.unwrap();

        // Caller gives up before the pool times it out
        let gave_up = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(gave_up.is_err());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        settle().await;
        pool.release(held).await.unwrap();
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_pending_requests_served_newest_first() {
        let pool = Pool::new(
            connections(),
            PoolConfiguration::new(1).with_acquire_timeout(Duration::from_secs(5)),
        )
        .unwrap();
        pool.start().await.unwrap();
        let held = pool.acquire().await.unwrap();

        let first = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        settle().await;
        let second = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        settle().await;

        pool.release(held).await.unwrap();
        let served = second.await.unwrap().unwrap();
        assert!(!first.is_finished());

        pool.release(served).await.unwrap();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_pool_ids_are_unique() {
        let a = Pool::new(connections(), PoolConfiguration::new(1)).unwrap();
        let b = Pool::new(connections(), PoolConfiguration::new(1)).unwrap();
        assert_ne!(a.pool_id(), b.pool_id());
    }

    #[tokio::test]
    async fn test_new_rejects_bad_config() {
        assert!(matches!(
            Pool::new(connections(), PoolConfiguration::new(0)),
            Err(PoolError::InvalidConfiguration(_))
        ));
    }
}
