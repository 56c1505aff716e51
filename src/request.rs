//! Pending acquire requests

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A caller parked in `acquire()` waiting for a resource.
///
/// Settling consumes the request, so it resolves or rejects at most once.
/// The timeout timer is started on construction and cancelled on
/// settlement.
pub(crate) struct PendingRequest<T> {
    id: u64,
    reply: oneshot::Sender<PoolResult<T>>,
    timeout: Duration,
    timer: JoinHandle<()>,
}

impl<T> PendingRequest<T> {
    /// Park a request; `on_timeout` runs once `timeout` elapses unless the
    /// request is settled first.
    pub fn new<F>(
        id: u64,
        reply: oneshot::Sender<PoolResult<T>>,
        timeout: Duration,
        on_timeout: F,
    ) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_timeout(id);
        });
        Self {
            id,
            reply,
            timeout,
            timer,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the waiting caller has given up
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Fulfil the request.
    ///
    /// When the caller is gone the value is handed back so it can be put
    /// back into circulation.
    pub fn resolve(self, value: T) -> Result<(), T> {
        self.timer.abort();
        match self.reply.send(Ok(value)) {
            Ok(()) => Ok(()),
            Err(Ok(value)) => Err(value),
            Err(Err(_)) => Ok(()),
        }
    }

    pub fn reject(self, error: PoolError) {
        self.timer.abort();
        let _ = self.reply.send(Err(error));
    }

    /// Reject with the timeout error carrying the configured duration
    pub fn expire(self) {
        let timeout = self.timeout;
        self.reject(PoolError::AcquireTimeout(timeout));
    }

    /// Drop the request, stopping its timer
    pub fn cancel(self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_resolve_delivers_value() {
        let (tx, rx) = oneshot::channel();
        let request = PendingRequest::new(1, tx, Duration::from_secs(5), |_| {});
        assert!(request.resolve(42).is_ok());
        assert_eq!(rx.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_resolve_after_caller_left_returns_value() {
        let (tx, rx) = oneshot::channel::<PoolResult<i32>>();
        let request = PendingRequest::new(1, tx, Duration::from_secs(5), |_| {});
        drop(rx);
        assert!(request.is_abandoned());
        assert_eq!(request.resolve(7), Err(7));
    }

    #[tokio::test]
    async fn test_timer_fires_with_id() {
        let (tx, _rx) = oneshot::channel::<PoolResult<i32>>();
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        let _request = PendingRequest::new(9, tx, Duration::from_millis(10), move |id| {
            let _ = fired_tx.send(id);
        });
        assert_eq!(fired_rx.recv().await, Some(9));
    }

    #[tokio::test]
    async fn test_expire_carries_timeout() {
        let (tx, rx) = oneshot::channel::<PoolResult<i32>>();
        let request = PendingRequest::new(1, tx, Duration::from_millis(250), |_| {});
        request.expire();
        match rx.await.unwrap() {
            Err(PoolError::AcquireTimeout(timeout)) => {
                assert_eq!(timeout, Duration::from_millis(250))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_settled_request_stops_timer() {
        let (tx, _rx) = oneshot::channel::<PoolResult<i32>>();
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel::<u64>();
        let request = PendingRequest::new(3, tx, Duration::from_millis(10), move |id| {
            let _ = fired_tx.send(id);
        });
        request.reject(PoolError::PoolShuttingDown);
        // The aborted timer drops its sender without sending
        assert_eq!(fired_rx.recv().await, None);
    }
}
