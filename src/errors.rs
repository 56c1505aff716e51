//! Error types for the resource pool

use crate::resource::ResourceStatus;
use crate::pool::PoolStatus;
use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by a [`Factory`](crate::Factory).
///
/// The factory's own error value is kept as-is and can be recovered with
/// `downcast_ref`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Operation requires pool status {expected:?}, but the pool is {actual:?}")]
    InvalidPoolState {
        expected: PoolStatus,
        actual: PoolStatus,
    },

    #[error("Pool cannot move from {from:?} to {to:?}")]
    InvalidStateTransition { from: PoolStatus, to: PoolStatus },

    #[error("Resource cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        from: ResourceStatus,
        to: ResourceStatus,
    },

    #[error("Pool has already been started")]
    PoolAlreadyStarted,

    #[error("Timed out after {0:?} waiting for a resource")]
    AcquireTimeout(Duration),

    #[error("Maximum number of waiting clients reached")]
    MaxWaitingClientsReached,

    #[error("Resource was not handed out by a pool")]
    NotManagedResource,

    #[error("Resource belongs to pool {owner}, not pool {pool}")]
    WrongPool { owner: usize, pool: usize },

    #[error("Pool is shutting down")]
    PoolShuttingDown,

    #[error("Buffer is full")]
    BufferFull,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Factory failed to create a resource: {0}")]
    Factory(BoxError),

    #[error("Pool engine is no longer running")]
    PoolClosed,
}

pub type PoolResult<T> = Result<T, PoolError>;
