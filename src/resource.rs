//! Resource handles tracked by the pool engine

use crate::errors::{PoolError, PoolResult};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle status of a pooled resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResourceStatus {
    /// Just produced by the factory
    New,

    /// Being handed to a waiter or to the available queue
    FastDispatch,

    /// Idle in the available queue
    Available,

    /// On loan to a caller
    Lent,

    /// Removed from the pool
    Destroyed,
}

impl ResourceStatus {
    pub const ALL: [ResourceStatus; 5] = [
        ResourceStatus::New,
        ResourceStatus::FastDispatch,
        ResourceStatus::Available,
        ResourceStatus::Lent,
        ResourceStatus::Destroyed,
    ];

    /// Whether moving from `self` to `next` follows the resource lifecycle
    ///
    /// # Examples
    ///
    /// ```
    /// use async_resource_pool::ResourceStatus;
    ///
    /// assert!(ResourceStatus::Available.can_transition_to(ResourceStatus::Lent));
    /// assert!(ResourceStatus::Lent.can_transition_to(ResourceStatus::Destroyed));
    /// assert!(!ResourceStatus::New.can_transition_to(ResourceStatus::Lent));
    /// assert!(!ResourceStatus::Destroyed.can_transition_to(ResourceStatus::Available));
    /// ```
    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        matches!(
            (self, next),
            (New, FastDispatch)
                | (FastDispatch, Available)
                | (FastDispatch, Lent)
                | (Available, Lent)
                | (Lent, FastDispatch)
        ) || (self != Destroyed && next == Destroyed)
    }
}

/// Pool-scoped identity stamped on every resource the pool creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResourceId {
    pool: usize,
    sequence: u64,
}

impl ResourceId {
    pub(crate) fn new(pool: usize, sequence: u64) -> Self {
        Self { pool, sequence }
    }

    /// Identity of the pool that created the resource
    pub fn pool_id(&self) -> usize {
        self.pool
    }

    /// Creation sequence number within that pool
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pool, self.sequence)
    }
}

/// One-shot callback run after a resource changes status
pub(crate) type StatusListener = Box<dyn FnOnce(ResourceId, ResourceStatus) + Send>;

/// A factory-produced resource together with its identity and status.
///
/// The resource value is absent while it is lent out or held by an
/// outstanding validation call.
pub(crate) struct ResourceHandle<R> {
    identity: ResourceId,
    resource: Option<R>,
    status: ResourceStatus,
    listeners: Vec<StatusListener>,
}

impl<R> ResourceHandle<R> {
    pub fn new(identity: ResourceId, resource: R) -> Self {
        Self {
            identity,
            resource: Some(resource),
            status: ResourceStatus::New,
            listeners: Vec::new(),
        }
    }

    pub fn identity(&self) -> ResourceId {
        self.identity
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub fn resource(&self) -> Option<&R> {
        self.resource.as_ref()
    }

    pub fn take_resource(&mut self) -> Option<R> {
        self.resource.take()
    }

    pub fn put_resource(&mut self, resource: R) {
        self.resource = Some(resource);
    }

    /// Register a listener for the next status change
    pub fn on_status_change(&mut self, listener: StatusListener) {
        self.listeners.push(listener);
    }

    /// Change status, returning the listeners the caller must run later.
    ///
    /// Setting the current status again is a no-op and fires nothing.
    pub fn set_status(&mut self, next: ResourceStatus) -> PoolResult<Vec<StatusListener>> {
        if next == self.status {
            return Ok(Vec::new());
        }
        if !self.status.can_transition_to(next) {
            return Err(PoolError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(std::mem::take(&mut self.listeners))
    }
}
