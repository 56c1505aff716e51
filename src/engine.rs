//! The pool engine.
//!
//! A single Tokio task owns the resource registry, the available queue and
//! the pending acquires. Everything else talks to it through its mailbox, so
//! state is only ever mutated between two mailbox reads. Factory calls and
//! timers run in their own tasks and report back as messages; work that must
//! wait for the next turn is posted to the engine's own mailbox.

use crate::config::PoolConfiguration;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::factory::Factory;
use crate::metrics::MetricsTracker;
use crate::pool::{PoolStats, PoolStatus, Pooled};
use crate::request::PendingRequest;
use crate::resource::{ResourceHandle, ResourceId, ResourceStatus, StatusListener};
use crate::ring_buffer::RingBuffer;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

pub(crate) type Reply<T> = oneshot::Sender<PoolResult<T>>;
pub(crate) type Mailbox<R> = mpsc::UnboundedSender<Command<R>>;

/// Messages understood by the engine
pub(crate) enum Command<R> {
    Start {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    Acquire {
        reply: Reply<Pooled<R>>,
    },
    Release {
        id: ResourceId,
        resource: R,
        reply: Option<Reply<()>>,
    },
    Detach {
        id: ResourceId,
    },
    Inspect {
        reply: oneshot::Sender<PoolStats>,
    },
    Created {
        result: Result<R, BoxError>,
        eager: bool,
    },
    Validated {
        id: ResourceId,
        resource: R,
        valid: bool,
        purpose: Validation<R>,
    },
    Expired {
        request: u64,
    },
    Deliver {
        request: PendingRequest<Pooled<R>>,
        id: ResourceId,
    },
    Notify {
        id: ResourceId,
        status: ResourceStatus,
        listeners: Vec<StatusListener>,
    },
    DestroyReturned {
        id: ResourceId,
    },
}

/// Why a resource is being validated
pub(crate) enum Validation<R> {
    Borrow(Reply<Pooled<R>>),
    Release(Option<Reply<()>>),
}

pub(crate) struct Engine<F: Factory> {
    pool_id: usize,
    factory: Arc<F>,
    config: Arc<PoolConfiguration>,
    metrics: Arc<MetricsTracker>,
    status: PoolStatus,
    all: RingBuffer<ResourceHandle<F::Resource>>,
    available: RingBuffer<ResourceId>,
    pending: Vec<PendingRequest<Pooled<F::Resource>>>,
    creating: usize,
    next_sequence: u64,
    next_request: u64,
    start_reply: Option<Reply<()>>,
    stop_waiters: Vec<Reply<()>>,
    mailbox: mpsc::WeakUnboundedSender<Command<F::Resource>>,
}

impl<F: Factory> Engine<F> {
    pub fn new(
        pool_id: usize,
        factory: Arc<F>,
        config: Arc<PoolConfiguration>,
        metrics: Arc<MetricsTracker>,
        mailbox: mpsc::WeakUnboundedSender<Command<F::Resource>>,
    ) -> Self {
        Self {
            pool_id,
            factory,
            all: RingBuffer::new(config.max_size),
            available: RingBuffer::new(config.max_size),
            config,
            metrics,
            status: PoolStatus::NotStarted,
            pending: Vec::new(),
            creating: 0,
            next_sequence: 0,
            next_request: 0,
            start_reply: None,
            stop_waiters: Vec::new(),
            mailbox,
        }
    }

    /// Serve the mailbox until every sender is gone
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command<F::Resource>>) {
        while let Some(command) = inbox.recv().await {
            self.handle(command);
        }
        if self.status == PoolStatus::Started {
            debug!(pool = self.pool_id, "all pool handles dropped, shutting down");
            if let Err(error) = self.stop_now() {
                error!(pool = self.pool_id, %error, "shutdown after last handle failed");
            }
        }
    }

    fn handle(&mut self, command: Command<F::Resource>) {
        match command {
            Command::Start { reply } => self.start(reply),
            Command::Stop { reply } => self.stop(reply),
            Command::Acquire { reply } => self.acquire(reply),
            Command::Release {
                id,
                resource,
                reply,
            } => self.release(id, resource, reply),
            Command::Detach { id } => self.detach(id),
            Command::Inspect { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Created { result, eager } => self.on_created(result, eager),
            Command::Validated {
                id,
                resource,
                valid,
                purpose,
            } => self.on_validated(id, resource, valid, purpose),
            Command::Expired { request } => self.on_expired(request),
            Command::Deliver { request, id } => self.deliver(request, id),
            Command::Notify {
                id,
                status,
                listeners,
            } => {
                for listener in listeners {
                    listener(id, status);
                }
            }
            Command::DestroyReturned { id } => {
                // Only once the resource is back; the release path may already have destroyed it
                let returned = self
                    .handle_mut(id)
                    .is_some_and(|handle| handle.resource().is_some());
                if returned {
                    self.destroy(id);
                }
            }
        }
    }

    // Lifecycle

    fn transition(&mut self, next: PoolStatus) -> PoolResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(PoolError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        debug!(pool = self.pool_id, from = ?self.status, to = ?next, "pool status changed");
        self.status = next;
        Ok(())
    }

    fn start(&mut self, reply: Reply<()>) {
        if self.status != PoolStatus::NotStarted {
            let _ = reply.send(Err(PoolError::PoolAlreadyStarted));
            return;
        }
        if let Err(error) = self.transition(PoolStatus::Starting) {
            let _ = reply.send(Err(error));
            return;
        }
        self.start_reply = Some(reply);
        self.populate(Ok(()));
    }

    /// Drive eager population one creation at a time
    fn populate(&mut self, outcome: PoolResult<()>) {
        if let Err(error) = outcome {
            self.finish_start(Err(error));
            return;
        }
        let wants_more =
            self.stop_waiters.is_empty() && self.all.size() < self.config.min_size;
        if !wants_more || !self.spawn_create(true) {
            self.finish_start(Ok(()));
        }
    }

    fn finish_start(&mut self, mut outcome: PoolResult<()>) {
        if let Err(error) = self.transition(PoolStatus::Started) {
            outcome = Err(error);
        }
        if let Some(reply) = self.start_reply.take() {
            let _ = reply.send(outcome);
        }
        if !self.stop_waiters.is_empty() {
            let result = self.stop_now();
            for waiter in std::mem::take(&mut self.stop_waiters) {
                let _ = waiter.send(match &result {
                    Ok(()) => Ok(()),
                    Err(_) => Err(PoolError::InvalidStateTransition {
                        from: self.status,
                        to: PoolStatus::Stopping,
                    }),
                });
            }
        }
    }

    fn stop(&mut self, reply: Reply<()>) {
        match self.status {
            PoolStatus::Starting => self.stop_waiters.push(reply),
            PoolStatus::Started => {
                let _ = reply.send(self.stop_now());
            }
            PoolStatus::Stopping | PoolStatus::Stopped => {
                let _ = reply.send(Ok(()));
            }
            PoolStatus::NotStarted => {
                let _ = reply.send(Err(PoolError::InvalidStateTransition {
                    from: PoolStatus::NotStarted,
                    to: PoolStatus::Stopping,
                }));
            }
        }
    }

    /// Shut down without waiting for lent resources to come back
    fn stop_now(&mut self) -> PoolResult<()> {
        self.transition(PoolStatus::Stopping)?;

        while let Some(id) = self.available.shift() {
            self.destroy(id);
        }

        for request in self.pending.drain(..) {
            request.reject(PoolError::PoolShuttingDown);
        }

        let mailbox = self.mailbox.clone();
        let mut lent = 0;
        self.all.for_each_mut(|handle| {
            if handle.status() != ResourceStatus::Lent {
                return;
            }
            lent += 1;
            let mailbox = mailbox.clone();
            handle.on_status_change(Box::new(move |id, _| {
                if let Some(mailbox) = mailbox.upgrade() {
                    let _ = mailbox.send(Command::DestroyReturned { id });
                }
            }));
        });
        debug!(pool = self.pool_id, lent, "destroying lent resources once returned");

        self.transition(PoolStatus::Stopped)
    }

    // Acquire

    fn acquire(&mut self, reply: Reply<Pooled<F::Resource>>) {
        if self.status != PoolStatus::Started {
            let _ = reply.send(Err(PoolError::InvalidPoolState {
                expected: PoolStatus::Started,
                actual: self.status,
            }));
            return;
        }
        self.borrow_next(reply);
    }

    fn borrow_next(&mut self, reply: Reply<Pooled<F::Resource>>) {
        while let Some(id) = self.available.shift() {
            let Some(resource) = self.handle_mut(id).and_then(|handle| handle.take_resource())
            else {
                error!(pool = self.pool_id, resource = %id, "available resource is not tracked");
                continue;
            };
            if self.config.test_on_borrow {
                self.validate(id, resource, Validation::Borrow(reply));
            } else {
                self.lend(id, resource, reply);
            }
            return;
        }
        self.enqueue(reply);
    }

    fn lend(&mut self, id: ResourceId, resource: F::Resource, reply: Reply<Pooled<F::Resource>>) {
        if !self.mark(id, ResourceStatus::Lent) {
            if let Some(handle) = self.handle_mut(id) {
                handle.put_resource(resource);
            }
            self.enqueue(reply);
            return;
        }
        match reply.send(Ok(self.pooled(id, resource))) {
            Ok(()) => {
                self.metrics.total_acquired.fetch_add(1, Ordering::Relaxed);
            }
            Err(Ok(pooled)) => self.reclaim(pooled),
            Err(Err(_)) => {}
        }
    }

    fn enqueue(&mut self, reply: Reply<Pooled<F::Resource>>) {
        self.prune_abandoned();
        if self.pending.len() >= self.config.max_waiting_clients {
            self.metrics.waiters_rejected.fetch_add(1, Ordering::Relaxed);
            let _ = reply.send(Err(PoolError::MaxWaitingClientsReached));
            return;
        }
        self.grow();

        let Some(mailbox) = self.mailbox.upgrade() else {
            let _ = reply.send(Err(PoolError::PoolClosed));
            return;
        };
        let id = self.next_request;
        self.next_request += 1;
        let request = PendingRequest::new(id, reply, self.config.acquire_timeout, move |request| {
            let _ = mailbox.send(Command::Expired { request });
        });
        self.pending.push(request);
    }

    fn prune_abandoned(&mut self) {
        let (abandoned, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|request| request.is_abandoned());
        self.pending = waiting;
        for request in abandoned {
            request.cancel();
        }
    }

    fn on_expired(&mut self, request: u64) {
        let Some(index) = self.pending.iter().position(|pending| pending.id() == request) else {
            return;
        };
        self.metrics.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
        self.pending.remove(index).expire();
    }

    fn deliver(&mut self, request: PendingRequest<Pooled<F::Resource>>, id: ResourceId) {
        if self.status != PoolStatus::Started {
            request.reject(PoolError::PoolShuttingDown);
            self.destroy(id);
            return;
        }
        let Some(resource) = self.handle_mut(id).and_then(|handle| handle.take_resource()) else {
            error!(pool = self.pool_id, resource = %id, "dispatched resource is not tracked");
            self.pending.push(request);
            return;
        };
        let pooled = self.pooled(id, resource);
        match request.resolve(pooled) {
            Ok(()) => {
                self.metrics.total_acquired.fetch_add(1, Ordering::Relaxed);
            }
            Err(pooled) => self.reclaim(pooled),
        }
    }

    /// Take back a resource whose caller left before it arrived
    fn reclaim(&mut self, pooled: Pooled<F::Resource>) {
        let Some((id, resource)) = pooled.into_parts() else {
            return;
        };
        let Some(handle) = self.handle_mut(id) else {
            self.spawn_destroy(resource);
            return;
        };
        handle.put_resource(resource);
        debug!(pool = self.pool_id, resource = %id, "caller left, resource returned");
        self.dispatch(id);
    }

    // Release

    fn release(&mut self, id: ResourceId, resource: F::Resource, reply: Option<Reply<()>>) {
        let Some(handle) = self.all.find_mut(|handle| handle.identity() == id) else {
            debug!(pool = self.pool_id, resource = %id, "ignoring release of untracked resource");
            respond(reply, Ok(()));
            return;
        };
        if self.config.test_on_release {
            self.validate(id, resource, Validation::Release(reply));
            return;
        }
        handle.put_resource(resource);
        self.metrics.total_released.fetch_add(1, Ordering::Relaxed);
        self.dispatch(id);
        respond(reply, Ok(()));
    }

    fn detach(&mut self, id: ResourceId) {
        let Some(mut handle) = self.all.fast_remove_by(|handle| handle.identity() == id) else {
            return;
        };
        self.available.fast_remove(&id);
        match handle.set_status(ResourceStatus::Destroyed) {
            Ok(listeners) => self.notify(id, ResourceStatus::Destroyed, listeners),
            Err(error) => warn!(pool = self.pool_id, resource = %id, %error, "detaching resource"),
        }
        debug!(pool = self.pool_id, resource = %id, "resource detached from pool");
        self.ensure_minimum();
    }

    // Validation

    fn validate(&mut self, id: ResourceId, mut resource: F::Resource, purpose: Validation<F::Resource>) {
        let Some(mailbox) = self.mailbox.upgrade() else {
            self.on_validated(id, resource, true, purpose);
            return;
        };
        let factory = Arc::clone(&self.factory);
        tokio::spawn(async move {
            let valid = factory.validate(&mut resource).await;
            let _ = mailbox.send(Command::Validated {
                id,
                resource,
                valid,
                purpose,
            });
        });
    }

    fn on_validated(
        &mut self,
        id: ResourceId,
        resource: F::Resource,
        valid: bool,
        purpose: Validation<F::Resource>,
    ) {
        let started = self.status == PoolStatus::Started;
        let Some(handle) = self.all.find_mut(|handle| handle.identity() == id) else {
            // Nothing tracks it any more
            self.spawn_destroy(resource);
            match purpose {
                Validation::Borrow(reply) => self.acquire(reply),
                Validation::Release(reply) => respond(reply, Ok(())),
            }
            return;
        };

        if !valid {
            handle.put_resource(resource);
            self.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
            warn!(pool = self.pool_id, resource = %id, "resource failed validation");
            self.destroy(id);
            match purpose {
                Validation::Borrow(reply) => self.acquire(reply),
                Validation::Release(reply) => {
                    self.metrics.total_released.fetch_add(1, Ordering::Relaxed);
                    respond(reply, Ok(()));
                }
            }
            return;
        }

        match purpose {
            Validation::Borrow(reply) => {
                if started {
                    self.lend(id, resource, reply);
                } else {
                    handle.put_resource(resource);
                    self.destroy(id);
                    let _ = reply.send(Err(PoolError::PoolShuttingDown));
                }
            }
            Validation::Release(reply) => {
                handle.put_resource(resource);
                self.metrics.total_released.fetch_add(1, Ordering::Relaxed);
                self.dispatch(id);
                respond(reply, Ok(()));
            }
        }
    }

    // Dispatch, creation and destruction

    /// Hand a fresh or returned resource to the newest waiter, or park it
    fn dispatch(&mut self, id: ResourceId) {
        if matches!(self.status, PoolStatus::Stopping | PoolStatus::Stopped) {
            self.destroy(id);
            return;
        }
        if !self.mark(id, ResourceStatus::FastDispatch) {
            return;
        }

        while let Some(request) = self.pending.pop() {
            if request.is_abandoned() {
                request.cancel();
                continue;
            }
            if self.mark(id, ResourceStatus::Lent) {
                debug!(pool = self.pool_id, resource = %id, request = request.id(), "resource dispatched to waiter");
                self.defer(Command::Deliver { request, id });
            } else {
                self.pending.push(request);
            }
            return;
        }

        if self.mark(id, ResourceStatus::Available) {
            if let Err(error) = self.available.push(id) {
                error!(pool = self.pool_id, resource = %id, %error, "available queue overflow");
            }
        }
    }

    /// Start a background creation if the pool has room
    fn grow(&mut self) {
        if self.all.size() + self.creating < self.all.capacity() {
            self.spawn_create(false);
        }
    }

    /// Top the pool back up to its minimum size
    fn ensure_minimum(&mut self) {
        if self.status != PoolStatus::Started {
            return;
        }
        while self.all.size() + self.creating < self.config.min_size {
            if !self.spawn_create(false) {
                break;
            }
        }
    }

    fn spawn_create(&mut self, eager: bool) -> bool {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return false;
        };
        self.creating += 1;
        let factory = Arc::clone(&self.factory);
        tokio::spawn(async move {
            let result = factory
                .create()
                .await
                .map_err(|error| Box::new(error) as BoxError);
            let _ = mailbox.send(Command::Created { result, eager });
        });
        true
    }

    fn on_created(&mut self, result: Result<F::Resource, BoxError>, eager: bool) {
        self.creating = self.creating.saturating_sub(1);
        let outcome = match result {
            Ok(resource) => {
                self.add(resource);
                Ok(())
            }
            Err(error) => {
                self.metrics.creation_failures.fetch_add(1, Ordering::Relaxed);
                if !eager {
                    warn!(pool = self.pool_id, %error, "background resource creation failed");
                }
                Err(PoolError::Factory(error))
            }
        };
        if eager {
            self.populate(outcome);
        }
    }

    fn add(&mut self, resource: F::Resource) {
        if self.all.is_full() {
            debug!(pool = self.pool_id, "pool is full, discarding created resource");
            self.spawn_destroy(resource);
            return;
        }
        let id = ResourceId::new(self.pool_id, self.next_sequence);
        self.next_sequence += 1;
        if let Err(error) = self.all.push(ResourceHandle::new(id, resource)) {
            error!(pool = self.pool_id, resource = %id, %error, "registry overflow");
            return;
        }
        self.metrics.total_created.fetch_add(1, Ordering::Relaxed);
        debug!(pool = self.pool_id, resource = %id, "resource created");
        self.dispatch(id);
    }

    /// Remove a resource for good. A no-op for resources already gone.
    fn destroy(&mut self, id: ResourceId) {
        let Some(mut handle) = self.all.fast_remove_by(|handle| handle.identity() == id) else {
            return;
        };
        self.available.fast_remove(&id);
        match handle.set_status(ResourceStatus::Destroyed) {
            Ok(listeners) => self.notify(id, ResourceStatus::Destroyed, listeners),
            Err(error) => warn!(pool = self.pool_id, resource = %id, %error, "destroying resource"),
        }
        self.metrics.total_destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(pool = self.pool_id, resource = %id, "resource destroyed");
        match handle.take_resource() {
            Some(resource) => self.spawn_destroy(resource),
            None => warn!(pool = self.pool_id, resource = %id, "destroyed resource is still out on loan"),
        }
        self.ensure_minimum();
    }

    fn spawn_destroy(&self, resource: F::Resource) {
        let factory = Arc::clone(&self.factory);
        let pool = self.pool_id;
        tokio::spawn(async move {
            if let Err(error) = factory.destroy(resource).await {
                warn!(pool, %error, "factory failed to destroy resource");
            }
        });
    }

    // Helpers

    fn handle_mut(&mut self, id: ResourceId) -> Option<&mut ResourceHandle<F::Resource>> {
        self.all.find_mut(|handle| handle.identity() == id)
    }

    /// Set a resource's status, scheduling its listeners for the next turn
    fn mark(&mut self, id: ResourceId, status: ResourceStatus) -> bool {
        let pool = self.pool_id;
        let result = match self.handle_mut(id) {
            Some(handle) => handle.set_status(status),
            None => {
                error!(pool, resource = %id, ?status, "status change for untracked resource");
                return false;
            }
        };
        match result {
            Ok(listeners) => {
                self.notify(id, status, listeners);
                true
            }
            Err(error) => {
                error!(pool, resource = %id, %error, "rejected resource status change");
                false
            }
        }
    }

    fn notify(&self, id: ResourceId, status: ResourceStatus, listeners: Vec<StatusListener>) {
        if !listeners.is_empty() {
            self.defer(Command::Notify {
                id,
                status,
                listeners,
            });
        }
    }

    /// Post a command to be handled on a later turn
    fn defer(&self, command: Command<F::Resource>) {
        if let Some(mailbox) = self.mailbox.upgrade() {
            let _ = mailbox.send(command);
        }
    }

    fn pooled(&self, id: ResourceId, resource: F::Resource) -> Pooled<F::Resource> {
        Pooled::managed(id, resource, self.mailbox.upgrade())
    }

    fn stats(&self) -> PoolStats {
        let mut counts: HashMap<ResourceStatus, usize> =
            ResourceStatus::ALL.iter().map(|status| (*status, 0)).collect();
        self.all.for_each(|handle| {
            *counts.entry(handle.status()).or_insert(0) += 1;
        });
        PoolStats {
            status: self.status,
            size: self.all.size(),
            max_size: self.all.capacity(),
            min_size: self.config.min_size,
            pending: self.pending.len(),
            idle: self.available.size(),
            counts,
        }
    }
}

fn respond(reply: Option<Reply<()>>, result: PoolResult<()>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}
