#![forbid(unsafe_code)]

//! Observation adapters: how the engine learns about container mutations.
//!
//! An [`ObservationAdapter`] attaches to containers and buffers the events they
//! emit until the engine drains them with [`take_pending`]. Delivery is always
//! deferred: the container finishes its mutation and returns to the caller
//! before the engine sees anything.
//!
//! [`WatchAdapter`] is the default implementation. It attaches one shared
//! pending queue as a [`MutationSink`] to every watched container.
//!
//! # Written containers
//!
//! A container written into a watched one only becomes watched once the
//! engine ingests that write. Until then, `WatchAdapter` listens to it (and
//! everything nested in it) on its own, so mutations made before the next
//! flush are buffered in order behind the write. After each ingested batch
//! the engine calls [`settle`]; containers it did not [`watch`] are released.
//!
//! [`take_pending`]: ObservationAdapter::take_pending
//! [`settle`]: ObservationAdapter::settle
//! [`watch`]: ObservationAdapter::watch

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use crate::container::{Container, ContainerId, WeakContainer};
use crate::event::{MutationEvent, MutationSink};

/// Watched-set size below which dead entries are not swept.
const PRUNE_FLOOR: usize = 64;

/// The host cannot deliver change notifications.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported environment: {reason}")]
pub struct UnsupportedEnvironment {
    pub reason: String,
}

impl UnsupportedEnvironment {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Source of mutation events for the engine.
pub trait ObservationAdapter {
    /// Verify that this adapter can deliver notifications at all.
    ///
    /// # Errors
    ///
    /// [`UnsupportedEnvironment`] when it cannot; the engine refuses to start.
    fn check_support(&self) -> Result<(), UnsupportedEnvironment> {
        Ok(())
    }

    /// Start delivering events for `container`. Returns false if it was
    /// already watched.
    fn watch(&mut self, container: &Container) -> bool;

    /// Stop delivering events for `container`. Returns false if it was not
    /// watched.
    fn unwatch(&mut self, container: &Container) -> bool;

    fn is_watching(&self, id: ContainerId) -> bool;

    /// Number of buffered, not yet drained events.
    fn pending_count(&self) -> usize;

    /// Drain buffered events in emission order.
    fn take_pending(&mut self) -> Vec<MutationEvent>;

    /// Called after a drained batch has been ingested. Release anything
    /// attached ahead of the engine that it did not [`watch`](Self::watch).
    fn settle(&mut self) {}
}

// ============================================================================
// Pending queue
// ============================================================================

struct PendingQueue {
    events: RefCell<VecDeque<MutationEvent>>,
    this: Weak<PendingQueue>,
    /// Written containers attached on delivery, not yet claimed by `watch`.
    provisional: RefCell<Vec<Container>>,
}

impl PendingQueue {
    fn new() -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            events: RefCell::default(),
            this: this.clone(),
            provisional: RefCell::default(),
        })
    }

    fn attach_written(&self, sink: &Rc<dyn MutationSink>, container: Container) {
        if !container.attach(sink) {
            return;
        }
        for (_, child) in container.child_containers() {
            self.attach_written(sink, child);
        }
        self.provisional.borrow_mut().push(container);
    }
}

impl MutationSink for PendingQueue {
    fn deliver(&self, event: MutationEvent) {
        if let Some(this) = self.this.upgrade() {
            let sink: Rc<dyn MutationSink> = this;
            for value in event.mutation.written_values() {
                if let Some(child) = value.as_container() {
                    self.attach_written(&sink, child);
                }
            }
        }
        self.events.borrow_mut().push_back(event);
    }
}

// ============================================================================
// WatchAdapter
// ============================================================================

/// Default adapter: a single buffered sink attached to each watched container.
///
/// Watched containers are held weakly. Entries for dropped containers are
/// swept whenever the watched set doubles, or on [`prune`](Self::prune).
pub struct WatchAdapter {
    queue: Rc<PendingQueue>,
    sink: Rc<dyn MutationSink>,
    watched: HashMap<ContainerId, WeakContainer>,
    prune_at: usize,
}

impl std::fmt::Debug for WatchAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchAdapter")
            .field("watched", &self.watched.len())
            .field("pending", &self.pending_count())
            .field("provisional", &self.queue.provisional.borrow().len())
            .finish()
    }
}

impl Default for WatchAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchAdapter {
    #[must_use]
    pub fn new() -> Self {
        let queue = PendingQueue::new();
        let sink: Rc<dyn MutationSink> = queue.clone();
        Self {
            queue,
            sink,
            watched: HashMap::new(),
            prune_at: PRUNE_FLOOR,
        }
    }

    /// Number of containers currently watched, counting dropped ones not yet
    /// swept.
    #[must_use]
    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Forget watched containers that have been dropped. Returns how many
    /// entries were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.watched.len();
        self.watched.retain(|_, weak| weak.is_alive());
        self.prune_at = (self.watched.len() * 2).max(PRUNE_FLOOR);
        let pruned = before - self.watched.len();
        if pruned > 0 {
            tracing::trace!(pruned, "dropped containers forgotten");
        }
        pruned
    }
}

impl ObservationAdapter for WatchAdapter {
    fn watch(&mut self, container: &Container) -> bool {
        container.attach(&self.sink);
        let added = self
            .watched
            .insert(container.id(), container.downgrade())
            .is_none();
        if added {
            tracing::trace!(container = %container.id(), "watch");
            if self.watched.len() >= self.prune_at {
                self.prune();
            }
        }
        added
    }

    fn unwatch(&mut self, container: &Container) -> bool {
        container.detach(&self.sink);
        let removed = self.watched.remove(&container.id()).is_some();
        if removed {
            tracing::trace!(container = %container.id(), "unwatch");
        }
        removed
    }

    fn is_watching(&self, id: ContainerId) -> bool {
        self.watched.contains_key(&id)
    }

    fn pending_count(&self) -> usize {
        self.queue.events.borrow().len()
    }

    fn take_pending(&mut self) -> Vec<MutationEvent> {
        self.queue.events.borrow_mut().drain(..).collect()
    }

    fn settle(&mut self) {
        let provisional = std::mem::take(&mut *self.queue.provisional.borrow_mut());
        let mut released = 0;
        for container in provisional {
            if !self.watched.contains_key(&container.id()) {
                container.detach(&self.sink);
                released += 1;
            }
        }
        if released > 0 {
            tracing::trace!(released, "unclaimed written containers released");
        }
    }
}
