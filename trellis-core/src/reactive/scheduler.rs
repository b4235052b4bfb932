//! Flush Scheduler
//!
//! The scheduler coalesces tag invalidations into batched effect delivery.
//!
//! # Algorithm
//!
//! 1. When a tag with subscribers is dirtied, it is added to the pending set.
//! 2. The first pending tag of a turn requests a flush (see [`FlushMode`]);
//!    further tags in the same turn ride along with that request.
//! 3. A flush snapshots and clears the pending set, unions the subscribers of
//!    every pending tag into one de-duplicated list and fires each of them
//!    once, in first-seen order.
//! 4. Tags dirtied while a flush runs are queued for the next flush instead
//!    of being folded into the current one.
//!
//! Subscribers are resolved when the flush runs, not when the tag is dirtied,
//! so a controller that unsubscribes in between is skipped.
//!
//! [`FlushMode`]: crate::FlushMode

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use super::runtime::Runtime;
use super::subscriber::{ControllerInner, SubscriberId, SubscriptionController};
use super::tag::{Tag, TagId, WeakTag};
use crate::config::FlushMode;
use crate::error::{Result, TrackingError};

/// Pending tags and the flush-requested flag.
pub(crate) struct Scheduler {
    pending: RefCell<IndexMap<TagId, WeakTag>>,
    scheduled: Cell<bool>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            pending: RefCell::new(IndexMap::new()),
            scheduled: Cell::new(false),
        }
    }

    /// Queue a tag. Returns `true` if a flush has to be requested.
    fn enqueue(&self, tag: &Tag) -> bool {
        self.pending
            .borrow_mut()
            .entry(tag.id())
            .or_insert_with(|| tag.downgrade());

        !self.scheduled.replace(true)
    }

    /// Take every pending tag that is still alive and clear the flush flag.
    fn take_pending(&self) -> Vec<Tag> {
        self.scheduled.set(false);
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        pending.values().filter_map(WeakTag::upgrade).collect()
    }

    fn len(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl Runtime {
    /// Queue a dirtied tag for the next flush.
    pub(crate) fn schedule(&self, tag: &Tag) {
        if self.inner.scheduler.enqueue(tag) {
            self.request_flush();
        }
    }

    fn request_flush(&self) {
        match self.inner.config.flush_mode {
            FlushMode::Manual => {
                tracing::trace!("flush requested; waiting for host");
            }
            FlushMode::LocalTask => {
                if tokio::runtime::Handle::try_current().is_err() {
                    tracing::warn!("no tokio runtime for local flush; waiting for host");
                    return;
                }
                tracing::trace!("flush requested; spawning local task");
                // Cleared while spawning: if `spawn_local` panics outside a
                // `LocalSet`, the next dirtied tag requests a flush again.
                let scheduled = &self.inner.scheduler.scheduled;
                scheduled.set(false);
                let runtime = self.clone();
                tokio::task::spawn_local(async move {
                    runtime.flush();
                });
                scheduled.set(true);
            }
        }
    }

    /// Deliver every pending invalidation.
    ///
    /// Each subscribed controller fires at most once, however many of its
    /// tags were dirtied. Returns the number of controllers fired.
    ///
    /// In [`FlushMode::LocalTask`] this is called automatically; the host
    /// may still call it to flush early.
    pub fn flush(&self) -> usize {
        let tags = self.inner.scheduler.take_pending();
        if tags.is_empty() {
            return 0;
        }

        let mut due: IndexMap<SubscriberId, Rc<ControllerInner>> = IndexMap::new();
        for tag in &tags {
            for (id, controller) in tag.subscribers() {
                if let Some(controller) = controller.upgrade() {
                    due.entry(id).or_insert(controller);
                }
            }
        }

        tracing::debug!(tags = tags.len(), effects = due.len(), "flushing");

        let mut fired = 0;
        for controller in due.into_values() {
            let controller = SubscriptionController::from_inner(controller);
            // An earlier effect in this flush may have unsubscribed it.
            if controller.is_subscribed() {
                self.untrack(|| controller.notify());
                fired += 1;
            }
        }

        tracing::debug!(fired, "flush complete");
        fired
    }

    /// Flush repeatedly until no invalidations remain.
    ///
    /// Effects that keep dirtying observed tags would otherwise loop forever;
    /// after `max_flush_rounds` rounds this gives up with
    /// [`TrackingError::FlushLimitExceeded`].
    pub fn flush_until_idle(&self) -> Result<usize> {
        let rounds = self.inner.config.max_flush_rounds;
        let mut fired = 0;

        for _ in 0..rounds {
            if self.inner.scheduler.len() == 0 {
                return Ok(fired);
            }
            fired += self.flush();
        }

        if self.inner.scheduler.len() == 0 {
            Ok(fired)
        } else {
            tracing::warn!(rounds, pending = self.pending_count(), "flush limit exceeded");
            Err(TrackingError::FlushLimitExceeded { rounds })
        }
    }

    /// Check whether a flush has been requested and not yet run.
    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.scheduler.scheduled.get()
    }

    /// Number of dirtied tags waiting for the next flush.
    pub fn pending_count(&self) -> usize {
        self.inner.scheduler.len()
    }
}
