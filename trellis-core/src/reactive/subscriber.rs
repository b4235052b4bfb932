//! Subscription Controllers
//!
//! A controller binds the tag set of a memoized computation to a persistent
//! side-effect callback. The memo reports its freshly observed tags after
//! every recomputation; while the controller is subscribed, exactly those
//! tags carry it as a subscriber.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::tag::{max_revision, Revision, Tag};

/// Unique identifier for a subscriber.
///
/// Each controller gets a unique ID when created. Tags key their subscriber
/// lists by it, and the scheduler uses it to fire each controller once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback fired when an observed tag changes.
pub type EffectFn = Rc<dyn Fn()>;

/// Callback run before the next firing or on unsubscribe.
pub type CleanupFn = Box<dyn FnOnce()>;

/// Manages the subscription of one effect callback to a set of tags.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct SubscriptionController {
    inner: Rc<ControllerInner>,
}

pub(crate) struct ControllerInner {
    id: SubscriberId,
    effect: EffectFn,
    cleanup: RefCell<Option<CleanupFn>>,
    tags: RefCell<SmallVec<[Tag; 4]>>,
    subscribed: Cell<bool>,
    /// Highest revision seen when the tags were last observed.
    last_revision: Cell<Option<Revision>>,
}

impl SubscriptionController {
    /// Create an unsubscribed controller with no observed tags.
    pub fn new<F>(effect: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self {
            inner: Rc::new(ControllerInner {
                id: SubscriberId::new(),
                effect: Rc::new(effect),
                cleanup: RefCell::new(None),
                tags: RefCell::new(SmallVec::new()),
                subscribed: Cell::new(false),
                last_revision: Cell::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ControllerInner>) -> Self {
        Self { inner }
    }

    /// Get the controller's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Check whether the effect is currently registered on its tags.
    pub fn is_subscribed(&self) -> bool {
        self.inner.subscribed.get()
    }

    /// Number of tags observed by the last computation.
    pub fn tag_count(&self) -> usize {
        self.inner.tags.borrow().len()
    }

    /// Install the cleanup to run before the next firing or on unsubscribe.
    ///
    /// Replaces any cleanup that has not run yet.
    pub fn set_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() + 'static,
    {
        *self.inner.cleanup.borrow_mut() = Some(Box::new(cleanup));
    }

    /// Remove the pending cleanup, if any, without running it.
    pub fn take_cleanup(&self) -> Option<CleanupFn> {
        self.inner.cleanup.borrow_mut().take()
    }

    /// Check whether a cleanup is waiting to run.
    pub fn has_cleanup(&self) -> bool {
        self.inner.cleanup.borrow().is_some()
    }

    /// Replace the observed tags after a recomputation.
    ///
    /// While subscribed, the old tags are released before the new ones are
    /// subscribed, so the controller is never registered on a stale set.
    pub fn set_observed_tags(
        &self,
        tags: impl IntoIterator<Item = Tag>,
        revision: Option<Revision>,
    ) {
        let tags: SmallVec<[Tag; 4]> = tags.into_iter().collect();
        if self.is_subscribed() {
            self.unsubscribe_from_tags();
            *self.inner.tags.borrow_mut() = tags;
            self.subscribe_to_tags();
        } else {
            *self.inner.tags.borrow_mut() = tags;
        }
        self.inner.last_revision.set(revision);
    }

    /// Subscribe to the observed tags. Idempotent.
    ///
    /// If a tag changed between the last observation and this call, the
    /// effect fires once, synchronously, before this returns. The catch-up
    /// run is untracked: its reads never reach an enclosing tracked scope.
    pub fn subscribe(&self) {
        if self.is_subscribed() {
            return;
        }
        self.subscribe_to_tags();
        self.inner.subscribed.set(true);

        let current = max_revision(self.inner.tags.borrow().iter());
        if current.is_none() || current <= self.inner.last_revision.get() {
            return;
        }
        tracing::trace!(subscriber = ?self.id(), "tags advanced before subscribe; catching up");
        let runtime = self.inner.tags.borrow().first().map(|tag| tag.runtime().clone());
        match runtime {
            Some(runtime) => runtime.untrack(|| self.notify()),
            None => self.notify(),
        }
    }

    /// Unsubscribe from the observed tags. Idempotent.
    ///
    /// A pending cleanup runs exactly once, whether or not the controller
    /// was subscribed.
    pub fn unsubscribe(&self) {
        if self.is_subscribed() {
            self.unsubscribe_from_tags();
            self.inner.subscribed.set(false);
        }
        if let Some(cleanup) = self.take_cleanup() {
            cleanup();
        }
    }

    /// Fire the effect callback.
    pub fn notify(&self) {
        (self.inner.effect)();
    }

    fn subscribe_to_tags(&self) {
        let weak = Rc::downgrade(&self.inner);
        for tag in self.inner.tags.borrow().iter() {
            tag.subscribe(self.inner.id, weak.clone());
        }
        tracing::trace!(subscriber = ?self.id(), tags = self.tag_count(), "subscribed");
    }

    fn unsubscribe_from_tags(&self) {
        for tag in self.inner.tags.borrow().iter() {
            tag.unsubscribe(self.inner.id);
        }
        tracing::trace!(subscriber = ?self.id(), tags = self.tag_count(), "unsubscribed");
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if self.subscribed.get() {
            for tag in self.tags.get_mut().iter() {
                tag.unsubscribe(self.id);
            }
        }
    }
}

impl fmt::Debug for SubscriptionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionController")
            .field("id", &self.id())
            .field("subscribed", &self.is_subscribed())
            .field("tag_count", &self.tag_count())
            .field("has_cleanup", &self.has_cleanup())
            .finish()
    }
}
