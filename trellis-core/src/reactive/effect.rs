//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. The function is memoized and bound to a [`SubscriptionController`].
//!    Every run reports the tags it read to the controller, which keeps the
//!    tag subscriptions in sync.
//!
//! 3. When a dependency changes, the next flush fires the controller. The
//!    effect runs its pending teardown, then the function again.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.
//!
//! # Teardown
//!
//! The function receives an [`OnInvalidate`] handle. A teardown registered
//! through it runs before the next run, or when the effect is disposed,
//! exactly once.
//!
//! # Collection
//!
//! [`Runtime::collect_effects`] gathers every effect created while a closure
//! runs into an [`EffectBatch`] instead of subscribing them. The owner of
//! the batch decides when to subscribe, unsubscribe and dispose them as a
//! group. If the closure fails, the effects collected so far are disposed.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::memo::{Memo, MemoState};
use super::runtime::Runtime;
use super::signal::Readable;
use super::subscriber::{SubscriberId, SubscriptionController};
use crate::error::{Result, TrackingError};

/// Something a collection batch can manage as a group.
pub trait Subscription {
    /// Register on the observed tags.
    fn subscribe(&self);

    /// Deregister from the observed tags, running any pending teardown.
    fn unsubscribe(&self);

    /// Unsubscribe permanently.
    fn dispose(&self);

    /// Check whether [`Subscription::dispose`] has been called.
    fn is_disposed(&self) -> bool;
}

/// Registers teardown callbacks for the effect that is running.
pub struct OnInvalidate {
    controller: SubscriptionController,
}

impl OnInvalidate {
    /// Run `teardown` before the next run of the effect, or when it is
    /// disposed.
    ///
    /// Only the latest registration of a run is kept.
    pub fn register<F>(&self, teardown: F)
    where
        F: FnOnce() + 'static,
    {
        self.controller.set_cleanup(teardown);
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// The effect is disposed when [`Effect::dispose`] is called or when the
/// last handle to it is dropped.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use trellis_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(0);
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let effect = {
///     let (count, seen) = (count.clone(), seen.clone());
///     runtime.watch_effect(move |_| seen.borrow_mut().push(count.get()))
/// };
///
/// count.set(5);
/// runtime.flush();
/// assert_eq!(*seen.borrow(), vec![0, 5]);
///
/// effect.dispose();
/// count.set(6);
/// runtime.flush();
/// assert_eq!(*seen.borrow(), vec![0, 5]);
/// ```
#[must_use = "dropping the handle disposes the effect"]
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

struct EffectInner {
    controller: SubscriptionController,

    /// The user function, memoized so unchanged dependencies skip a run.
    body: Memo<()>,

    disposed: Cell<bool>,

    /// Number of times the function has run.
    runs: Cell<usize>,
}

impl EffectInner {
    fn run(&self) {
        if self.disposed.get() {
            return;
        }
        // Nothing it read has changed. The pending teardown stays in place.
        if self.body.state() == MemoState::Clean {
            return;
        }
        if let Some(teardown) = self.controller.take_cleanup() {
            teardown();
        }
        self.body.refresh();
        self.runs.set(self.runs.get() + 1);
    }
}

impl Subscription for EffectInner {
    fn subscribe(&self) {
        if !self.disposed.get() {
            self.controller.subscribe();
        }
    }

    fn unsubscribe(&self) {
        self.controller.unsubscribe();
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.controller.unsubscribe();
        tracing::debug!(
            subscriber = ?self.controller.id(),
            runs = self.runs.get(),
            "effect disposed"
        );
    }

    fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Effect {
    /// Create an effect and run it once.
    ///
    /// The effect subscribes to what it read, unless effects are being
    /// collected; then it is added to the active batch unsubscribed.
    ///
    /// Dropping the last handle disposes the effect.
    pub fn new<F>(runtime: &Runtime, f: F) -> Self
    where
        F: Fn(&OnInvalidate) + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<EffectInner>| {
            let weak = weak.clone();
            let controller = SubscriptionController::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.run();
                }
            });
            let on_invalidate = OnInvalidate {
                controller: controller.clone(),
            };
            let body =
                Memo::with_controller(runtime, move || f(&on_invalidate), controller.clone());

            EffectInner {
                controller,
                body,
                disposed: Cell::new(false),
                runs: Cell::new(0),
            }
        });

        // A panic here drops `inner`, which disposes the effect before it
        // ever subscribed.
        inner.run();

        let item: Rc<dyn Subscription> = inner.clone();
        if let Some(item) = runtime.collect(item) {
            item.subscribe();
        }

        Self { inner }
    }

    /// Get the subscriber ID of the effect's controller.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.controller.id()
    }

    /// Register on the observed tags. Idempotent; ignored once disposed.
    pub fn subscribe(&self) {
        self.inner.subscribe();
    }

    /// Deregister from the observed tags and run the pending teardown.
    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    /// Stop the effect for good and run its pending teardown.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Check if the effect is registered on its tags.
    pub fn is_subscribed(&self) -> bool {
        self.inner.controller.is_subscribed()
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    /// Get the number of tags read by the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.controller.tag_count()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("subscriber_id", &self.subscriber_id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("subscribed", &self.is_subscribed())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A lazily computed value that calls back when it becomes stale.
///
/// Unlike an effect, nothing re-runs on its own: the callback is told that
/// the value changed and decides when to read it again. This is the shape a
/// render function takes when a host framework owns the update cycle.
#[must_use = "dropping the handle disposes the observer"]
pub struct Observer<T> {
    inner: Rc<ObserverInner<T>>,
}

struct ObserverInner<T> {
    controller: SubscriptionController,
    memo: Memo<T>,
    disposed: Cell<bool>,
}

impl<T: 'static> Subscription for ObserverInner<T> {
    fn subscribe(&self) {
        if !self.disposed.get() {
            self.controller.subscribe();
        }
    }

    fn unsubscribe(&self) {
        self.controller.unsubscribe();
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.controller.unsubscribe();
        tracing::debug!(subscriber = ?self.controller.id(), "observer disposed");
    }

    fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}

impl<T> Drop for ObserverInner<T> {
    fn drop(&mut self) {
        if !self.disposed.replace(true) {
            self.controller.unsubscribe();
        }
    }
}

impl<T: Clone + 'static> Observer<T> {
    /// Current value, recomputed if something it read has changed.
    pub fn get(&self) -> T {
        self.inner.memo.get()
    }
}

impl<T: 'static> Observer<T> {
    /// Get the cache state of the observed computation.
    pub fn state(&self) -> MemoState {
        self.inner.memo.state()
    }

    /// Check if the observer is registered on its tags.
    pub fn is_subscribed(&self) -> bool {
        self.inner.controller.is_subscribed()
    }

    /// Register on the observed tags. Idempotent; ignored once disposed.
    pub fn subscribe(&self) {
        self.inner.subscribe();
    }

    /// Deregister from the observed tags.
    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    /// Stop observing for good.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the observer has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl<T: Clone + 'static> Readable<T> for Observer<T> {
    fn get(&self) -> T {
        Observer::get(self)
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("state", &self.state())
            .field("subscribed", &self.is_subscribed())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// An effect collection in progress.
#[derive(Default)]
pub(crate) struct Collector {
    items: Vec<Rc<dyn Subscription>>,
    disposers: Vec<Box<dyn FnOnce()>>,
}

/// Effects gathered by [`Runtime::collect_effects`], managed as a group.
///
/// Dropping the batch disposes every effect in it.
#[must_use = "dropping the batch disposes its effects"]
pub struct EffectBatch {
    items: Vec<Rc<dyn Subscription>>,
    disposers: Vec<Box<dyn FnOnce()>>,
}

impl EffectBatch {
    fn from_collector(collector: Collector) -> Self {
        Self {
            items: collector.items,
            disposers: collector.disposers,
        }
    }

    /// Subscribe every effect in the batch.
    pub fn subscribe_all(&self) {
        for item in &self.items {
            item.subscribe();
        }
    }

    /// Unsubscribe every effect in the batch, running pending teardowns.
    pub fn unsubscribe_all(&self) {
        for item in &self.items {
            item.unsubscribe();
        }
    }

    /// Dispose every effect, then run the registered dispose callbacks.
    ///
    /// Calling this again does nothing.
    pub fn dispose(&mut self) {
        if self.items.is_empty() && self.disposers.is_empty() {
            return;
        }
        tracing::debug!(
            effects = self.items.len(),
            callbacks = self.disposers.len(),
            "disposing effect batch"
        );
        for item in self.items.drain(..) {
            item.dispose();
        }
        for disposer in self.disposers.drain(..) {
            disposer();
        }
    }

    /// Number of effects in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check whether the batch holds no effects.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Drop for EffectBatch {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for EffectBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectBatch")
            .field("effects", &self.items.len())
            .field("callbacks", &self.disposers.len())
            .finish()
    }
}

/// Guard for an active collection.
///
/// If the collecting closure unwinds, the guard pops the collection and
/// disposes what it gathered.
struct CollectGuard {
    runtime: Runtime,
    depth: usize,
    finished: bool,
}

impl CollectGuard {
    fn enter(runtime: &Runtime) -> Self {
        let mut collectors = runtime.inner.collectors.borrow_mut();
        collectors.push(Collector::default());
        Self {
            runtime: runtime.clone(),
            depth: collectors.len(),
            finished: false,
        }
    }

    fn pop(&self) -> Collector {
        let mut collectors = self.runtime.inner.collectors.borrow_mut();
        debug_assert_eq!(
            collectors.len(),
            self.depth,
            "CollectGuard mismatch: expected depth {}, got {}",
            self.depth,
            collectors.len()
        );
        collectors.pop().unwrap_or_default()
    }

    fn finish(mut self) -> EffectBatch {
        self.finished = true;
        EffectBatch::from_collector(self.pop())
    }
}

impl Drop for CollectGuard {
    fn drop(&mut self) {
        if !self.finished {
            // The batch disposes itself as it goes out of scope.
            let _batch = EffectBatch::from_collector(self.pop());
        }
    }
}

impl Runtime {
    /// Create an effect and run it once. See [`Effect::new`].
    ///
    /// The effect lives as long as the returned handle, or a clone of it.
    /// Dropping the last handle disposes it, so keep the handle for as long
    /// as the effect should keep running.
    #[must_use = "dropping the handle disposes the effect"]
    pub fn watch_effect<F>(&self, f: F) -> Effect
    where
        F: Fn(&OnInvalidate) + 'static,
    {
        Effect::new(self, f)
    }

    /// Memoize `compute` and call `on_invalidate` whenever something it read
    /// changes.
    ///
    /// The computation runs on the first [`Observer::get`]. The observer
    /// subscribes right away, unless effects are being collected.
    ///
    /// Dropping the last handle disposes the observer.
    #[must_use = "dropping the handle disposes the observer"]
    pub fn observe<T, F, G>(&self, compute: F, on_invalidate: G) -> Observer<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
        G: Fn() + 'static,
    {
        let controller = SubscriptionController::new(on_invalidate);
        let inner = Rc::new(ObserverInner {
            memo: Memo::with_controller(self, compute, controller.clone()),
            controller,
            disposed: Cell::new(false),
        });

        let item: Rc<dyn Subscription> = inner.clone();
        if let Some(item) = self.collect(item) {
            item.subscribe();
        }

        Observer { inner }
    }

    /// Run `f` while collecting every effect it creates.
    ///
    /// The collected effects are not subscribed. If `f` panics, they are
    /// disposed before the panic continues. Dropping the returned batch
    /// disposes them as well.
    #[must_use = "dropping the batch disposes its effects"]
    pub fn collect_effects<R>(&self, f: impl FnOnce() -> R) -> (R, EffectBatch) {
        let guard = CollectGuard::enter(self);
        let value = f();
        (value, guard.finish())
    }

    /// Like [`Runtime::collect_effects`], but disposes the collected effects
    /// when `f` returns an error.
    #[must_use = "dropping the batch disposes its effects"]
    pub fn try_collect_effects<R, E>(
        &self,
        f: impl FnOnce() -> std::result::Result<R, E>,
    ) -> std::result::Result<(R, EffectBatch), E> {
        let (result, mut batch) = self.collect_effects(f);
        match result {
            Ok(value) => Ok((value, batch)),
            Err(err) => {
                batch.dispose();
                Err(err)
            }
        }
    }

    /// Run `f` when the batch being collected is disposed.
    pub fn on_dispose<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + 'static,
    {
        match self.inner.collectors.borrow_mut().last_mut() {
            Some(collector) => {
                collector.disposers.push(Box::new(f));
                Ok(())
            }
            None => Err(TrackingError::OutOfScope {
                operation: "on_dispose",
                requirement: "effects are being collected",
            }),
        }
    }

    /// Check whether effects are being collected.
    pub fn is_collecting(&self) -> bool {
        !self.inner.collectors.borrow().is_empty()
    }

    /// Add `item` to the active collection.
    ///
    /// Hands the item back if nothing is collecting.
    fn collect(&self, item: Rc<dyn Subscription>) -> Option<Rc<dyn Subscription>> {
        match self.inner.collectors.borrow_mut().last_mut() {
            Some(collector) => {
                collector.items.push(item);
                None
            }
            None => Some(item),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
