//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when one of the
//! tags it read has moved on.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation in a fresh tracking
//!    scope and caches the result, the tags it read, and the highest
//!    revision among those tags.
//!
//! 2. On later accesses, if the highest revision of the cached tags is
//!    unchanged, the cached value is returned and the cached tags are
//!    bubbled into the caller's scope, so memos compose.
//!
//! 3. Otherwise the computation runs again and the tag set is rebuilt from
//!    scratch. A tag that is no longer read drops out from this point on.
//!
//! A computation that reads no tags at all is a constant: it runs once and
//! is never recomputed.
//!
//! # Why This Matters
//!
//! Memos are lazy. Dirtying a tag does not touch any memo; only memos that
//! are actually read again pay for a recomputation.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use smallvec::SmallVec;

use super::context::TrackingScope;
use super::runtime::Runtime;
use super::signal::Readable;
use super::subscriber::SubscriptionController;
use super::tag::{max_revision, Revision, Tag};

/// Cache state of a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The computation has never run.
    Uncomputed,

    /// The cached value is up-to-date.
    Clean,

    /// A tag read by the last run has been dirtied since.
    Stale,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let runtime = Runtime::new();
/// let name = runtime.signal("Preact");
/// let greeting = {
///     let name = name.clone();
///     runtime.memoize(move || format!("Hello {}", name.get()))
/// };
///
/// assert_eq!(greeting.get(), "Hello Preact");
/// name.set("World");
/// assert_eq!(greeting.get(), "Hello World");
/// ```
pub struct Memo<T> {
    inner: Rc<MemoInner<T>>,
}

struct MemoInner<T> {
    runtime: Runtime,

    /// The computation function.
    compute: Box<dyn Fn() -> T>,

    /// The last result (None if never computed).
    cache: RefCell<Option<Cached<T>>>,

    /// Receives the observed tags after every recomputation.
    controller: Option<SubscriptionController>,
}

struct Cached<T> {
    value: T,
    revision: Option<Revision>,
    tags: SmallVec<[Tag; 4]>,
}

impl<T: 'static> Memo<T> {
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(runtime: &Runtime, compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(runtime, compute, None)
    }

    /// Create a memo that reports its observed tags to `controller`.
    pub fn with_controller<F>(
        runtime: &Runtime,
        compute: F,
        controller: SubscriptionController,
    ) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(runtime, compute, Some(controller))
    }

    fn build<F>(runtime: &Runtime, compute: F, controller: Option<SubscriptionController>) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self {
            inner: Rc::new(MemoInner {
                runtime: runtime.clone(),
                compute: Box::new(compute),
                cache: RefCell::new(None),
                controller,
            }),
        }
    }

    /// Get the current cache state.
    pub fn state(&self) -> MemoState {
        match self.inner.cache.borrow().as_ref() {
            None => MemoState::Uncomputed,
            Some(cached) if max_revision(cached.tags.iter()) == cached.revision => MemoState::Clean,
            Some(_) => MemoState::Stale,
        }
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.cache.borrow().is_some()
    }

    /// Number of tags read by the last computation.
    pub fn tag_count(&self) -> usize {
        self.inner
            .cache
            .borrow()
            .as_ref()
            .map_or(0, |cached| cached.tags.len())
    }

    /// Run the computation if the cache is missing or stale.
    ///
    /// Returns `true` if the computation ran.
    pub fn refresh(&self) -> bool {
        if self.with_cached(|_| ()).is_some() {
            return false;
        }
        self.recompute_with(|_| ());
        true
    }

    /// Apply `f` to the cached value if the cache is valid.
    ///
    /// A cache hit bubbles the cached tags into the caller's scope.
    fn with_cached<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let cache = self.inner.cache.borrow();
        let cached = cache.as_ref()?;
        if max_revision(cached.tags.iter()) != cached.revision {
            return None;
        }
        self.inner.runtime.bubble(&cached.tags);
        Some(f(&cached.value))
    }

    /// Recompute the memo's value.
    ///
    /// This runs the computation function within a tracking scope to record
    /// dependencies. If the computation panics, the tags it read before the
    /// panic still reach the controller and the enclosing scope, and the
    /// previous cache is left in place.
    fn recompute_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let scope = TrackingScope::enter(&self.inner.runtime);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.inner.compute)()));
        let tags = scope.finish();
        let revision = max_revision(&tags);

        if let Some(controller) = &self.inner.controller {
            controller.set_observed_tags(tags.iter().cloned(), revision);
        }

        let value = match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        };
        let result = f(&value);

        *self.inner.cache.borrow_mut() = Some(Cached {
            value,
            revision,
            tags: tags.into_iter().collect(),
        });
        result
    }
}

impl<T: Clone + 'static> Memo<T> {
    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a memo's value.
    pub fn get(&self) -> T {
        match self.with_cached(T::clone) {
            Some(value) => value,
            None => self.recompute_with(T::clone),
        }
    }
}

impl<T: Clone + 'static> Readable<T> for Memo<T> {
    fn get(&self) -> T {
        Memo::get(self)
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("state", &self.state())
            .field("tag_count", &self.tag_count())
            .field("has_controller", &self.inner.controller.is_some())
            .finish()
    }
}

/// A read-only cell backed by a memo.
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let runtime = Runtime::new();
/// let cell = runtime.signal(0);
/// let double = {
///     let cell = cell.clone();
///     runtime.derive(move || cell.get() * 2)
/// };
///
/// assert_eq!(double.current(), 0);
/// cell.set(5);
/// assert_eq!(double.current(), 10);
/// ```
pub struct Derived<T> {
    memo: Memo<T>,
}

impl<T: Clone + 'static> Derived<T> {
    /// Current value of the derivation.
    pub fn current(&self) -> T {
        self.memo.get()
    }

    /// The underlying memo.
    pub fn memo(&self) -> &Memo<T> {
        &self.memo
    }
}

impl<T: Clone + 'static> Readable<T> for Derived<T> {
    fn get(&self) -> T {
        self.current()
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            memo: self.memo.clone(),
        }
    }
}

impl<T: 'static> Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Derived").field(&self.memo).finish()
    }
}

impl Runtime {
    /// Memoize a zero-argument computation.
    pub fn memoize<T, F>(&self, compute: F) -> Memo<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
    {
        Memo::new(self, compute)
    }

    /// Wrap a computation as a read-only cell.
    pub fn derive<T, F>(&self, compute: F) -> Derived<T>
    where
        T: 'static,
        F: Fn() -> T + 'static,
    {
        Derived {
            memo: Memo::new(self, compute),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
