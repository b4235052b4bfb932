//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive: a single mutable value
//! that owns one tag.
//!
//! # How Signals Work
//!
//! 1. Reading a signal consumes its tag, so the value becomes a dependency
//!    of whatever computation is running.
//!
//! 2. Writing a different value dirties the tag. Writing an equal value
//!    (`PartialEq`) is a no-op as far as tracking is concerned: the clock
//!    does not move and no effect is scheduled.
//!
//! 3. Writing a signal that the current computation has already read is a
//!    cyclic dependency. The `try_*` methods report it as an error; the
//!    plain methods panic, the same way `RefCell::borrow_mut` does.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::runtime::Runtime;
use super::tag::{Tag, TagId};
use crate::error::{Result, TrackingError};

/// A value that can be read as a tracked dependency.
///
/// Implemented by every read-only view the runtime hands out, so adapters
/// can consume them without caring how the value is produced.
pub trait Readable<T> {
    /// Read the current value, recording the dependency.
    fn get(&self) -> T;
}

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use trellis_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
///
/// count.update(|v| v + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

struct SignalInner<T> {
    tag: Tag,
    value: RefCell<T>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                tag: Tag::new(runtime),
                value: RefCell::new(value),
            }),
        }
    }

    /// Get the ID of the signal's tag.
    pub fn id(&self) -> TagId {
        self.inner.tag.id()
    }

    /// The tag tracking this signal.
    pub fn tag(&self) -> &Tag {
        &self.inner.tag
    }

    /// Borrow the value, recording the dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.tag.consume();
        f(&self.inner.value.borrow())
    }

    /// Check whether two handles refer to the same signal.
    pub fn ptr_eq(&self, other: &Signal<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called within a tracking scope, this also registers the signal as
    /// a dependency of the running computation.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking it.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Store a new value, dirtying the tag if it differs from the current one.
    ///
    /// Nothing is written when the tag cannot be dirtied.
    pub fn try_set(&self, value: T) -> Result<()> {
        let changed = *self.inner.value.borrow() != value;
        if changed {
            self.inner.tag.dirty()?;
        }
        *self.inner.value.borrow_mut() = value;
        Ok(())
    }

    /// Store a new value.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read this signal.
    #[track_caller]
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            cyclic_write(err);
        }
    }

    /// Replace the value with `f(current)`.
    ///
    /// The current value is read without recording a dependency, so an
    /// effect may update a signal it does not otherwise observe.
    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = f(&self.inner.value.borrow());
        self.try_set(next)
    }

    /// Replace the value with `f(current)`.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read this signal.
    #[track_caller]
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if let Err(err) = self.try_update(f) {
            cyclic_write(err);
        }
    }
}

#[track_caller]
pub(crate) fn cyclic_write(err: TrackingError) -> ! {
    panic!("{err}")
}

impl<T: Clone + 'static> Readable<T> for Signal<T> {
    fn get(&self) -> T {
        Signal::get(self)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.tag.id())
            .field("value", &*self.inner.value.borrow())
            .field("revision", &self.inner.tag.revision())
            .finish()
    }
}

impl Runtime {
    /// Create a signal owned by this runtime.
    pub fn signal<T: 'static>(&self, value: T) -> Signal<T> {
        Signal::new(self, value)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
