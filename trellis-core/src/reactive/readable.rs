//! Readable Stores
//!
//! A readable store is a signal split into a read half, handed to
//! consumers, and a write half, handed to whatever produces the values.

use std::fmt::{self, Debug};

use super::runtime::Runtime;
use super::signal::{Readable, Signal};
use crate::error::Result;

/// The read half of a readable store.
pub struct ReadOnly<T> {
    signal: Signal<T>,
}

impl<T: Clone + 'static> ReadOnly<T> {
    /// Read the current value, recording the dependency.
    pub fn current(&self) -> T {
        self.signal.get()
    }

    /// Read the current value without recording anything.
    pub fn current_untracked(&self) -> T {
        self.signal.get_untracked()
    }
}

impl<T: Clone + 'static> Readable<T> for ReadOnly<T> {
    fn get(&self) -> T {
        self.current()
    }
}

impl<T> Clone for ReadOnly<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: Debug> Debug for ReadOnly<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnly").field(&self.signal).finish()
    }
}

/// The write half of a readable store.
pub struct Setter<T> {
    signal: Signal<T>,
}

impl<T: PartialEq + 'static> Setter<T> {
    /// Publish a new value.
    pub fn try_set(&self, value: T) -> Result<()> {
        self.signal.try_set(value)
    }

    /// Publish a new value.
    ///
    /// # Panics
    ///
    /// Panics if the running computation has already read the store.
    #[track_caller]
    pub fn set(&self, value: T) {
        self.signal.set(value)
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T> Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter").finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a store that only `updater` can write to.
    ///
    /// `updater` runs once, right away, and may keep the [`Setter`] to
    /// publish values later.
    ///
    /// ```rust
    /// use std::cell::RefCell;
    /// use std::rc::Rc;
    /// use trellis_core::Runtime;
    ///
    /// let runtime = Runtime::new();
    /// let publish = Rc::new(RefCell::new(None));
    /// let status = {
    ///     let publish = publish.clone();
    ///     runtime.readable("idle", move |setter| *publish.borrow_mut() = Some(setter))
    /// };
    ///
    /// assert_eq!(status.current(), "idle");
    /// if let Some(setter) = publish.borrow().as_ref() {
    ///     setter.set("busy");
    /// }
    /// assert_eq!(status.current(), "busy");
    /// ```
    pub fn readable<T, F>(&self, initial: T, updater: F) -> ReadOnly<T>
    where
        T: PartialEq + 'static,
        F: FnOnce(Setter<T>),
    {
        let signal = Signal::new(self, initial);
        updater(Setter {
            signal: signal.clone(),
        });
        ReadOnly { signal }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn updater_writes_are_visible_to_readers() {
        let runtime = Runtime::new();
        let store = runtime.readable(0, |setter| setter.set(1));
        assert_eq!(store.current(), 1);
    }

    #[test]
    fn reads_are_tracked() {
        let runtime = Runtime::new();
        let setter = Rc::new(RefCell::new(None));
        let setter_clone = setter.clone();
        let store =
            runtime.readable(String::from("a"), move |s| *setter_clone.borrow_mut() = Some(s));

        let store_clone = store.clone();
        let upper = runtime.memoize(move || store_clone.current().to_uppercase());
        assert_eq!(upper.get(), "A");

        setter.borrow().as_ref().unwrap().set(String::from("b"));
        assert_eq!(upper.get(), "B");
        assert_eq!(store.current_untracked(), "b");
    }
}
