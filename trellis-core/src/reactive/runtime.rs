//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns every piece of state that the tracking system needs
//! beyond the tags themselves.
//!
//! # How It Works
//!
//! 1. Every tag is created against a runtime and stamped from its clock.
//!
//! 2. When a memo or effect runs, the runtime pushes a tracking frame; every
//!    tag consumed while the frame is on top is recorded in it.
//!
//! 3. When a tag is dirtied, the runtime:
//!    a. Advances the clock and stamps the tag
//!    b. Queues the tag with the scheduler if anything subscribed to it
//!    c. Requests a flush according to the configured [`FlushMode`]
//!    d. Memos are lazy - they recompute on next access
//!
//! # Threading
//!
//! A runtime is a single-threaded object. Handles are `Rc` based and
//! therefore `!Send`; separate runtimes are completely isolated from each
//! other (separate clocks, scopes and flush queues).
//!
//! [`FlushMode`]: crate::FlushMode

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::context::Frame;
use super::effect::Collector;
use super::scheduler::Scheduler;
use super::tag::Revision;
use crate::config::RuntimeConfig;

/// Handle to a tracking runtime.
///
/// Cloning the handle is cheap; all clones refer to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,

    /// The revision clock. Starts at zero and only ever increases.
    clock: Cell<Revision>,

    /// Stack of tracking frames. The last entry is the current scope.
    pub(crate) frames: RefCell<Vec<Frame>>,

    /// Stack of active effect collections.
    pub(crate) collectors: RefCell<Vec<Collector>>,

    pub(crate) scheduler: Scheduler,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        tracing::debug!(?config, "creating tracking runtime");
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                clock: Cell::new(0),
                frames: RefCell::new(Vec::new()),
                collectors: RefCell::new(Vec::new()),
                scheduler: Scheduler::new(),
            }),
        }
    }

    /// The configuration this runtime was created with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Current value of the revision clock.
    pub fn revision(&self) -> Revision {
        self.inner.clock.get()
    }

    /// Advance the clock by one and return the new revision.
    pub(crate) fn advance_clock(&self) -> Revision {
        let next = self.inner.clock.get() + 1;
        self.inner.clock.set(next);
        next
    }

    /// Check whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("revision", &self.revision())
            .field("depth", &self.inner.frames.borrow().len())
            .field("pending", &self.pending_count())
            .field("flush_scheduled", &self.is_flush_scheduled())
            .finish()
    }
}
