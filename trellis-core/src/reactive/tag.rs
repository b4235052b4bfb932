//! Change Tags
//!
//! A tag is the atomic unit of change tracking. Every piece of trackable
//! state (a signal, one property of a tracked object, the key set of a
//! tracked object) owns exactly one tag.
//!
//! # Revisions
//!
//! Each runtime keeps a single monotonically increasing clock. A tag is
//! stamped with the clock value when it is created and re-stamped with a
//! fresh value every time it is dirtied. Comparing the highest revision of a
//! set of tags against a remembered value is therefore enough to decide
//! whether anything in that set changed.
//!
//! # Subscribers
//!
//! Tags hold their subscribers weakly. A controller that is dropped simply
//! disappears from the next flush; it never keeps itself alive through the
//! tags it observes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::runtime::Runtime;
use super::subscriber::{ControllerInner, SubscriberId};
use crate::error::{Result, TrackingError};

/// A value of the revision clock.
pub type Revision = u64;

/// Unique identifier for a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(u64);

impl TagId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A revision-stamped change token.
///
/// Cloning a tag yields another handle to the same token.
#[derive(Clone)]
pub struct Tag {
    inner: Rc<TagInner>,
}

pub(crate) struct TagInner {
    id: TagId,
    revision: Cell<Revision>,
    subscribers: RefCell<IndexMap<SubscriberId, Weak<ControllerInner>>>,
    runtime: Runtime,
}

impl Tag {
    /// Create a tag stamped with the runtime's current revision.
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            inner: Rc::new(TagInner {
                id: TagId::next(),
                revision: Cell::new(runtime.revision()),
                subscribers: RefCell::new(IndexMap::new()),
                runtime: runtime.clone(),
            }),
        }
    }

    /// Get the tag's unique ID.
    pub fn id(&self) -> TagId {
        self.inner.id
    }

    /// Revision at which this tag was last dirtied (or created).
    pub fn revision(&self) -> Revision {
        self.inner.revision.get()
    }

    /// The runtime this tag belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Record this tag in the current tracking scope, if there is one.
    pub fn consume(&self) {
        self.inner.runtime.record(self);
    }

    /// Fail if the current computation has already read this tag.
    pub fn check_writable(&self) -> Result<()> {
        if self.inner.runtime.is_consumed(self) {
            return Err(TrackingError::CyclicDependency { tag: self.id() });
        }
        Ok(())
    }

    /// Advance the clock and stamp this tag with the new revision.
    ///
    /// Tags with subscribers are handed to the scheduler.
    pub fn dirty(&self) -> Result<()> {
        self.check_writable()?;

        let revision = self.inner.runtime.advance_clock();
        self.inner.revision.set(revision);
        tracing::trace!(tag = %self.id(), revision, "dirtied tag");

        if self.subscriber_count() > 0 {
            self.inner.runtime.schedule(self);
        }
        Ok(())
    }

    /// Number of controllers currently subscribed to this tag.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    pub(crate) fn subscribe(&self, id: SubscriberId, controller: Weak<ControllerInner>) {
        self.inner.subscribers.borrow_mut().insert(id, controller);
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        self.inner.subscribers.borrow_mut().shift_remove(&id);
    }

    /// Snapshot of the subscribers, in subscription order.
    pub(crate) fn subscribers(&self) -> Vec<(SubscriberId, Weak<ControllerInner>)> {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .map(|(id, controller)| (*id, controller.clone()))
            .collect()
    }

    pub(crate) fn downgrade(&self) -> WeakTag {
        WeakTag(Rc::downgrade(&self.inner))
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("id", &self.id())
            .field("revision", &self.revision())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// A tag reference that does not keep the tag alive.
pub(crate) struct WeakTag(Weak<TagInner>);

impl WeakTag {
    pub(crate) fn upgrade(&self) -> Option<Tag> {
        self.0.upgrade().map(|inner| Tag { inner })
    }
}

/// Highest revision among `tags`, or `None` for an empty set.
pub fn max_revision<'a>(tags: impl IntoIterator<Item = &'a Tag>) -> Option<Revision> {
    tags.into_iter().map(Tag::revision).max()
}
