//! Reactive Primitives
//!
//! This module implements the autotracking system: tags, signals, tracked
//! objects, memos and effects. These primitives form the foundation of
//! Trellis's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Tags
//!
//! A Tag is a change token stamped with a revision from the runtime's clock.
//! Reading tracked state consumes its tag; writing it dirties the tag, which
//! advances the clock.
//!
//! ## Signals and Tracked Objects
//!
//! A Signal is a single mutable value with one tag. A tracked object is a
//! keyed store with one tag per property and one for its key set.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result together with the tags
//! it read. It re-evaluates only when the highest revision among those tags
//! has moved.
//!
//! ## Effects
//!
//! An Effect is a memoized side effect bound to a subscription controller.
//! Dirtying a tag it read queues it for the next flush.
//!
//! # Implementation Notes
//!
//! All state is owned by an explicit [`Runtime`] rather than thread-locals,
//! so separate runtimes never observe each other's reads or writes.

mod context;
mod effect;
mod memo;
mod object;
mod readable;
mod runtime;
mod scheduler;
mod signal;
mod subscriber;
mod tag;

pub use context::TrackingScope;
pub use effect::{Effect, EffectBatch, Observer, OnInvalidate, Subscription};
pub use memo::{Derived, Memo, MemoState};
pub use object::{PropertyRef, Slot, TrackedObject};
pub use readable::{ReadOnly, Setter};
pub use runtime::Runtime;
pub use signal::{Readable, Signal};
pub use subscriber::{CleanupFn, EffectFn, SubscriberId, SubscriptionController};
pub use tag::{max_revision, Revision, Tag, TagId};
