//! Trellis Core
//!
//! This crate provides the autotracking runtime for the Trellis reactive
//! binding layer. It implements:
//!
//! - Revision tags and a per-runtime revision clock
//! - Tracked state (signals, tracked objects, readable stores)
//! - Memoized computations with automatic dependency capture
//! - Effects with teardown, batched delivery and group disposal
//!
//! # Architecture
//!
//! - `reactive`: tags, tracking scopes, tracked state, memos and effects
//! - `config`: runtime configuration
//! - `error`: the error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use trellis_core::Runtime;
//!
//! let runtime = Runtime::new();
//!
//! // Create a signal
//! let count = runtime.signal(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     runtime.memoize(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let _effect = {
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     runtime.watch_effect(move |_| {
//!         println!("Count: {}, Doubled: {}", count.get(), doubled.get());
//!     })
//! };
//!
//! // Update the signal, then deliver the change
//! count.set(5);
//! runtime.flush();
//! // Prints: "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod reactive;

pub use config::{FlushMode, RuntimeConfig};
pub use error::{Result, TrackingError};
pub use reactive::{
    max_revision, CleanupFn, Derived, Effect, EffectBatch, EffectFn, Memo, MemoState, Observer,
    OnInvalidate, PropertyRef, ReadOnly, Readable, Revision, Runtime, Setter, Signal, Slot,
    SubscriberId, Subscription, SubscriptionController, Tag, TagId, TrackedObject, TrackingScope,
};
