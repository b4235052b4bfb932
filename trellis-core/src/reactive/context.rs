//! Tracking Scope
//!
//! The tracking scope records which tags a computation reads. This enables
//! automatic dependency tracking: when a tag is consumed, it is added to the
//! innermost active scope.
//!
//! # Implementation
//!
//! Each runtime owns a stack of frames. Entering a tracked computation pushes
//! an empty frame; leaving it pops the frame and hands the recorded tags to
//! the caller. Tags recorded by a nested frame are also added to the frame
//! below it ("bubbling"), so a memo read inside another memo contributes its
//! dependencies to the outer one.
//!
//! [`Runtime::untrack`] pushes an untracked frame instead: nothing is
//! recorded while it is on top, and nothing bubbles through it.

use indexmap::IndexSet;

use super::runtime::Runtime;
use super::tag::Tag;

/// An entry in the tracking stack.
#[derive(Debug)]
pub(crate) enum Frame {
    /// Tags consumed so far, in first-read order.
    Tracking(IndexSet<Tag>),
    /// Reads are not recorded.
    Untracked,
}

/// Guard for an active tracking frame.
///
/// The frame is popped when the guard is finished or dropped, so the stack
/// stays balanced even if the computation panics. Either way the tags read
/// so far bubble to the enclosing frame.
pub struct TrackingScope {
    runtime: Runtime,
    depth: usize,
    finished: bool,
}

impl TrackingScope {
    /// Push a fresh tracking frame onto the runtime's stack.
    pub fn enter(runtime: &Runtime) -> Self {
        let depth = push_frame(runtime, Frame::Tracking(IndexSet::new()));
        Self {
            runtime: runtime.clone(),
            depth,
            finished: false,
        }
    }

    /// Pop the frame, bubble its tags outward and return them.
    pub fn finish(mut self) -> Vec<Tag> {
        self.finished = true;
        self.pop_and_bubble()
    }

    fn pop_and_bubble(&self) -> Vec<Tag> {
        let tags = match pop_frame(&self.runtime, self.depth) {
            Some(Frame::Tracking(tags)) => tags.into_iter().collect::<Vec<_>>(),
            _ => Vec::new(),
        };
        self.runtime.bubble(&tags);
        tags
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        if !self.finished {
            self.pop_and_bubble();
        }
    }
}

/// Guard for an untracked frame.
struct UntrackedScope {
    runtime: Runtime,
    depth: usize,
}

impl Drop for UntrackedScope {
    fn drop(&mut self) {
        pop_frame(&self.runtime, self.depth);
    }
}

fn push_frame(runtime: &Runtime, frame: Frame) -> usize {
    let mut frames = runtime.inner.frames.borrow_mut();
    frames.push(frame);
    frames.len()
}

fn pop_frame(runtime: &Runtime, depth: usize) -> Option<Frame> {
    let mut frames = runtime.inner.frames.borrow_mut();

    // Verify we're popping the right frame.
    debug_assert_eq!(
        frames.len(),
        depth,
        "TrackingScope mismatch: expected depth {}, got {}",
        depth,
        frames.len()
    );

    frames.pop()
}

impl Runtime {
    /// Run `f` in a fresh tracking scope.
    ///
    /// Returns the result together with every tag consumed while `f` ran.
    /// The tags are also added to the enclosing scope, if there is one.
    pub fn run_tracked<R>(&self, f: impl FnOnce() -> R) -> (R, Vec<Tag>) {
        let scope = TrackingScope::enter(self);
        let value = f();
        let tags = scope.finish();
        (value, tags)
    }

    /// Run `f` without recording any reads.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let depth = push_frame(self, Frame::Untracked);
        let _guard = UntrackedScope {
            runtime: self.clone(),
            depth,
        };
        f()
    }

    /// Check if a tracking scope is currently recording reads.
    pub fn is_tracking(&self) -> bool {
        matches!(
            self.inner.frames.borrow().last(),
            Some(Frame::Tracking(_))
        )
    }

    /// Record `tag` in the current scope.
    pub(crate) fn record(&self, tag: &Tag) {
        if let Some(Frame::Tracking(tags)) = self.inner.frames.borrow_mut().last_mut() {
            tags.insert(tag.clone());
        }
    }

    /// Add `tags` to the current scope.
    pub(crate) fn bubble(&self, tags: &[Tag]) {
        if tags.is_empty() {
            return;
        }
        if let Some(Frame::Tracking(current)) = self.inner.frames.borrow_mut().last_mut() {
            tracing::trace!(count = tags.len(), "bubbling tags into enclosing scope");
            current.extend(tags.iter().cloned());
        }
    }

    /// Check whether the current scope has read `tag`.
    pub(crate) fn is_consumed(&self, tag: &Tag) -> bool {
        match self.inner.frames.borrow().last() {
            Some(Frame::Tracking(tags)) => tags.contains(tag),
            _ => false,
        }
    }
}
