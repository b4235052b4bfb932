//! Error types for the tracking runtime.

use thiserror::Error;

use crate::reactive::TagId;

/// Errors raised by the tracking runtime.
///
/// All variants describe logic errors in the consumer rather than transient
/// conditions, so none of them are retried internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackingError {
    /// A tag was dirtied while the current computation had already read it.
    #[error("cannot dirty tag {tag} that has been used during the current computation")]
    CyclicDependency {
        /// The tag that was read and then written.
        tag: TagId,
    },

    /// A context-dependent operation ran without the context it requires.
    #[error("`{operation}` can only be called while {requirement}")]
    OutOfScope {
        /// Name of the rejected operation.
        operation: &'static str,
        /// What has to be active for the operation to succeed.
        requirement: &'static str,
    },

    /// Effects kept dirtying tags after the configured number of flush rounds.
    #[error("effects were still pending after {rounds} flush rounds")]
    FlushLimitExceeded {
        /// Number of rounds that were executed.
        rounds: usize,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = TrackingError> = std::result::Result<T, E>;
