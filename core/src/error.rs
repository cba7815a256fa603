//! Error types for the store contract and the lifecycle operations.

use thiserror::Error;

use crate::request::{Request, RequestId};

/// Errors reported by a [`RequestStore`](crate::store::RequestStore).
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The record to create is missing required fields.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// No record with this id exists.
    #[error("Request not found: {0}")]
    NotFound(RequestId),

    /// The precondition of a transactional update evaluated to false.
    ///
    /// Nothing was written. `current` is the record the precondition was
    /// evaluated against, read inside the same atomic step.
    #[error("Precondition failed for request {}", current.id)]
    PreconditionFailed {
        /// The record as observed by the rejected precondition
        current: Box<Request>,
    },

    /// A storage hiccup (connection reset, pool timeout, ...).
    ///
    /// Reads and subscriptions are retried before this surfaces.
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Stored data could not be decoded or violates an invariant.
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors returned by lifecycle operations.
///
/// `AlreadyClaimed` and `InvalidTransition` are ordinary outcomes that callers
/// branch on ("someone else already accepted this"), not faults.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Malformed input; fix it before retrying.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The request id does not resolve.
    #[error("Request not found: {0}")]
    NotFound(RequestId),

    /// The caller lacks the relation to the request this action requires.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The move is not reachable from the current status.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Another party claimed the request first.
    #[error("Request {0} was already claimed")]
    AlreadyClaimed(RequestId),

    /// Storage failed after exhausting its internal retries.
    #[error("Transient storage error: {0}")]
    Transient(String),
}

impl LifecycleError {
    /// Whether the caller may retry the whole operation unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
