//! Domain events emitted after committed transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::{PartyId, Request, RequestId, RequestStatus};

/// A committed status change, fanned out to observers.
///
/// Creating a request is reported as a transition with `from == None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// The request that changed
    pub request_id: RequestId,
    /// Status before the change; `None` for creation
    pub from: Option<RequestStatus>,
    /// Status after the change
    pub to: RequestStatus,
    /// Who caused the change
    pub actor: PartyId,
    /// The record's `updated_at` after the change
    pub at: DateTime<Utc>,
}

impl TransitionEvent {
    /// Describe the committed change from `from` to `after` made by `actor`.
    #[must_use]
    pub fn committed(from: RequestStatus, after: &Request, actor: PartyId) -> Self {
        Self {
            request_id: after.id,
            from: Some(from),
            to: after.status,
            actor,
            at: after.updated_at,
        }
    }

    /// Describe the creation of `request`.
    #[must_use]
    pub fn created(request: &Request) -> Self {
        Self {
            request_id: request.id,
            from: None,
            to: request.status,
            actor: request.requester_id.clone(),
            at: request.created_at,
        }
    }
}
