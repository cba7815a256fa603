//! The `Request` entity and its identifiers.
//!
//! A request is posted by a requester, claimed by at most one other party, and
//! then walks a linear lifecycle until it is completed or cancelled:
//!
//! ```text
//! Pending ──► Claimed ──► InProgress ──► Completed
//!    │           │            │
//!    └───────────┴────────────┴──────► Cancelled
//! ```
//!
//! Terminal requests are retained for history and never mutated again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::StoreError;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a request, assigned at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new random `RequestId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a party (requester or claimant).
///
/// Identity is always passed explicitly by the caller; the core never reads an
/// ambient "current user".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartyId(String);

impl PartyId {
    /// Create a party id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for PartyId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contact details copied from a party's profile at the time they act.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact(String);

impl Contact {
    /// Create a contact value.
    #[must_use]
    pub fn new(contact: impl Into<String>) -> Self {
        Self(contact.into())
    }

    /// Borrow the raw contact string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a request.
///
/// This is a closed set. Values read back from storage are parsed with
/// [`RequestStatus::parse`]; an unknown name is data corruption, not a reason to
/// fall back to some default status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Posted and waiting for a claimant
    Pending,
    /// Exclusively claimed by one party
    Claimed,
    /// The claimed activity has started
    InProgress,
    /// Finished (terminal)
    Completed,
    /// Called off by one of the parties (terminal)
    Cancelled,
}

impl RequestStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Claimed,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Stable storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a status from its storage name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the name is not a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StoreError::Corrupted(format!("unknown request status: {s}"))),
        }
    }

    /// Terminal statuses have no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether `next` is directly reachable from `self`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Claimed)
                | (Self::Claimed, Self::InProgress)
                | (Self::Claimed | Self::InProgress, Self::Completed)
                | (Self::Pending | Self::Claimed | Self::InProgress, Self::Cancelled)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entity
// ============================================================================

/// Inputs for posting a new request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    /// The party posting the request
    pub requester_id: PartyId,
    /// Where the activity starts
    pub origin: String,
    /// Where the activity ends
    pub destination: String,
    /// When the activity is planned; must be in the future at creation
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Optional free text
    pub note: Option<String>,
    /// Requester contact copied from their profile
    pub contact: Option<Contact>,
}

/// A reservation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Immutable identifier
    pub id: RequestId,
    /// The party that created the request
    pub requester_id: PartyId,
    /// The party that claimed the request; set once, never cleared
    pub claimant_id: Option<PartyId>,
    /// Start location
    pub origin: String,
    /// End location
    pub destination: String,
    /// Planned time
    pub scheduled_at: DateTime<Utc>,
    /// Free text
    pub note: Option<String>,
    /// Requester contact at creation time
    pub requester_contact: Option<Contact>,
    /// Claimant contact at claim time
    pub claimant_contact: Option<Contact>,
    /// Current lifecycle status
    pub status: RequestStatus,
    /// When the request was created
    pub created_at: DateTime<Utc>,
    /// Rewritten on every transition, never moves backwards
    pub updated_at: DateTime<Utc>,
    /// Number of committed transitions
    pub revision: u64,
}

impl Request {
    /// Build a pending request from a validated draft.
    #[must_use]
    pub fn pending(
        id: RequestId,
        draft: NewRequest,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            requester_id: draft.requester_id,
            claimant_id: None,
            origin: draft.origin,
            destination: draft.destination,
            scheduled_at,
            note: draft.note,
            requester_contact: draft.contact,
            claimant_contact: None,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Whether `party` is the requester or the claimant.
    #[must_use]
    pub fn involves(&self, party: &PartyId) -> bool {
        self.requester_id == *party || self.claimant_id.as_ref() == Some(party)
    }

    /// Whether `party` is the claimant.
    #[must_use]
    pub fn is_claimed_by(&self, party: &PartyId) -> bool {
        self.claimant_id.as_ref() == Some(party)
    }

    /// Check the structural invariants that must hold for any stored request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] describing the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), StoreError> {
        if self.claimant_id.as_ref() == Some(&self.requester_id) {
            return Err(StoreError::Corrupted(format!(
                "request {} is claimed by its own requester",
                self.id
            )));
        }
        let needs_claimant = matches!(
            self.status,
            RequestStatus::Claimed | RequestStatus::InProgress | RequestStatus::Completed
        );
        if needs_claimant && self.claimant_id.is_none() {
            return Err(StoreError::Corrupted(format!(
                "request {} is {} without a claimant",
                self.id, self.status
            )));
        }
        if self.status == RequestStatus::Pending && self.claimant_id.is_some() {
            return Err(StoreError::Corrupted(format!(
                "request {} is pending but has a claimant",
                self.id
            )));
        }
        if self.updated_at < self.created_at {
            return Err(StoreError::Corrupted(format!(
                "request {} was updated before it was created",
                self.id
            )));
        }
        Ok(())
    }
}
