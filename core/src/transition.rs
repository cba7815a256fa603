//! Pure transition rules for the request state machine.
//!
//! Every lifecycle command is expressed as a precondition/mutator pair that a
//! [`RequestStore`](crate::store::RequestStore) evaluates atomically:
//!
//! - [`Command::permits`] is the precondition
//! - [`Command::apply`] is the mutator
//! - [`Command::rejection`] explains a failed precondition, using the record the
//!   store observed inside the same atomic step
//!
//! Nothing here performs I/O, which keeps the rules deterministic and easy to
//! test exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::request::{Contact, PartyId, Request, RequestStatus};

/// Who may move a request from `Claimed` to `InProgress`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// Only the claimant starts the activity
    #[default]
    ClaimantOnly,
    /// Requester or claimant may start it
    EitherParty,
}

impl AdvancePolicy {
    /// Parse from a configuration value (`claimant_only` / `either_party`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claimant_only" | "claimant" => Some(Self::ClaimantOnly),
            "either_party" | "either" => Some(Self::EitherParty),
            _ => None,
        }
    }
}

/// Policy knobs for the state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// Who may advance a claimed request
    pub advance: AdvancePolicy,
}

/// A state-changing command issued by a caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Claim a pending request
    Accept {
        /// The claiming party
        caller: PartyId,
        /// Contact copied from the claimant's profile
        contact: Option<Contact>,
    },
    /// Start a claimed request
    Advance {
        /// The acting party
        caller: PartyId,
    },
    /// Finish a claimed or in-progress request
    Complete {
        /// The acting party
        caller: PartyId,
    },
    /// Call off a live request
    Cancel {
        /// The acting party
        caller: PartyId,
    },
}

impl Command {
    /// The acting party.
    #[must_use]
    pub const fn caller(&self) -> &PartyId {
        match self {
            Self::Accept { caller, .. }
            | Self::Advance { caller }
            | Self::Complete { caller }
            | Self::Cancel { caller } => caller,
        }
    }

    /// Short name used in logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::Advance { .. } => "advance",
            Self::Complete { .. } => "complete",
            Self::Cancel { .. } => "cancel",
        }
    }

    /// The status a successful application produces.
    #[must_use]
    pub const fn target(&self) -> RequestStatus {
        match self {
            Self::Accept { .. } => RequestStatus::Claimed,
            Self::Advance { .. } => RequestStatus::InProgress,
            Self::Complete { .. } => RequestStatus::Completed,
            Self::Cancel { .. } => RequestStatus::Cancelled,
        }
    }

    /// Precondition: may this command be applied to `current`?
    #[must_use]
    pub fn permits(&self, current: &Request, policy: LifecyclePolicy) -> bool {
        if !current.status.can_transition_to(self.target()) {
            return false;
        }
        match self {
            Self::Accept { caller, .. } => current.requester_id != *caller,
            Self::Advance { caller } => match policy.advance {
                AdvancePolicy::ClaimantOnly => current.is_claimed_by(caller),
                AdvancePolicy::EitherParty => current.involves(caller),
            },
            Self::Complete { caller } | Self::Cancel { caller } => current.involves(caller),
        }
    }

    /// Mutator: the record after this command is applied.
    ///
    /// Only meaningful when [`permits`](Self::permits) holds for `current`.
    /// `updated_at` never moves backwards even if `now` does.
    #[must_use]
    pub fn apply(&self, current: &Request, now: DateTime<Utc>) -> Request {
        let mut next = current.clone();
        next.status = self.target();
        next.updated_at = now.max(current.updated_at);
        next.revision = current.revision + 1;
        if let Self::Accept { caller, contact } = self {
            next.claimant_id = Some(caller.clone());
            next.claimant_contact.clone_from(contact);
        }
        next
    }

    /// Explain why [`permits`](Self::permits) rejected `current`.
    #[must_use]
    pub fn rejection(&self, current: &Request, policy: LifecyclePolicy) -> LifecycleError {
        let caller = self.caller();
        match self {
            Self::Accept { .. } => {
                if current.requester_id == *caller {
                    LifecycleError::Forbidden(format!(
                        "{caller} cannot claim their own request {}",
                        current.id
                    ))
                } else if matches!(
                    current.status,
                    RequestStatus::Claimed | RequestStatus::InProgress
                ) {
                    LifecycleError::AlreadyClaimed(current.id)
                } else {
                    self.unreachable(current)
                }
            }
            Self::Advance { .. } | Self::Complete { .. } | Self::Cancel { .. } => {
                if current.status.is_terminal() {
                    return self.unreachable(current);
                }
                let allowed = match (self, policy.advance) {
                    (Self::Advance { .. }, AdvancePolicy::ClaimantOnly) => {
                        current.is_claimed_by(caller)
                    }
                    _ => current.involves(caller),
                };
                if allowed {
                    self.unreachable(current)
                } else {
                    LifecycleError::Forbidden(format!(
                        "{caller} may not {} request {}",
                        self.name(),
                        current.id
                    ))
                }
            }
        }
    }

    fn unreachable(&self, current: &Request) -> LifecycleError {
        LifecycleError::InvalidTransition(format!(
            "request {} cannot move from {} to {}",
            current.id,
            current.status,
            self.target()
        ))
    }
}
