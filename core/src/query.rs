//! Query predicates for live subscriptions.
//!
//! A closed set of predicates rather than arbitrary closures, so that a SQL
//! backed store can translate each one into a `WHERE` / `ORDER BY` clause.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use crate::request::{PartyId, Request, RequestStatus};

/// A predicate over the request collection, with its result ordering.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestQuery {
    /// Pending requests not posted by `viewer`, soonest `scheduled_at` first
    OpenPool {
        /// The party browsing the pool
        viewer: PartyId,
    },
    /// Requests posted by the party, newest first
    RequestedBy(PartyId),
    /// Requests claimed by the party, newest first
    ClaimedBy(PartyId),
}

impl RequestQuery {
    /// Short name used in logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OpenPool { .. } => "open_pool",
            Self::RequestedBy(_) => "mine",
            Self::ClaimedBy(_) => "as_claimant",
        }
    }

    /// Whether `request` belongs to the result set.
    #[must_use]
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Self::OpenPool { viewer } => {
                request.status == RequestStatus::Pending && request.requester_id != *viewer
            }
            Self::RequestedBy(party) => request.requester_id == *party,
            Self::ClaimedBy(party) => request.is_claimed_by(party),
        }
    }

    /// Sort a result set into this query's order.
    ///
    /// Ties are broken by id so snapshots are deterministic.
    pub fn sort(&self, results: &mut [Request]) {
        match self {
            Self::OpenPool { .. } => results.sort_by_key(|r| (r.scheduled_at, r.id)),
            Self::RequestedBy(_) | Self::ClaimedBy(_) => {
                results.sort_by_key(|r| (Reverse(r.created_at), r.id));
            }
        }
    }

    /// Filter and sort `requests` into this query's snapshot.
    #[must_use]
    pub fn project<'a, I>(&self, requests: I) -> Vec<Request>
    where
        I: IntoIterator<Item = &'a Request>,
    {
        let mut results: Vec<Request> = requests
            .into_iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        self.sort(&mut results);
        results
    }
}
