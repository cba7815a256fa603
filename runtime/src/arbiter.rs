//! Exclusive claim arbitration.
//!
//! When any number of callers race to accept the same pending request, exactly
//! one succeeds and every other one gets a definitive
//! [`LifecycleError::AlreadyClaimed`]. The arbiter holds no lock of its own: a
//! claim is a single [`RequestStore::transactional_update`] whose precondition
//! is `status == Pending && requester != caller`, so the store's per-record
//! atomicity decides the winner. Losers see the already-claimed record inside
//! their own atomic step and are classified from it.
//!
//! The self-claim check runs twice on purpose: once as a cheap read before the
//! transaction, and again inside the precondition, which is the authoritative
//! one.

use chrono::{DateTime, Utc};
use reservation_core::{
    Command, Contact, LifecycleError, LifecyclePolicy, PartyId, Request, RequestId, RequestStore,
    StoreError,
};
use std::sync::Arc;

use crate::lifecycle::lifecycle_error;
use crate::metrics::claims;

/// Resolves accept races so exactly one caller wins.
#[derive(Clone)]
pub struct ClaimArbiter {
    store: Arc<dyn RequestStore>,
    policy: LifecyclePolicy,
}

impl ClaimArbiter {
    /// Create an arbiter over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>, policy: LifecyclePolicy) -> Self {
        Self { store, policy }
    }

    /// Attempt to claim `id` for `caller`.
    ///
    /// Claiming is not idempotent: a caller that already holds the claim and
    /// tries again gets `AlreadyClaimed`.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotFound`]: unknown request
    /// - [`LifecycleError::Forbidden`]: the caller is the requester
    /// - [`LifecycleError::AlreadyClaimed`]: someone else won the race
    /// - [`LifecycleError::InvalidTransition`]: the request is terminal
    /// - [`LifecycleError::Transient`]: storage failed; outcome unknown
    #[tracing::instrument(skip_all, fields(request_id = %id, caller = %caller))]
    pub async fn claim(
        &self,
        id: RequestId,
        caller: &PartyId,
        contact: Option<Contact>,
        now: DateTime<Utc>,
    ) -> Result<Request, LifecycleError> {
        let observed = self
            .store
            .get(id)
            .await
            .map_err(|err| lifecycle_error(err, id))?;
        if observed.requester_id == *caller {
            claims::record("self_claim");
            return Err(LifecycleError::Forbidden(format!(
                "{caller} cannot claim their own request {id}"
            )));
        }

        let command = Arc::new(Command::Accept {
            caller: caller.clone(),
            contact,
        });
        let policy = self.policy;
        let precondition = {
            let command = Arc::clone(&command);
            Box::new(move |current: &Request| command.permits(current, policy))
        };
        let mutator = {
            let command = Arc::clone(&command);
            Box::new(move |current: &Request| command.apply(current, now))
        };

        match self.store.transactional_update(id, precondition, mutator).await {
            Ok(claimed) => {
                claims::record("won");
                tracing::info!("Request claimed");
                Ok(claimed)
            }
            Err(StoreError::PreconditionFailed { current }) => {
                let rejection = command.rejection(&current, policy);
                let outcome = match rejection {
                    LifecycleError::AlreadyClaimed(_) => "lost",
                    LifecycleError::Forbidden(_) => "self_claim",
                    _ => "rejected",
                };
                claims::record(outcome);
                tracing::debug!(status = %current.status, outcome, "Claim rejected");
                Err(rejection)
            }
            Err(err) => Err(lifecycle_error(err, id)),
        }
    }
}

impl std::fmt::Debug for ClaimArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimArbiter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
