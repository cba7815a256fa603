//! The request lifecycle service.
//!
//! [`RequestLifecycle`] is the command surface callers use: create, accept,
//! advance, complete, cancel and get. Every transition is one
//! [`RequestStore::transactional_update`] built from a [`Command`]; a rejected
//! precondition is classified from the record the store observed and returned
//! as-is. Reads and view subscriptions go through a [`RetryingRequestStore`];
//! transitions are never retried. Committed transitions are logged, counted
//! and then published on the [`NotificationBridge`].

use chrono::DateTime;
use chrono::Utc;
use reservation_core::environment::Clock;
use reservation_core::{
    Command, Contact, LifecycleError, LifecyclePolicy, NewRequest, PartyId, Request, RequestId,
    RequestStatus, RequestStore, StoreError, TransitionEvent,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use crate::arbiter::ClaimArbiter;
use crate::config::RuntimeConfig;
use crate::metrics::transitions;
use crate::notification::NotificationBridge;
use crate::retry::RetryPolicy;
use crate::retrying::RetryingRequestStore;
use crate::views::RequestViews;

/// Translate a store failure into the caller-facing taxonomy.
///
/// `PreconditionFailed` should have been classified by the caller already;
/// it maps to `InvalidTransition` here as a fallback.
pub(crate) fn lifecycle_error(err: StoreError, id: RequestId) -> LifecycleError {
    match err {
        StoreError::Invalid(reason) => LifecycleError::InvalidArgument(reason),
        StoreError::NotFound(missing) => LifecycleError::NotFound(missing),
        StoreError::Transient(reason) => LifecycleError::Transient(reason),
        StoreError::Corrupted(reason) => {
            tracing::error!(request_id = %id, reason = %reason, "Stored request is corrupted");
            LifecycleError::InvalidTransition(format!("request {id} is unreadable: {reason}"))
        }
        StoreError::PreconditionFailed { current } => LifecycleError::InvalidTransition(format!(
            "request {id} is {}",
            current.status
        )),
    }
}

/// Status observed by the mutator of the last committed attempt.
///
/// The mutator may run more than once on stores that re-evaluate after a
/// conflict; the last write wins, which is the committed one.
#[derive(Debug)]
struct ObservedStatus(AtomicU8);

impl ObservedStatus {
    const UNSET: u8 = u8::MAX;

    fn new() -> Self {
        Self(AtomicU8::new(Self::UNSET))
    }

    fn record(&self, status: RequestStatus) {
        let index = RequestStatus::ALL
            .iter()
            .position(|candidate| *candidate == status)
            .and_then(|index| u8::try_from(index).ok())
            .unwrap_or(Self::UNSET);
        self.0.store(index, Ordering::Release);
    }

    fn get(&self) -> Option<RequestStatus> {
        RequestStatus::ALL
            .get(usize::from(self.0.load(Ordering::Acquire)))
            .copied()
    }
}

/// Validates and applies request transitions.
#[derive(Clone)]
pub struct RequestLifecycle {
    store: Arc<dyn RequestStore>,
    clock: Arc<dyn Clock>,
    arbiter: ClaimArbiter,
    bridge: NotificationBridge,
    policy: LifecyclePolicy,
}

impl RequestLifecycle {
    /// Create a lifecycle over `store` with the default policies and a fresh
    /// bridge.
    ///
    /// Reads are retried with [`RetryPolicy::default`].
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_retry_policy(store, clock, RetryPolicy::default())
    }

    /// Create a lifecycle whose reads are retried under `retry`.
    #[must_use]
    pub fn with_retry_policy(
        store: Arc<dyn RequestStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        let store: Arc<dyn RequestStore> = Arc::new(RetryingRequestStore::new(store, retry));
        let policy = LifecyclePolicy::default();
        Self {
            arbiter: ClaimArbiter::new(Arc::clone(&store), policy),
            store,
            clock,
            bridge: NotificationBridge::default(),
            policy,
        }
    }

    /// Build a lifecycle from configuration.
    ///
    /// Reads are retried under the configured retry policy.
    #[must_use]
    pub fn from_config(
        store: Arc<dyn RequestStore>,
        clock: Arc<dyn Clock>,
        config: &RuntimeConfig,
    ) -> Self {
        Self::with_retry_policy(store, clock, config.retry_policy())
            .with_policy(config.lifecycle_policy())
            .with_bridge(NotificationBridge::new(config.notification_capacity))
    }

    /// Replace the lifecycle policy.
    #[must_use]
    pub fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self.arbiter = ClaimArbiter::new(Arc::clone(&self.store), policy);
        self
    }

    /// Publish transitions on `bridge` instead of a private one.
    #[must_use]
    pub fn with_bridge(mut self, bridge: NotificationBridge) -> Self {
        self.bridge = bridge;
        self
    }

    /// The bridge transitions are published on.
    #[must_use]
    pub const fn bridge(&self) -> &NotificationBridge {
        &self.bridge
    }

    /// The policy in effect.
    #[must_use]
    pub const fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    /// Live views over the same store.
    #[must_use]
    pub fn views(&self) -> RequestViews {
        RequestViews::new(Arc::clone(&self.store))
    }

    /// Post a new request.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidArgument`]: blank requester, origin or
    ///   destination, or `scheduled_at` missing or not in the future
    /// - [`LifecycleError::Transient`]: storage failed
    #[tracing::instrument(skip_all, fields(requester = %draft.requester_id))]
    pub async fn create(&self, draft: NewRequest) -> Result<Request, LifecycleError> {
        let now = self.clock.now();
        let scheduled_at = validate_draft(&draft, now)?;
        let request = Request::pending(RequestId::new(), draft, scheduled_at, now);

        let id = self
            .store
            .create(request.clone())
            .await
            .map_err(|err| lifecycle_error(err, request.id))?;

        tracing::info!(request_id = %id, scheduled_at = %request.scheduled_at, "Request created");
        transitions::record(RequestStatus::Pending, None);
        self.bridge.publish(TransitionEvent::created(&request));
        Ok(request)
    }

    /// Claim a pending request for `caller`.
    ///
    /// # Errors
    ///
    /// See [`ClaimArbiter::claim`].
    pub async fn accept(
        &self,
        id: RequestId,
        caller: &PartyId,
        contact: Option<Contact>,
    ) -> Result<Request, LifecycleError> {
        let started = Instant::now();
        let claimed = self
            .arbiter
            .claim(id, caller, contact, self.clock.now())
            .await?;
        self.committed(RequestStatus::Pending, &claimed, caller, started);
        Ok(claimed)
    }

    /// Move a claimed request to in-progress.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotFound`]: unknown request
    /// - [`LifecycleError::Forbidden`]: caller may not advance under the policy
    /// - [`LifecycleError::InvalidTransition`]: the request is not claimed
    /// - [`LifecycleError::Transient`]: storage failed
    pub async fn advance(
        &self,
        id: RequestId,
        caller: &PartyId,
    ) -> Result<Request, LifecycleError> {
        self.transition(
            id,
            Command::Advance {
                caller: caller.clone(),
            },
        )
        .await
    }

    /// Finish a claimed or in-progress request.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotFound`]: unknown request
    /// - [`LifecycleError::Forbidden`]: caller is neither requester nor claimant
    /// - [`LifecycleError::InvalidTransition`]: pending or terminal
    /// - [`LifecycleError::Transient`]: storage failed
    pub async fn complete(
        &self,
        id: RequestId,
        caller: &PartyId,
    ) -> Result<Request, LifecycleError> {
        self.transition(
            id,
            Command::Complete {
                caller: caller.clone(),
            },
        )
        .await
    }

    /// Call off a non-terminal request.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotFound`]: unknown request
    /// - [`LifecycleError::Forbidden`]: caller is neither requester nor claimant
    /// - [`LifecycleError::InvalidTransition`]: already terminal
    /// - [`LifecycleError::Transient`]: storage failed
    pub async fn cancel(&self, id: RequestId, caller: &PartyId) -> Result<Request, LifecycleError> {
        self.transition(
            id,
            Command::Cancel {
                caller: caller.clone(),
            },
        )
        .await
    }

    /// Read a request.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotFound`]: unknown request
    /// - [`LifecycleError::Transient`]: storage failed after retries
    pub async fn get(&self, id: RequestId) -> Result<Request, LifecycleError> {
        self.store
            .get(id)
            .await
            .map_err(|err| lifecycle_error(err, id))
    }

    #[tracing::instrument(
        skip_all,
        fields(request_id = %id, command = command.name(), caller = %command.caller())
    )]
    async fn transition(&self, id: RequestId, command: Command) -> Result<Request, LifecycleError> {
        let started = Instant::now();
        let now = self.clock.now();
        let policy = self.policy;
        let command = Arc::new(command);
        let observed = Arc::new(ObservedStatus::new());

        let precondition = {
            let command = Arc::clone(&command);
            Box::new(move |current: &Request| command.permits(current, policy))
        };
        let mutator = {
            let command = Arc::clone(&command);
            let observed = Arc::clone(&observed);
            Box::new(move |current: &Request| {
                observed.record(current.status);
                command.apply(current, now)
            })
        };

        match self.store.transactional_update(id, precondition, mutator).await {
            Ok(updated) => {
                let from = observed.get().unwrap_or(updated.status);
                self.committed(from, &updated, command.caller(), started);
                Ok(updated)
            }
            Err(StoreError::PreconditionFailed { current }) => {
                let rejection = command.rejection(&current, policy);
                tracing::debug!(
                    status = %current.status,
                    error = %rejection,
                    "Transition rejected"
                );
                Err(rejection)
            }
            Err(err) => Err(lifecycle_error(err, id)),
        }
    }

    fn committed(&self, from: RequestStatus, after: &Request, actor: &PartyId, started: Instant) {
        tracing::info!(
            request_id = %after.id,
            actor = %actor,
            from = %from,
            to = %after.status,
            revision = after.revision,
            "Request transitioned"
        );
        transitions::record(after.status, Some(started.elapsed()));

        self.bridge
            .publish(TransitionEvent::committed(from, after, actor.clone()));
    }
}

impl std::fmt::Debug for RequestLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLifecycle")
            .field("policy", &self.policy)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

fn validate_draft(draft: &NewRequest, now: DateTime<Utc>) -> Result<DateTime<Utc>, LifecycleError> {
    if draft.requester_id.is_blank() {
        return Err(LifecycleError::InvalidArgument(
            "requester_id must not be blank".to_string(),
        ));
    }
    if draft.origin.trim().is_empty() {
        return Err(LifecycleError::InvalidArgument(
            "origin must not be blank".to_string(),
        ));
    }
    if draft.destination.trim().is_empty() {
        return Err(LifecycleError::InvalidArgument(
            "destination must not be blank".to_string(),
        ));
    }
    match draft.scheduled_at {
        None => Err(LifecycleError::InvalidArgument(
            "scheduled_at is required".to_string(),
        )),
        Some(at) if at <= now => Err(LifecycleError::InvalidArgument(format!(
            "scheduled_at {at} is not in the future"
        ))),
        Some(at) => Ok(at),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::memory::InMemoryRequestStore;
    use chrono::Duration;
    use reservation_core::AdvancePolicy;
    use reservation_testing::{FixedClock, test_clock};

    fn lifecycle() -> RequestLifecycle {
        RequestLifecycle::new(Arc::new(InMemoryRequestStore::new()), Arc::new(test_clock()))
    }

    fn draft(requester: &str) -> NewRequest {
        NewRequest {
            requester_id: PartyId::from(requester),
            origin: "Library".to_string(),
            destination: "Gate 2".to_string(),
            scheduled_at: Some(test_clock().now() + Duration::minutes(30)),
            note: Some("Bring a torch".to_string()),
            contact: Some(Contact::new("555-0101")),
        }
    }

    #[tokio::test]
    async fn test_create_produces_pending_request() {
        let lifecycle = lifecycle();

        let request = lifecycle.create(draft("u1")).await.unwrap();

        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.claimant_id, None);
        assert_eq!(request.requester_contact, Some(Contact::new("555-0101")));
        assert_eq!(request.revision, 0);
        assert_eq!(lifecycle.get(request.id).await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_origin() {
        let lifecycle = lifecycle();
        let mut invalid = draft("u1");
        invalid.origin = "   ".to_string();

        let result = lifecycle.create(invalid).await;

        assert!(matches!(result, Err(LifecycleError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_create_requires_future_schedule() {
        let lifecycle = lifecycle();

        let mut missing = draft("u1");
        missing.scheduled_at = None;
        assert!(matches!(
            lifecycle.create(missing).await,
            Err(LifecycleError::InvalidArgument(_))
        ));

        let mut past = draft("u1");
        past.scheduled_at = Some(test_clock().now() - Duration::minutes(1));
        assert!(matches!(
            lifecycle.create(past).await,
            Err(LifecycleError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_full_walk_to_completion() {
        let lifecycle = lifecycle();
        let requester = PartyId::from("u1");
        let claimant = PartyId::from("u2");
        let id = lifecycle.create(draft("u1")).await.unwrap().id;

        lifecycle.accept(id, &claimant, None).await.unwrap();
        let started = lifecycle.advance(id, &claimant).await.unwrap();
        assert_eq!(started.status, RequestStatus::InProgress);

        let done = lifecycle.complete(id, &requester).await.unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        assert_eq!(done.revision, 3);
        assert_eq!(done.claimant_id, Some(claimant));
    }

    #[tokio::test]
    async fn test_requester_cannot_advance_under_default_policy() {
        let lifecycle = lifecycle();
        let id = lifecycle.create(draft("u1")).await.unwrap().id;
        lifecycle.accept(id, &PartyId::from("u2"), None).await.unwrap();

        let result = lifecycle.advance(id, &PartyId::from("u1")).await;

        assert!(matches!(result, Err(LifecycleError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_either_party_policy_lets_requester_advance() {
        let lifecycle = lifecycle().with_policy(LifecyclePolicy {
            advance: AdvancePolicy::EitherParty,
        });
        let id = lifecycle.create(draft("u1")).await.unwrap().id;
        lifecycle.accept(id, &PartyId::from("u2"), None).await.unwrap();

        let advanced = lifecycle.advance(id, &PartyId::from("u1")).await.unwrap();

        assert_eq!(advanced.status, RequestStatus::InProgress);
    }

    #[tokio::test]
    async fn test_complete_pending_is_invalid_transition() {
        let lifecycle = lifecycle();
        let id = lifecycle.create(draft("u1")).await.unwrap().id;

        let result = lifecycle.complete(id, &PartyId::from("u1")).await;

        assert!(matches!(result, Err(LifecycleError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_stranger_cannot_cancel() {
        let lifecycle = lifecycle();
        let id = lifecycle.create(draft("u1")).await.unwrap().id;

        let result = lifecycle.cancel(id, &PartyId::from("u9")).await;

        assert!(matches!(result, Err(LifecycleError::Forbidden(_))));
        assert_eq!(
            lifecycle.get(id).await.unwrap().status,
            RequestStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_cancelled_request_is_immutable() {
        let lifecycle = lifecycle();
        let requester = PartyId::from("u1");
        let id = lifecycle.create(draft("u1")).await.unwrap().id;
        lifecycle.cancel(id, &requester).await.unwrap();

        for result in [
            lifecycle.accept(id, &PartyId::from("u2"), None).await,
            lifecycle.advance(id, &requester).await,
            lifecycle.complete(id, &requester).await,
            lifecycle.cancel(id, &requester).await,
        ] {
            assert!(
                matches!(result, Err(LifecycleError::InvalidTransition(_))),
                "unexpected {result:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_transitions_are_published_after_commit() {
        let lifecycle = lifecycle();
        let mut events = lifecycle.bridge().subscribe();
        let claimant = PartyId::from("u2");

        let id = lifecycle.create(draft("u1")).await.unwrap().id;
        lifecycle.accept(id, &claimant, None).await.unwrap();
        lifecycle.cancel(id, &claimant).await.unwrap();

        let created = events.recv().await.unwrap();
        assert_eq!(created.from, None);
        assert_eq!(created.to, RequestStatus::Pending);

        let claimed = events.recv().await.unwrap();
        assert_eq!(claimed.from, Some(RequestStatus::Pending));
        assert_eq!(claimed.to, RequestStatus::Claimed);
        assert_eq!(claimed.actor, claimant);

        let cancelled = events.recv().await.unwrap();
        assert_eq!(cancelled.from, Some(RequestStatus::Claimed));
        assert_eq!(cancelled.to, RequestStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_rejected_transition_publishes_nothing() {
        let lifecycle = lifecycle();
        let id = lifecycle.create(draft("u1")).await.unwrap().id;
        let mut events = lifecycle.bridge().subscribe();

        let _ = lifecycle.complete(id, &PartyId::from("u1")).await;

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_updated_at_follows_clock() {
        let store: Arc<dyn RequestStore> = Arc::new(InMemoryRequestStore::new());
        let start = test_clock().now();
        let creator = RequestLifecycle::new(Arc::clone(&store), Arc::new(test_clock()));
        let later = RequestLifecycle::new(
            store,
            Arc::new(FixedClock::new(start + Duration::minutes(5))),
        );

        let id = creator.create(draft("u1")).await.unwrap().id;
        let claimed = later.accept(id, &PartyId::from("u2"), None).await.unwrap();

        assert_eq!(claimed.created_at, start);
        assert_eq!(claimed.updated_at, start + Duration::minutes(5));
    }

    #[test]
    fn test_observed_status_round_trips() {
        let observed = ObservedStatus::new();
        assert_eq!(observed.get(), None);
        observed.record(RequestStatus::InProgress);
        assert_eq!(observed.get(), Some(RequestStatus::InProgress));
    }

    #[test]
    fn test_corrupted_record_maps_to_invalid_transition() {
        let id = RequestId::new();
        let err = lifecycle_error(StoreError::Corrupted("bad status".into()), id);
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    }
}
