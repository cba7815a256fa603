//! End-to-end lifecycle scenarios against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use proptest::prelude::*;
use reservation_core::environment::Clock;
use reservation_core::{Contact, LifecycleError, PartyId, RequestStatus, RequestStore};
use reservation_runtime::retry::RetryPolicy;
use reservation_runtime::{InMemoryRequestStore, RequestLifecycle};
use reservation_testing::properties::party_id;
use reservation_testing::{
    DraftBuilder, FlakyRequestStore, ManualClock, assert_quiet, library_to_gate, next_snapshot,
    test_clock,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn lifecycle() -> RequestLifecycle {
    lifecycle_over(Arc::new(InMemoryRequestStore::new()))
}

fn lifecycle_over(store: Arc<dyn RequestStore>) -> RequestLifecycle {
    RequestLifecycle::new(store, Arc::new(test_clock()))
}

fn party(id: &str) -> PartyId {
    PartyId::from(id)
}

#[tokio::test]
async fn library_to_gate_scenario() {
    let lifecycle = lifecycle();

    let r1 = lifecycle.create(library_to_gate("u1")).await.unwrap();
    assert_eq!(r1.status, RequestStatus::Pending);
    assert_eq!(r1.scheduled_at, test_clock().now() + chrono::Duration::minutes(30));

    let claimed = lifecycle.accept(r1.id, &party("u2"), None).await.unwrap();
    assert_eq!(claimed.status, RequestStatus::Claimed);
    assert_eq!(claimed.claimant_id, Some(party("u2")));

    assert_eq!(
        lifecycle.accept(r1.id, &party("u3"), None).await,
        Err(LifecycleError::AlreadyClaimed(r1.id))
    );

    let cancelled = lifecycle.cancel(r1.id, &party("u1")).await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(cancelled.claimant_id, Some(party("u2")));

    assert!(matches!(
        lifecycle.accept(r1.id, &party("u4"), None).await,
        Err(LifecycleError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn self_claim_leaves_request_pending() {
    let lifecycle = lifecycle();
    let r1 = lifecycle.create(library_to_gate("u1")).await.unwrap();

    assert!(matches!(
        lifecycle.accept(r1.id, &party("u1"), None).await,
        Err(LifecycleError::Forbidden(_))
    ));
    assert_eq!(
        lifecycle.get(r1.id).await.unwrap().status,
        RequestStatus::Pending
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_accepts_have_exactly_one_winner() {
    let lifecycle = lifecycle();
    let mut events = lifecycle.bridge().subscribe();
    let id = lifecycle.create(library_to_gate("u1")).await.unwrap().id;
    let _created = events.recv().await.unwrap();

    let mut handles = Vec::new();
    for n in 2..=65 {
        let lifecycle = lifecycle.clone();
        handles.push(tokio::spawn(async move {
            let caller = PartyId::new(format!("u{n}"));
            let outcome = lifecycle
                .accept(id, &caller, Some(Contact::new(format!("555-{n:04}"))))
                .await;
            (caller, outcome)
        }));
    }

    let mut winners = Vec::new();
    let mut losers = 0;
    for handle in handles {
        match handle.await.unwrap() {
            (caller, Ok(_)) => winners.push(caller),
            (_, Err(LifecycleError::AlreadyClaimed(lost))) => {
                assert_eq!(lost, id);
                losers += 1;
            }
            (_, Err(other)) => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(losers, 63);

    let stored = lifecycle.get(id).await.unwrap();
    assert_eq!(stored.claimant_id.as_ref(), winners.first());
    assert_eq!(stored.revision, 1);

    let claimed = events.recv().await.unwrap();
    assert_eq!(claimed.to, RequestStatus::Claimed);
    assert_eq!(Some(&claimed.actor), winners.first());
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn accepts_on_different_requests_are_independent() {
    let lifecycle = lifecycle();
    let mut ids = Vec::new();
    for n in 0..16 {
        let draft = DraftBuilder::new("u1").in_minutes(30 + n).build();
        ids.push(lifecycle.create(draft).await.unwrap().id);
    }

    let mut handles = Vec::new();
    for (n, id) in ids.iter().copied().enumerate() {
        let lifecycle = lifecycle.clone();
        handles.push(tokio::spawn(async move {
            lifecycle.accept(id, &PartyId::new(format!("c{n}")), None).await
        }));
    }

    let mut claimants = HashSet::new();
    for handle in handles {
        let claimed = handle.await.unwrap().unwrap();
        claimants.insert(claimed.claimant_id.unwrap());
    }
    assert_eq!(claimants.len(), ids.len());
}

#[tokio::test]
async fn completed_request_is_immutable() {
    let lifecycle = lifecycle();
    let (requester, claimant) = (party("u1"), party("u2"));
    let id = lifecycle.create(library_to_gate("u1")).await.unwrap().id;

    assert_ok!(lifecycle.accept(id, &claimant, None).await);
    assert_ok!(lifecycle.advance(id, &claimant).await);
    let done = lifecycle.complete(id, &claimant).await.unwrap();
    assert_eq!(done.status, RequestStatus::Completed);

    for caller in [&requester, &claimant] {
        for outcome in [
            lifecycle.accept(id, &party("u3"), None).await,
            lifecycle.advance(id, caller).await,
            lifecycle.complete(id, caller).await,
            lifecycle.cancel(id, caller).await,
        ] {
            assert!(
                matches!(outcome, Err(LifecycleError::InvalidTransition(_))),
                "unexpected {outcome:?}"
            );
        }
    }
    assert_eq!(lifecycle.get(id).await.unwrap(), done);
}

#[tokio::test]
async fn claimant_may_cancel_in_progress_request() {
    let lifecycle = lifecycle();
    let claimant = party("u2");
    let id = lifecycle.create(library_to_gate("u1")).await.unwrap().id;
    lifecycle.accept(id, &claimant, None).await.unwrap();
    lifecycle.advance(id, &claimant).await.unwrap();

    let cancelled = lifecycle.cancel(id, &claimant).await.unwrap();

    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert_eq!(cancelled.revision, 3);
}

#[tokio::test]
async fn unknown_request_is_not_found_everywhere() {
    let lifecycle = lifecycle();
    let missing = reservation_core::RequestId::new();
    let caller = party("u2");

    assert_eq!(
        lifecycle.accept(missing, &caller, None).await,
        Err(LifecycleError::NotFound(missing))
    );
    assert_eq!(
        lifecycle.advance(missing, &caller).await,
        Err(LifecycleError::NotFound(missing))
    );
    assert_eq!(
        lifecycle.complete(missing, &caller).await,
        Err(LifecycleError::NotFound(missing))
    );
    assert_eq!(
        lifecycle.cancel(missing, &caller).await,
        Err(LifecycleError::NotFound(missing))
    );
    assert_eq!(
        lifecycle.get(missing).await,
        Err(LifecycleError::NotFound(missing))
    );
}

#[tokio::test]
async fn views_follow_each_transition() {
    let lifecycle = lifecycle();
    let views = lifecycle.views();
    let (requester, claimant, bystander) = (party("u1"), party("u2"), party("u3"));

    let mut pool = views.open_pool(&bystander).await.unwrap();
    let mut mine = views.mine(&requester).await.unwrap();
    let mut claimed = views.as_claimant(&claimant).await.unwrap();
    assert!(next_snapshot(&mut pool).await.is_empty());
    assert!(next_snapshot(&mut mine).await.is_empty());
    assert!(next_snapshot(&mut claimed).await.is_empty());

    let id = lifecycle.create(library_to_gate("u1")).await.unwrap().id;
    assert_eq!(next_snapshot(&mut pool).await[0].id, id);
    assert_eq!(next_snapshot(&mut mine).await[0].id, id);
    assert_quiet(&mut claimed, Duration::from_millis(50)).await;

    lifecycle.accept(id, &claimant, None).await.unwrap();
    assert!(next_snapshot(&mut pool).await.is_empty());
    assert_eq!(next_snapshot(&mut mine).await[0].status, RequestStatus::Claimed);
    assert_eq!(next_snapshot(&mut claimed).await[0].status, RequestStatus::Claimed);

    lifecycle.cancel(id, &requester).await.unwrap();
    assert_quiet(&mut pool, Duration::from_millis(50)).await;
    assert_eq!(next_snapshot(&mut mine).await[0].status, RequestStatus::Cancelled);
    assert_eq!(next_snapshot(&mut claimed).await[0].status, RequestStatus::Cancelled);
}

#[tokio::test]
async fn open_pool_is_ordered_by_schedule_and_mine_by_creation() {
    let clock = Arc::new(ManualClock::new(test_clock().now()));
    let lifecycle = RequestLifecycle::new(Arc::new(InMemoryRequestStore::new()), clock.clone());

    let later = lifecycle
        .create(DraftBuilder::new("u1").in_minutes(90).build())
        .await
        .unwrap();
    clock.advance(chrono::Duration::seconds(1));
    let sooner = lifecycle
        .create(DraftBuilder::new("u1").in_minutes(45).build())
        .await
        .unwrap();

    let views = lifecycle.views();
    let pool = next_snapshot(&mut views.open_pool(&party("u2")).await.unwrap()).await;
    let mine = next_snapshot(&mut views.mine(&party("u1")).await.unwrap()).await;

    let pool_ids: Vec<_> = pool.iter().map(|r| r.id).collect();
    let mine_ids: Vec<_> = mine.iter().map(|r| r.id).collect();
    assert_eq!(pool_ids, vec![sooner.id, later.id]);
    assert_eq!(mine_ids, vec![sooner.id, later.id]);
}

#[tokio::test]
async fn transient_reads_are_retried_before_surfacing() {
    let memory = Arc::new(InMemoryRequestStore::new());
    let setup = RequestLifecycle::new(memory.clone(), Arc::new(test_clock()));
    let id = setup.create(library_to_gate("u1")).await.unwrap().id;

    let policy = RetryPolicy::builder()
        .initial_delay(Duration::from_millis(1))
        .jitter(false)
        .build();

    let flaky = Arc::new(FlakyRequestStore::new(memory.clone()).failing_gets(2));
    let lifecycle =
        RequestLifecycle::with_retry_policy(flaky.clone(), Arc::new(test_clock()), policy.clone());
    let claimed = lifecycle.accept(id, &party("u2"), None).await.unwrap();
    assert_eq!(claimed.status, RequestStatus::Claimed);
    assert_eq!(flaky.get_calls(), 3);

    let exhausted = Arc::new(FlakyRequestStore::new(memory).failing_gets(3));
    let lifecycle =
        RequestLifecycle::with_retry_policy(exhausted, Arc::new(test_clock()), policy);
    let outcome = assert_err!(lifecycle.get(id).await);
    assert!(outcome.is_retryable());
}

#[tokio::test]
async fn default_lifecycle_retries_transient_reads() {
    let memory = Arc::new(InMemoryRequestStore::new());
    let id = lifecycle_over(memory.clone())
        .create(library_to_gate("u1"))
        .await
        .unwrap()
        .id;

    let flaky = Arc::new(FlakyRequestStore::new(memory).failing_gets(1));
    let lifecycle = RequestLifecycle::new(flaky.clone(), Arc::new(test_clock()));

    assert_eq!(lifecycle.get(id).await.unwrap().status, RequestStatus::Pending);
    assert_eq!(flaky.get_calls(), 2);
}

#[tokio::test]
async fn corruption_during_update_is_an_invalid_transition() {
    let memory = Arc::new(InMemoryRequestStore::new());
    let setup = lifecycle_over(memory.clone());
    let claimant = party("u2");
    let id = setup.create(library_to_gate("u1")).await.unwrap().id;
    let claimed = setup.accept(id, &claimant, None).await.unwrap();

    let flaky = Arc::new(FlakyRequestStore::new(memory).corrupt_updates(3));
    let lifecycle = lifecycle_over(flaky);
    let mut events = lifecycle.bridge().subscribe();

    for outcome in [
        lifecycle.advance(id, &claimant).await,
        lifecycle.complete(id, &claimant).await,
        lifecycle.cancel(id, &party("u1")).await,
    ] {
        assert!(
            matches!(outcome, Err(LifecycleError::InvalidTransition(_))),
            "unexpected {outcome:?}"
        );
    }
    assert!(events.try_recv().is_err());
    assert_eq!(lifecycle.get(id).await.unwrap(), claimed);
}

#[tokio::test]
async fn draft_details_reach_the_claimant() {
    let lifecycle = lifecycle();
    let draft = DraftBuilder::new("u1")
        .origin("Science Library")
        .destination("North Gate")
        .contact("555-0101")
        .note("Blue jacket")
        .build();
    let id = lifecycle.create(draft).await.unwrap().id;

    let mut claimed = lifecycle.views().as_claimant(&party("u2")).await.unwrap();
    assert!(next_snapshot(&mut claimed).await.is_empty());
    lifecycle.accept(id, &party("u2"), None).await.unwrap();

    let seen = next_snapshot(&mut claimed).await;
    assert_eq!(seen[0].origin, "Science Library");
    assert_eq!(seen[0].destination, "North Gate");
    assert_eq!(seen[0].requester_contact, Some(Contact::new("555-0101")));
    assert_eq!(seen[0].note.as_deref(), Some("Blue jacket"));
}

#[tokio::test]
async fn blank_destination_is_rejected() {
    let lifecycle = lifecycle();

    let outcome = lifecycle
        .create(DraftBuilder::new("u1").destination(" ").build())
        .await;

    assert!(matches!(outcome, Err(LifecycleError::InvalidArgument(_))));
}

#[tokio::test]
async fn corrupted_record_blocks_mutation() {
    let memory = Arc::new(InMemoryRequestStore::new());
    let setup = RequestLifecycle::new(memory.clone(), Arc::new(test_clock()));
    let id = setup.create(library_to_gate("u1")).await.unwrap().id;

    let flaky = Arc::new(FlakyRequestStore::new(memory).corrupt_gets(1));
    let lifecycle = RequestLifecycle::new(flaky, Arc::new(test_clock()));

    assert!(matches!(
        lifecycle.accept(id, &party("u2"), None).await,
        Err(LifecycleError::InvalidTransition(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn claim_sequences_settle_on_first_eligible_caller(
        callers in proptest::collection::vec(party_id(), 1..10),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let stored = runtime.block_on(async {
            let lifecycle = lifecycle();
            let id = lifecycle.create(library_to_gate("u1")).await.unwrap().id;
            for caller in &callers {
                let _ = lifecycle.accept(id, caller, None).await;
            }
            lifecycle.get(id).await.unwrap()
        });

        let expected = callers.iter().find(|caller| caller.as_str() != "u1");
        prop_assert_eq!(stored.claimant_id.as_ref(), expected);
        let status = if expected.is_some() {
            RequestStatus::Claimed
        } else {
            RequestStatus::Pending
        };
        prop_assert_eq!(stored.status, status);
        prop_assert_eq!(stored.revision, u64::from(expected.is_some()));
    }
}
