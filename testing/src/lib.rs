//! # Reservation Testing
//!
//! Testing utilities for the reservation crates.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - A fault-injecting store wrapper (`FlakyRequestStore`)
//! - Draft builders and snapshot helpers
//! - proptest strategies for domain types
//!
//! ## Example
//!
//! ```
//! use reservation_testing::{library_to_gate, test_clock};
//! use reservation_core::environment::Clock;
//!
//! let draft = library_to_gate("u1");
//! assert!(draft.scheduled_at.unwrap() > test_clock().now());
//! ```

use chrono::{DateTime, Utc};
use reservation_core::environment::Clock;

/// Mock implementations of environment traits and the store.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use reservation_core::store::{Mutator, Precondition, SnapshotStream, StoreFuture};
    use reservation_core::{Request, RequestId, RequestQuery, RequestStore, StoreError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use reservation_testing::mocks::FixedClock;
    /// use reservation_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Millisecond resolution.
    #[derive(Debug)]
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        /// Start the clock at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(time.timestamp_millis()),
            }
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }

        /// Jump to `time`, which may be in the past.
        pub fn set(&self, time: DateTime<Utc>) {
            self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
                .unwrap_or(DateTime::UNIX_EPOCH)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Store wrapper that fails a configurable number of calls.
    ///
    /// Armed failures are consumed one per call, oldest operation first;
    /// once they run out calls reach the wrapped store. `create` is never
    /// failed, and an update is only failed before it reaches the wrapped
    /// store, so tests can reason about what was committed.
    pub struct FlakyRequestStore {
        inner: Arc<dyn RequestStore>,
        failing_gets: AtomicU32,
        failing_subscribes: AtomicU32,
        corrupt_gets: AtomicU32,
        corrupt_updates: AtomicU32,
        get_calls: AtomicU32,
        subscribe_calls: AtomicU32,
    }

    impl FlakyRequestStore {
        /// Wrap `inner` with no failures armed.
        #[must_use]
        pub fn new(inner: Arc<dyn RequestStore>) -> Self {
            Self {
                inner,
                failing_gets: AtomicU32::new(0),
                failing_subscribes: AtomicU32::new(0),
                corrupt_gets: AtomicU32::new(0),
                corrupt_updates: AtomicU32::new(0),
                get_calls: AtomicU32::new(0),
                subscribe_calls: AtomicU32::new(0),
            }
        }

        /// Fail the next `n` reads with [`StoreError::Transient`].
        #[must_use]
        pub fn failing_gets(self, n: u32) -> Self {
            self.failing_gets.store(n, Ordering::SeqCst);
            self
        }

        /// Fail the next `n` subscription attempts with [`StoreError::Transient`].
        #[must_use]
        pub fn failing_subscribes(self, n: u32) -> Self {
            self.failing_subscribes.store(n, Ordering::SeqCst);
            self
        }

        /// Fail the next `n` reads with [`StoreError::Corrupted`].
        #[must_use]
        pub fn corrupt_gets(self, n: u32) -> Self {
            self.corrupt_gets.store(n, Ordering::SeqCst);
            self
        }

        /// Fail the next `n` updates with [`StoreError::Corrupted`], as if the
        /// record read under the lock did not decode.
        #[must_use]
        pub fn corrupt_updates(self, n: u32) -> Self {
            self.corrupt_updates.store(n, Ordering::SeqCst);
            self
        }

        /// Number of `get` calls seen, failed ones included.
        #[must_use]
        pub fn get_calls(&self) -> u32 {
            self.get_calls.load(Ordering::SeqCst)
        }

        /// Number of `subscribe` calls seen, failed ones included.
        #[must_use]
        pub fn subscribe_calls(&self) -> u32 {
            self.subscribe_calls.load(Ordering::SeqCst)
        }

        fn take(counter: &AtomicU32) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl std::fmt::Debug for FlakyRequestStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FlakyRequestStore")
                .field("get_calls", &self.get_calls())
                .field("subscribe_calls", &self.subscribe_calls())
                .finish_non_exhaustive()
        }
    }

    impl RequestStore for FlakyRequestStore {
        fn create(&self, request: Request) -> StoreFuture<'_, RequestId> {
            self.inner.create(request)
        }

        fn get(&self, id: RequestId) -> StoreFuture<'_, Request> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            if Self::take(&self.failing_gets) {
                return Box::pin(async {
                    Err(StoreError::Transient("injected read failure".into()))
                });
            }
            if Self::take(&self.corrupt_gets) {
                return Box::pin(async move {
                    Err(StoreError::Corrupted(format!("injected corruption for {id}")))
                });
            }
            self.inner.get(id)
        }

        fn transactional_update(
            &self,
            id: RequestId,
            precondition: Precondition,
            mutator: Mutator,
        ) -> StoreFuture<'_, Request> {
            if Self::take(&self.corrupt_updates) {
                return Box::pin(async move {
                    Err(StoreError::Corrupted(format!("injected corruption for {id}")))
                });
            }
            self.inner.transactional_update(id, precondition, mutator)
        }

        fn subscribe(&self, query: RequestQuery) -> StoreFuture<'_, SnapshotStream> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            if Self::take(&self.failing_subscribes) {
                return Box::pin(async {
                    Err(StoreError::Transient("injected subscribe failure".into()))
                });
            }
            self.inner.subscribe(query)
        }
    }
}

/// Draft builders and stream helpers.
pub mod helpers {
    use super::{Clock, DateTime, Utc, test_clock};
    use futures::StreamExt;
    use reservation_core::{Contact, NewRequest, PartyId, Request, SnapshotStream};
    use std::time::Duration;

    /// How long [`next_snapshot`] waits before failing the test.
    pub const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Builder for [`NewRequest`] drafts.
    ///
    /// Defaults to the library-to-gate walk, scheduled 30 minutes after
    /// [`test_clock`].
    #[derive(Debug, Clone)]
    pub struct DraftBuilder {
        draft: NewRequest,
    }

    impl DraftBuilder {
        /// Start a draft posted by `requester`.
        #[must_use]
        pub fn new(requester: &str) -> Self {
            Self {
                draft: NewRequest {
                    requester_id: PartyId::from(requester),
                    origin: "Library".to_string(),
                    destination: "Gate 2".to_string(),
                    scheduled_at: Some(test_clock().now() + chrono::Duration::minutes(30)),
                    note: None,
                    contact: None,
                },
            }
        }

        /// Set the origin.
        #[must_use]
        pub fn origin(mut self, origin: &str) -> Self {
            self.draft.origin = origin.to_string();
            self
        }

        /// Set the destination.
        #[must_use]
        pub fn destination(mut self, destination: &str) -> Self {
            self.draft.destination = destination.to_string();
            self
        }

        /// Set or clear the schedule.
        #[must_use]
        pub const fn scheduled_at(mut self, at: Option<DateTime<Utc>>) -> Self {
            self.draft.scheduled_at = at;
            self
        }

        /// Schedule `minutes` after [`test_clock`].
        #[must_use]
        pub fn in_minutes(self, minutes: i64) -> Self {
            self.scheduled_at(Some(test_clock().now() + chrono::Duration::minutes(minutes)))
        }

        /// Attach a note.
        #[must_use]
        pub fn note(mut self, note: &str) -> Self {
            self.draft.note = Some(note.to_string());
            self
        }

        /// Attach the requester's contact.
        #[must_use]
        pub fn contact(mut self, contact: &str) -> Self {
            self.draft.contact = Some(Contact::new(contact));
            self
        }

        /// Finish the draft.
        #[must_use]
        pub fn build(self) -> NewRequest {
            self.draft
        }
    }

    /// The canonical "Library to Gate 2, in 30 minutes" draft.
    #[must_use]
    pub fn library_to_gate(requester: &str) -> NewRequest {
        DraftBuilder::new(requester).build()
    }

    /// Await the next snapshot from a live view.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`SNAPSHOT_TIMEOUT`], the stream ends,
    /// or it yields an error.
    #[allow(clippy::expect_used, clippy::panic)]
    pub async fn next_snapshot(stream: &mut SnapshotStream) -> Vec<Request> {
        match tokio::time::timeout(SNAPSHOT_TIMEOUT, stream.next())
            .await
            .expect("snapshot within timeout")
        {
            Some(Ok(snapshot)) => snapshot,
            Some(Err(err)) => panic!("view failed: {err}"),
            None => panic!("view ended"),
        }
    }

    /// Assert that a view emits nothing for `within`.
    ///
    /// # Panics
    ///
    /// Panics if a snapshot arrives.
    #[allow(clippy::panic)]
    pub async fn assert_quiet(stream: &mut SnapshotStream, within: Duration) {
        if let Ok(item) = tokio::time::timeout(within, stream.next()).await {
            panic!("expected no snapshot, got {item:?}");
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use reservation_core::PartyId;

    /// Party ids drawn from a small pool so collisions happen.
    pub fn party_id() -> impl Strategy<Value = PartyId> {
        (1u8..=6).prop_map(|n| PartyId::new(format!("u{n}")))
    }
}

// Re-export commonly used items
pub use helpers::{DraftBuilder, assert_quiet, library_to_gate, next_snapshot};
pub use mocks::{FixedClock, FlakyRequestStore, ManualClock, test_clock};
