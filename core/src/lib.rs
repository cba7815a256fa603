//! # Reservation Core
//!
//! Core types and rules for exclusive-claim reservations.
//!
//! One party posts a [`Request`](request::Request); any other party may claim
//! it; exactly one claim succeeds even when many arrive at once; the claimed
//! request then walks a linear lifecycle to completion or cancellation.
//!
//! ## Core Concepts
//!
//! - **Request**: The shared record and its closed [`RequestStatus`](request::RequestStatus)
//! - **Command**: A precondition/mutator pair describing one transition
//! - **RequestStore**: Atomic conditional update plus live queries
//! - **RequestQuery**: The predicates behind the open-pool and per-party views
//! - **TransitionEvent**: What observers hear after a commit
//! - **Environment**: Injected dependencies such as the [`Clock`](environment::Clock)
//!
//! ## Architecture Principles
//!
//! - Functional core: transition rules are pure functions of the current record
//! - All mutation goes through one atomic store primitive
//! - Identity is passed explicitly; there is no ambient current user
//!
//! ## Example
//!
//! ```
//! use reservation_core::request::{PartyId, RequestStatus};
//! use reservation_core::transition::{Command, LifecyclePolicy};
//! # use reservation_core::request::{NewRequest, Request, RequestId};
//! # let now = chrono::Utc::now();
//! # let request = Request::pending(
//! #     RequestId::new(),
//! #     NewRequest {
//! #         requester_id: PartyId::from("u1"),
//! #         origin: "Library".into(),
//! #         destination: "Gate 2".into(),
//! #         scheduled_at: None,
//! #         note: None,
//! #         contact: None,
//! #     },
//! #     now + chrono::Duration::minutes(30),
//! #     now,
//! # );
//!
//! let accept = Command::Accept { caller: PartyId::from("u2"), contact: None };
//! assert!(accept.permits(&request, LifecyclePolicy::default()));
//! assert_eq!(accept.apply(&request, now).status, RequestStatus::Claimed);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod error;
pub mod event;
pub mod query;
pub mod request;
pub mod store;
pub mod transition;

pub use error::{LifecycleError, StoreError};
pub use event::TransitionEvent;
pub use query::RequestQuery;
pub use request::{Contact, NewRequest, PartyId, Request, RequestId, RequestStatus};
pub use store::{Mutator, Precondition, RequestStore, SnapshotStream, StoreFuture};
pub use transition::{AdvancePolicy, Command, LifecyclePolicy};

/// Environment module - Dependency injection traits
///
/// All sources of non-determinism are abstracted behind traits and injected,
/// so the same code runs against the system clock in production and a fixed
/// clock in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
