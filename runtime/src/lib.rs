//! # Reservation Runtime
//!
//! Runtime services for exclusive-claim reservations.
//!
//! This crate wires the pure rules from `reservation-core` to storage and
//! observers:
//!
//! - [`RequestLifecycle`](lifecycle::RequestLifecycle): the command surface
//!   (create, accept, advance, complete, cancel, get)
//! - [`ClaimArbiter`](arbiter::ClaimArbiter): exactly-once claims
//! - [`RequestViews`](views::RequestViews): live open-pool / mine /
//!   as-claimant projections
//! - [`NotificationBridge`](notification::NotificationBridge): fan-out of
//!   committed transitions
//! - [`InMemoryRequestStore`](memory::InMemoryRequestStore) and the
//!   [`RetryingRequestStore`](retrying::RetryingRequestStore) decorator
//!
//! ## Example
//!
//! ```
//! use reservation_core::environment::SystemClock;
//! use reservation_core::{NewRequest, PartyId, RequestStatus};
//! use reservation_runtime::{InMemoryRequestStore, RequestLifecycle};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lifecycle = RequestLifecycle::new(
//!     Arc::new(InMemoryRequestStore::new()),
//!     Arc::new(SystemClock),
//! );
//!
//! let request = lifecycle
//!     .create(NewRequest {
//!         requester_id: PartyId::from("u1"),
//!         origin: "Library".into(),
//!         destination: "Gate 2".into(),
//!         scheduled_at: Some(chrono::Utc::now() + chrono::Duration::minutes(30)),
//!         note: None,
//!         contact: None,
//!     })
//!     .await?;
//!
//! let claimed = lifecycle.accept(request.id, &PartyId::from("u2"), None).await?;
//! assert_eq!(claimed.status, RequestStatus::Claimed);
//! # Ok(())
//! # }
//! ```

pub mod arbiter;
pub mod config;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod notification;
pub mod retry;
pub mod retrying;
pub mod views;

pub use arbiter::ClaimArbiter;
pub use config::{ConfigError, RuntimeConfig};
pub use lifecycle::RequestLifecycle;
pub use memory::InMemoryRequestStore;
pub use notification::NotificationBridge;
pub use retry::RetryPolicy;
pub use retrying::RetryingRequestStore;
pub use views::RequestViews;
