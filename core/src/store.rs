//! The persistence contract the lifecycle is built on.
//!
//! A [`RequestStore`] offers exactly two capabilities beyond plain reads:
//!
//! - **Atomic conditional update**: [`RequestStore::transactional_update`] reads
//!   the current record, evaluates a precondition and applies a mutator without
//!   any observable intermediate state. It is the single point of mutual
//!   exclusion for a record.
//! - **Live queries**: [`RequestStore::subscribe`] yields the full result set of
//!   a [`RequestQuery`] and re-emits it whenever it changes.
//!
//! # Implementations
//!
//! - `InMemoryRequestStore` (in `reservation-runtime`): per-record locks plus a
//!   broadcast change feed
//! - `PostgresRequestStore` (in `reservation-postgres`): `SELECT ... FOR UPDATE`
//!   transactions plus `LISTEN/NOTIFY`
//!
//! # Dyn Compatibility
//!
//! Like the event store and event bus traits, this trait returns
//! `Pin<Box<dyn Future>>` instead of using `async fn` so it can be shared as
//! `Arc<dyn RequestStore>`.

use futures::Stream;
use std::future::Future;
use std::pin::Pin;

use crate::error::StoreError;
use crate::query::RequestQuery;
use crate::request::{Request, RequestId};

/// Precondition half of a conditional update.
///
/// May be evaluated more than once by stores that re-check after an
/// optimistic-concurrency conflict.
pub type Precondition = Box<dyn Fn(&Request) -> bool + Send + Sync>;

/// Mutator half of a conditional update.
pub type Mutator = Box<dyn Fn(&Request) -> Request + Send + Sync>;

/// A live sequence of query snapshots.
///
/// The first item is the current result set. A failure is delivered as a
/// single `Err` item, after which the stream ends. Dropping the stream cancels
/// the subscription.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<Vec<Request>, StoreError>> + Send>>;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Durable storage for requests.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; every operation may be called
/// concurrently from many tasks against many records.
pub trait RequestStore: Send + Sync {
    /// Store a new record and return its id.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Invalid`]: required fields are blank
    /// - [`StoreError::Transient`]: the backend is unavailable
    fn create(&self, request: Request) -> StoreFuture<'_, RequestId>;

    /// Load a record by id.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such record
    /// - [`StoreError::Corrupted`]: the stored record cannot be decoded
    /// - [`StoreError::Transient`]: the backend is unavailable
    fn get(&self, id: RequestId) -> StoreFuture<'_, Request>;

    /// Atomically read, check and rewrite one record.
    ///
    /// If `precondition(current)` is false nothing is written and
    /// [`StoreError::PreconditionFailed`] carries the observed record. Otherwise
    /// `mutator(current)` is persisted and returned. Conflicts are never retried
    /// here; the caller decides.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`]: no such record
    /// - [`StoreError::PreconditionFailed`]: the precondition rejected the record
    /// - [`StoreError::Corrupted`]: the stored record cannot be decoded
    /// - [`StoreError::Transient`]: the outcome is unknown; re-read to confirm
    fn transactional_update(
        &self,
        id: RequestId,
        precondition: Precondition,
        mutator: Mutator,
    ) -> StoreFuture<'_, Request>;

    /// Open a live subscription to `query`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Transient`]: the subscription could not be established
    fn subscribe(&self, query: RequestQuery) -> StoreFuture<'_, SnapshotStream>;
}

/// Reject drafts with blank required fields before they reach storage.
///
/// # Errors
///
/// Returns [`StoreError::Invalid`] naming the first blank field.
pub fn validate_record(request: &Request) -> Result<(), StoreError> {
    if request.requester_id.is_blank() {
        return Err(StoreError::Invalid("requester id is blank".to_string()));
    }
    if request.origin.trim().is_empty() {
        return Err(StoreError::Invalid("origin is blank".to_string()));
    }
    if request.destination.trim().is_empty() {
        return Err(StoreError::Invalid("destination is blank".to_string()));
    }
    if request.status != crate::request::RequestStatus::Pending {
        return Err(StoreError::Invalid(format!(
            "new requests must be pending, got {}",
            request.status
        )));
    }
    Ok(())
}
