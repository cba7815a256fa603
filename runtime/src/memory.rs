//! In-memory [`RequestStore`] implementation.
//!
//! Records live behind individual `tokio::sync::Mutex`es inside a shared map,
//! so conditional updates on the same record are serialized while updates on
//! different records never contend. Every commit is published on a broadcast
//! change feed while the record lock is still held, which keeps the feed in
//! commit order per record.
//!
//! Subscribers register on the change feed *before* taking their initial
//! snapshot and discard any change whose `revision` they have already seen.

use futures::StreamExt;
use reservation_core::store::{Mutator, Precondition, SnapshotStream, StoreFuture, validate_record};
use reservation_core::{Request, RequestId, RequestQuery, RequestStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock, broadcast};

type Records = Arc<RwLock<HashMap<RequestId, Arc<Mutex<Request>>>>>;

/// Default capacity of the change feed.
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 1024;

/// Fast, process-local request store.
///
/// Cloning is cheap and every clone shares the same records and change feed.
///
/// # Example
///
/// ```
/// use reservation_runtime::memory::InMemoryRequestStore;
/// use reservation_core::RequestStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryRequestStore::new();
/// assert!(store.is_empty().await);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryRequestStore {
    records: Records,
    changes: broadcast::Sender<Request>,
}

impl InMemoryRequestStore {
    /// Create an empty store with the default change-feed capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_change_feed_capacity(DEFAULT_CHANGE_FEED_CAPACITY)
    }

    /// Create an empty store whose change feed buffers `capacity` commits.
    ///
    /// Subscribers that fall further behind resynchronise from a full rescan.
    #[must_use]
    pub fn with_change_feed_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn record(&self, id: RequestId) -> Result<Arc<Mutex<Request>>, StoreError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}

impl Default for InMemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Clone every record, locking each one only briefly.
async fn snapshot_all(records: &Records) -> Vec<Request> {
    let handles: Vec<_> = records.read().await.values().cloned().collect();
    let mut all = Vec::with_capacity(handles.len());
    for handle in handles {
        all.push(handle.lock().await.clone());
    }
    all
}

impl RequestStore for InMemoryRequestStore {
    fn create(&self, request: Request) -> StoreFuture<'_, RequestId> {
        Box::pin(async move {
            validate_record(&request)?;
            let id = request.id;

            let mut records = self.records.write().await;
            if records.contains_key(&id) {
                return Err(StoreError::Invalid(format!("request {id} already exists")));
            }
            records.insert(id, Arc::new(Mutex::new(request.clone())));
            // Sent under the map lock so no update to this record can precede it
            let _ = self.changes.send(request);
            drop(records);

            tracing::debug!(request_id = %id, "Request stored");
            Ok(id)
        })
    }

    fn get(&self, id: RequestId) -> StoreFuture<'_, Request> {
        Box::pin(async move {
            let record = self.record(id).await?;
            let request = record.lock().await.clone();
            Ok(request)
        })
    }

    fn transactional_update(
        &self,
        id: RequestId,
        precondition: Precondition,
        mutator: Mutator,
    ) -> StoreFuture<'_, Request> {
        Box::pin(async move {
            let record = self.record(id).await?;
            let mut current = record.lock().await;

            if !precondition(&*current) {
                return Err(StoreError::PreconditionFailed {
                    current: Box::new(current.clone()),
                });
            }

            let next = mutator(&*current);
            if next.id != current.id {
                return Err(StoreError::Invalid(format!(
                    "mutator changed the id of request {id}"
                )));
            }
            *current = next.clone();
            let _ = self.changes.send(next.clone());
            drop(current);

            Ok(next)
        })
    }

    fn subscribe(&self, query: RequestQuery) -> StoreFuture<'_, SnapshotStream> {
        Box::pin(async move {
            // Register before the snapshot so no commit falls between the two
            let mut changes = self.changes.subscribe();
            let records = Arc::clone(&self.records);
            let mut view = LiveView::new(query, snapshot_all(&records).await);

            let stream = async_stream::stream! {
                yield Ok::<_, StoreError>(view.current());
                loop {
                    match changes.recv().await {
                        Ok(changed) => {
                            if let Some(snapshot) = view.apply(changed) {
                                yield Ok(snapshot);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                skipped,
                                query = view.query.name(),
                                "Subscription lagged, resynchronising"
                            );
                            if let Some(snapshot) = view.reset(snapshot_all(&records).await) {
                                yield Ok(snapshot);
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            };

            Ok(stream.boxed())
        })
    }
}

/// Incrementally maintained result set of one subscription.
struct LiveView {
    query: RequestQuery,
    /// Highest revision seen per record, members or not
    seen: HashMap<RequestId, u64>,
    members: HashMap<RequestId, Request>,
    last: Vec<Request>,
}

impl LiveView {
    fn new(query: RequestQuery, all: Vec<Request>) -> Self {
        let mut view = Self {
            query,
            seen: HashMap::new(),
            members: HashMap::new(),
            last: Vec::new(),
        };
        view.rebuild(all);
        view.last = view.project();
        view
    }

    fn current(&self) -> Vec<Request> {
        self.last.clone()
    }

    /// Fold one committed record in; returns a snapshot if the result set changed.
    fn apply(&mut self, changed: Request) -> Option<Vec<Request>> {
        if self
            .seen
            .get(&changed.id)
            .is_some_and(|&revision| revision >= changed.revision)
        {
            return None;
        }
        self.seen.insert(changed.id, changed.revision);
        if self.query.matches(&changed) {
            self.members.insert(changed.id, changed);
        } else if self.members.remove(&changed.id).is_none() {
            return None;
        }
        self.emit_if_changed()
    }

    /// Replace all state from a full rescan.
    fn reset(&mut self, all: Vec<Request>) -> Option<Vec<Request>> {
        self.rebuild(all);
        self.emit_if_changed()
    }

    fn rebuild(&mut self, all: Vec<Request>) {
        for request in all {
            let newer = self
                .seen
                .get(&request.id)
                .is_none_or(|&revision| revision <= request.revision);
            if !newer {
                continue;
            }
            self.seen.insert(request.id, request.revision);
            if self.query.matches(&request) {
                self.members.insert(request.id, request);
            } else {
                self.members.remove(&request.id);
            }
        }
    }

    fn project(&self) -> Vec<Request> {
        self.query.project(self.members.values())
    }

    fn emit_if_changed(&mut self) -> Option<Vec<Request>> {
        let snapshot = self.project();
        if snapshot == self.last {
            return None;
        }
        self.last.clone_from(&snapshot);
        Some(snapshot)
    }
}
