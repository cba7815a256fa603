//! Live per-viewer projections over the request store.
//!
//! Each view is a thin specialization of [`RequestStore::subscribe`]: an
//! independent, lazy, restartable stream of full snapshots. Dropping a stream
//! cancels it without affecting any other view.

use reservation_core::{
    LifecycleError, PartyId, RequestQuery, RequestStore, SnapshotStream, StoreError,
};
use std::sync::Arc;

/// Factory for the open-pool, mine and as-claimant views.
#[derive(Clone)]
pub struct RequestViews {
    store: Arc<dyn RequestStore>,
}

impl RequestViews {
    /// Create views over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    /// Pending requests `viewer` could claim, soonest first.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Transient`] if the subscription cannot be
    /// established.
    pub async fn open_pool(&self, viewer: &PartyId) -> Result<SnapshotStream, LifecycleError> {
        self.open(RequestQuery::OpenPool {
            viewer: viewer.clone(),
        })
        .await
    }

    /// Requests posted by `viewer`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Transient`] if the subscription cannot be
    /// established.
    pub async fn mine(&self, viewer: &PartyId) -> Result<SnapshotStream, LifecycleError> {
        self.open(RequestQuery::RequestedBy(viewer.clone())).await
    }

    /// Requests claimed by `viewer`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Transient`] if the subscription cannot be
    /// established.
    pub async fn as_claimant(&self, viewer: &PartyId) -> Result<SnapshotStream, LifecycleError> {
        self.open(RequestQuery::ClaimedBy(viewer.clone())).await
    }

    async fn open(&self, query: RequestQuery) -> Result<SnapshotStream, LifecycleError> {
        tracing::debug!(view = query.name(), "Opening view");
        let view = query.name();
        self.store
            .subscribe(query)
            .await
            .map_err(|err| view_error(err, view))
    }
}

/// Translate a failed subscription into the caller-facing taxonomy.
///
/// Stores skip undecodable records when building snapshots, so `Corrupted`
/// here means the store could not serve the view at all.
fn view_error(err: StoreError, view: &'static str) -> LifecycleError {
    match err {
        StoreError::Transient(reason) => LifecycleError::Transient(reason),
        StoreError::Invalid(reason) => LifecycleError::InvalidArgument(reason),
        StoreError::NotFound(id) => LifecycleError::NotFound(id),
        other => {
            tracing::error!(view, error = %other, "View could not be opened");
            LifecycleError::Transient(other.to_string())
        }
    }
}

impl std::fmt::Debug for RequestViews {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestViews").finish_non_exhaustive()
    }
}
