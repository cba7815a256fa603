//! Store decorator that retries transient read and subscription failures.
//!
//! `get` and `subscribe` are retried with bounded exponential backoff (never
//! more than [`MAX_STORE_ATTEMPTS`](crate::retry::MAX_STORE_ATTEMPTS) attempts).
//! A live subscription that fails mid-stream with a transient error is
//! re-opened under the same bound; duplicate snapshots caused by the re-open
//! are suppressed. `create` and `transactional_update` pass straight through:
//! their conflicts and failures belong to the caller.

use futures::StreamExt;
use reservation_core::store::{Mutator, Precondition, SnapshotStream, StoreFuture};
use reservation_core::{Request, RequestId, RequestQuery, RequestStore, StoreError};
use std::sync::Arc;

use crate::retry::{RetryPolicy, retry_with_predicate};

/// Wraps a [`RequestStore`] with retries on [`StoreError::Transient`].
#[derive(Clone)]
pub struct RetryingRequestStore {
    inner: Arc<dyn RequestStore>,
    policy: RetryPolicy,
}

impl RetryingRequestStore {
    /// Wrap `inner` using `policy`.
    #[must_use]
    pub fn new(inner: Arc<dyn RequestStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl std::fmt::Debug for RetryingRequestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingRequestStore")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RequestStore for RetryingRequestStore {
    fn create(&self, request: Request) -> StoreFuture<'_, RequestId> {
        self.inner.create(request)
    }

    fn get(&self, id: RequestId) -> StoreFuture<'_, Request> {
        Box::pin(async move {
            retry_with_predicate(
                &self.policy,
                "get",
                || self.inner.get(id),
                StoreError::is_transient,
            )
            .await
        })
    }

    fn transactional_update(
        &self,
        id: RequestId,
        precondition: Precondition,
        mutator: Mutator,
    ) -> StoreFuture<'_, Request> {
        self.inner.transactional_update(id, precondition, mutator)
    }

    fn subscribe(&self, query: RequestQuery) -> StoreFuture<'_, SnapshotStream> {
        Box::pin(async move {
            let inner = Arc::clone(&self.inner);
            let policy = self.policy.clone();
            let first = retry_with_predicate(
                &policy,
                "subscribe",
                || inner.subscribe(query.clone()),
                StoreError::is_transient,
            )
            .await?;

            let stream = async_stream::stream! {
                let mut current = first;
                let mut last: Option<Vec<Request>> = None;
                let mut failures: u32 = 0;

                'outer: loop {
                    match current.next().await {
                        Some(Ok(snapshot)) => {
                            failures = 0;
                            if last.as_ref() != Some(&snapshot) {
                                last = Some(snapshot.clone());
                                yield Ok::<_, StoreError>(snapshot);
                            }
                        }
                        Some(Err(err)) if err.is_transient() => {
                            tracing::warn!(
                                query = query.name(),
                                error = %err,
                                "Subscription interrupted, reopening"
                            );
                            loop {
                                failures += 1;
                                if !policy.should_retry(failures) {
                                    tracing::error!(
                                        query = query.name(),
                                        failures,
                                        "Subscription could not be reopened"
                                    );
                                    yield Err(err);
                                    break 'outer;
                                }
                                tokio::time::sleep(policy.delay_for_retry(failures - 1)).await;
                                crate::metrics::store::record_retry("subscribe");
                                match inner.subscribe(query.clone()).await {
                                    Ok(reopened) => {
                                        current = reopened;
                                        continue 'outer;
                                    }
                                    Err(retry_err) if retry_err.is_transient() => {}
                                    Err(fatal) => {
                                        yield Err(fatal);
                                        break 'outer;
                                    }
                                }
                            }
                        }
                        Some(Err(err)) => {
                            yield Err(err);
                            break;
                        }
                        None => break,
                    }
                }
            };

            Ok(stream.boxed())
        })
    }
}
