//! [`RequestStore`] over `PostgreSQL`.

use futures::StreamExt;
use reservation_core::store::{Mutator, Precondition, SnapshotStream, StoreFuture, validate_record};
use reservation_core::{Request, RequestId, RequestQuery, RequestStatus, RequestStore, StoreError};
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::types::{Json, Uuid};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

use crate::config::PostgresConfig;

/// `LISTEN`/`NOTIFY` channel carrying the id of every committed change.
pub const CHANGE_CHANNEL: &str = "reservation_requests_changed";

/// `PostgreSQL`-backed request store.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct PostgresRequestStore {
    pool: PgPool,
}

impl PostgresRequestStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool using `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] if the database cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(store_error)?;
        tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a driver error onto the store taxonomy.
///
/// Anything that is not a decoding problem or a constraint violation is
/// treated as transient: the caller cannot tell a dropped connection from a
/// failed commit, so the outcome is unknown.
fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => StoreError::Corrupted(err.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
            StoreError::Invalid(db.message().to_string())
        }
        _ => StoreError::Transient(err.to_string()),
    }
}

fn revision_param(request: &Request) -> Result<i64, StoreError> {
    i64::try_from(request.revision)
        .map_err(|_| StoreError::Invalid(format!("revision overflow on request {}", request.id)))
}

/// Decode a `status, data` row, rejecting anything that is not a valid record.
fn decode(row: &PgRow) -> Result<Request, StoreError> {
    let status: String = row.try_get("status").map_err(store_error)?;
    let status = RequestStatus::parse(&status)?;
    let data: serde_json::Value = row.try_get("data").map_err(store_error)?;
    let request: Request = serde_json::from_value(data)
        .map_err(|e| StoreError::Corrupted(format!("undecodable request: {e}")))?;
    if request.status != status {
        return Err(StoreError::Corrupted(format!(
            "request {} has status column {status} but document status {}",
            request.id, request.status
        )));
    }
    request.check_invariants()?;
    Ok(request)
}

async fn notify(tx: &mut Transaction<'_, Postgres>, id: RequestId) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANGE_CHANNEL)
        .bind(id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(store_error)?;
    Ok(())
}

/// Load the current result set of `query`.
///
/// SQL narrows the rows; the exact predicate and ordering come from
/// [`RequestQuery::project`] so every store orders identically. Rows that do
/// not decode are logged and left out; they surface again on the next
/// mutation attempt.
async fn fetch(pool: &PgPool, query: &RequestQuery) -> Result<Vec<Request>, StoreError> {
    let rows = match query {
        RequestQuery::OpenPool { viewer } => {
            sqlx::query(
                "SELECT id, status, data FROM reservation_requests \
                 WHERE status = 'pending' AND requester_id <> $1",
            )
            .bind(viewer.as_str())
            .fetch_all(pool)
            .await
        }
        RequestQuery::RequestedBy(party) => {
            sqlx::query(
                "SELECT id, status, data FROM reservation_requests WHERE requester_id = $1",
            )
            .bind(party.as_str())
            .fetch_all(pool)
            .await
        }
        RequestQuery::ClaimedBy(party) => {
            sqlx::query(
                "SELECT id, status, data FROM reservation_requests WHERE claimant_id = $1",
            )
            .bind(party.as_str())
            .fetch_all(pool)
            .await
        }
    }
    .map_err(store_error)?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        match decode(row) {
            Ok(request) => records.push(request),
            Err(err) => {
                let id: Option<Uuid> = row.try_get("id").ok();
                tracing::error!(
                    request_id = ?id,
                    query = query.name(),
                    error = %err,
                    "Skipping unreadable request"
                );
                metrics::counter!(
                    "reservation_postgres_unreadable_rows_total",
                    "query" => query.name()
                )
                .increment(1);
            }
        }
    }
    Ok(query.project(&records))
}

impl RequestStore for PostgresRequestStore {
    fn create(&self, request: Request) -> StoreFuture<'_, RequestId> {
        Box::pin(async move {
            validate_record(&request)?;
            let id = request.id;

            let mut tx = self.pool.begin().await.map_err(store_error)?;
            sqlx::query(
                r"
                INSERT INTO reservation_requests (
                    id, requester_id, claimant_id, status, scheduled_at,
                    created_at, updated_at, revision, data
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(*id.as_uuid())
            .bind(request.requester_id.as_str())
            .bind(request.claimant_id.as_ref().map(|c| c.as_str()))
            .bind(request.status.as_str())
            .bind(request.scheduled_at)
            .bind(request.created_at)
            .bind(request.updated_at)
            .bind(revision_param(&request)?)
            .bind(Json(&request))
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
            notify(&mut tx, id).await?;
            tx.commit().await.map_err(store_error)?;

            tracing::debug!(request_id = %id, "Request stored");
            Ok(id)
        })
    }

    fn get(&self, id: RequestId) -> StoreFuture<'_, Request> {
        Box::pin(async move {
            let row = sqlx::query("SELECT status, data FROM reservation_requests WHERE id = $1")
                .bind(*id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?
                .ok_or(StoreError::NotFound(id))?;
            decode(&row)
        })
    }

    fn transactional_update(
        &self,
        id: RequestId,
        precondition: Precondition,
        mutator: Mutator,
    ) -> StoreFuture<'_, Request> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(store_error)?;

            // Row lock held until commit or rollback
            let row = sqlx::query(
                "SELECT status, data FROM reservation_requests WHERE id = $1 FOR UPDATE",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error)?;

            let Some(row) = row else {
                let _ = tx.rollback().await;
                return Err(StoreError::NotFound(id));
            };
            let current = match decode(&row) {
                Ok(current) => current,
                Err(err) => {
                    let _ = tx.rollback().await;
                    return Err(err);
                }
            };

            if !precondition(&current) {
                let _ = tx.rollback().await;
                return Err(StoreError::PreconditionFailed {
                    current: Box::new(current),
                });
            }

            let next = mutator(&current);
            if next.id != current.id {
                let _ = tx.rollback().await;
                return Err(StoreError::Invalid(format!(
                    "mutator changed the id of request {id}"
                )));
            }

            let result = sqlx::query(
                r"
                UPDATE reservation_requests
                SET claimant_id = $2,
                    status = $3,
                    scheduled_at = $4,
                    updated_at = $5,
                    revision = $6,
                    data = $7
                WHERE id = $1 AND revision = $8
                ",
            )
            .bind(*id.as_uuid())
            .bind(next.claimant_id.as_ref().map(|c| c.as_str()))
            .bind(next.status.as_str())
            .bind(next.scheduled_at)
            .bind(next.updated_at)
            .bind(revision_param(&next)?)
            .bind(Json(&next))
            .bind(revision_param(&current)?)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

            if result.rows_affected() != 1 {
                let _ = tx.rollback().await;
                return Err(StoreError::Transient(format!(
                    "request {id} changed while locked"
                )));
            }

            notify(&mut tx, id).await?;
            tx.commit().await.map_err(store_error)?;

            tracing::debug!(
                request_id = %id,
                from = %current.status,
                to = %next.status,
                revision = next.revision,
                "Request updated"
            );
            Ok(next)
        })
    }

    fn subscribe(&self, query: RequestQuery) -> StoreFuture<'_, SnapshotStream> {
        Box::pin(async move {
            let pool = self.pool.clone();

            // Listen before the first query so no commit falls between the two
            let mut listener = PgListener::connect_with(&pool).await.map_err(store_error)?;
            listener.listen(CHANGE_CHANNEL).await.map_err(store_error)?;
            let initial = fetch(&pool, &query).await?;

            let stream = async_stream::stream! {
                let mut last = initial.clone();
                yield Ok::<_, StoreError>(initial);

                loop {
                    match listener.try_recv().await {
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            // Notifications may have been missed; the re-query below covers them
                            tracing::warn!(
                                query = query.name(),
                                "Listener connection lost, reconnecting"
                            );
                            metrics::counter!("reservation_postgres_listener_reconnects_total")
                                .increment(1);
                        }
                        Err(err) => {
                            yield Err(store_error(err));
                            break;
                        }
                    }

                    match fetch(&pool, &query).await {
                        Ok(snapshot) => {
                            if snapshot != last {
                                last.clone_from(&snapshot);
                                yield Ok(snapshot);
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            break;
                        }
                    }
                }
            };

            Ok(stream.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_transient() {
        assert!(store_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(store_error(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn test_decode_errors_are_corruption() {
        let err = store_error(sqlx::Error::ColumnNotFound("data".to_string()));
        assert!(matches!(err, StoreError::Corrupted(_)));
    }
}
