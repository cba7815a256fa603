//! `PostgreSQL` request store for the reservation crates.
//!
//! [`PostgresRequestStore`] implements the `RequestStore` trait from
//! `reservation-core` on top of sqlx:
//!
//! - Conditional updates run inside a transaction holding a
//!   `SELECT ... FOR UPDATE` row lock, so concurrent claims on one request
//!   serialize while claims on different requests proceed in parallel
//! - Every commit issues `pg_notify`; subscriptions `LISTEN` and re-query
//! - Connection failures surface as `StoreError::Transient`
//!
//! # Example
//!
//! ```no_run
//! use reservation_postgres::{PostgresConfig, PostgresRequestStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PostgresConfig::from_env();
//! let store = PostgresRequestStore::connect(&config).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod store;

pub use config::PostgresConfig;
pub use store::{CHANGE_CHANNEL, PostgresRequestStore};
