//! `PostgreSQL` durable store for the flash-sale core.
//!
//! Implements [`OrderRepository`](flashsale_core::repository::OrderRepository)
//! and [`ProductCatalog`](flashsale_core::repository::ProductCatalog) over one
//! connection pool:
//!
//! - Orders with a partial unique index on `(product_id, user_id)` over live
//!   (not cancelled) orders, the last line of defence against duplicate purchases
//! - The product catalogue read behind the cache protection layer
//! - Stock baselines used to repair counters after an invariant violation
//!
//! # Example
//!
//! ```no_run
//! use flashsale_postgres::PostgresStore;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgres://localhost/flashsale", 20, 2, Duration::from_secs(5)).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

mod catalog;
mod orders;

use flashsale_core::error::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Orders and products in `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    /// `PostgreSQL` connection pool.
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if no connection can be established.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to PostgreSQL: {e}")))?;

        tracing::info!(max_connections, min_connections, "PostgreSQL pool ready");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip health check.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the database does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("ping", e))?;
        Ok(())
    }
}

/// Map a driver error onto the adapter taxonomy.
fn store_error(operation: &str, error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("{operation}: {}", db.message()))
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Serialization(format!("{operation}: {error}"))
        }
        other => {
            metrics::counter!("flashsale_durable_errors_total", "operation" => operation.to_string())
                .increment(1);
            StoreError::Unavailable(format!("{operation}: {other}"))
        }
    }
}
