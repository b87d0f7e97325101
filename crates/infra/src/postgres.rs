//! Blocking bridge onto the async Postgres driver.
//!
//! The engine and its ports are synchronous. `PgContext` owns a connection pool
//! plus a dedicated tokio runtime and drives every query with `block_on`, so the
//! Postgres adapters can sit behind the same sync traits as the in-memory ones.
//!
//! Do not call into a `PgContext` from inside another async runtime; `block_on`
//! panics when nested.

use std::future::Future;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

const SCHEMA: &str = include_str!("../migrations/0001_stockflow.sql");

#[derive(Debug, Error)]
pub enum PgContextError {
    #[error("failed to start postgres runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("postgres error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Shared pool + runtime handle for the Postgres adapters.
#[derive(Debug, Clone)]
pub struct PgContext {
    pool: PgPool,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl PgContext {
    /// Connect to `database_url` with at most `max_connections` pooled connections.
    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, PgContextError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("stockflow-pg")
            .enable_all()
            .build()?;

        let pool = runtime.block_on(
            PgPoolOptions::new()
                .max_connections(max_connections)
                .connect(database_url),
        )?;

        info!(max_connections, "postgres pool connected");

        Ok(Self {
            pool,
            runtime: Arc::new(runtime),
        })
    }

    /// Create the `events` and `document_numbers` tables if they are missing.
    pub fn ensure_schema(&self) -> Result<(), PgContextError> {
        self.block_on(sqlx::raw_sql(SCHEMA).execute(&self.pool))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}
