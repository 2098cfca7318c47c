//! Bounded pool of async Postgres connections.
//!
//! Checkout is scoped through RAII: the [`PooledConnection`] object returns
//! its connection on drop, and [`ConnectionPool::discard`] drops a connection
//! that raised a connection-level error instead of recycling it, so one bad
//! socket cannot poison the pool. Checkout blocks, bounded by the configured
//! wait timeout, when the pool is exhausted.

use std::time::Duration;

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PoolConfig;

/// A checked-out connection; returns to the pool on drop.
pub type PooledConnection = Object<AsyncPgConnection>;

/// Pool construction and checkout failures.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configured bounds are inconsistent.
    #[error("invalid pool bounds: min_connections {min} > max_connections {max}")]
    Bounds {
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The pool could not be built at all.
    #[error("failed to build connection pool: {0}")]
    Build(String),

    /// No connection became available within the wait timeout, or
    /// establishing a fresh one failed.
    #[error("connection checkout failed: {0}")]
    Checkout(String),
}

/// Point-in-time pool gauges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Hard upper bound on connections.
    pub max_size: usize,
    /// Connections currently open.
    pub size: usize,
    /// Open connections not checked out.
    pub available: usize,
}

/// Shared, bounded pool over [`AsyncPgConnection`]s.
///
/// This is the only concurrency-safe shared resource in the pipeline; clones
/// share the same underlying pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Pool<AsyncPgConnection>,
    min_connections: usize,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The underlying `Pool` does not implement `Debug` because
        // `AsyncPgConnection` does not; expose only the scalar bounds.
        f.debug_struct("ConnectionPool")
            .field("min_connections", &self.min_connections)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Builds a pool for `database_url` with the configured bounds.
    pub fn connect(database_url: &str, cfg: &PoolConfig) -> Result<Self, PoolError> {
        if cfg.min_connections > cfg.max_connections {
            return Err(PoolError::Bounds {
                min: cfg.min_connections,
                max: cfg.max_connections,
            });
        }

        info!(
            min = cfg.min_connections,
            max = cfg.max_connections,
            "initializing connection pool"
        );
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let inner = Pool::builder(manager)
            .max_size(cfg.max_connections)
            .wait_timeout(Some(Duration::from_secs(cfg.connection_timeout_seconds)))
            .create_timeout(Some(Duration::from_secs(cfg.connection_timeout_seconds)))
            .recycle_timeout(Some(Duration::from_secs(cfg.idle_timeout_seconds)))
            .runtime(deadpool::Runtime::Tokio1)
            .build()
            .map_err(|e| PoolError::Build(e.to_string()))?;

        Ok(Self {
            inner,
            min_connections: cfg.min_connections,
        })
    }

    /// Checks a connection out, blocking (bounded) when exhausted.
    pub async fn checkout(&self) -> Result<PooledConnection, PoolError> {
        let conn = self
            .inner
            .get()
            .await
            .map_err(|e| PoolError::Checkout(e.to_string()))?;
        debug!(status = ?self.status(), "connection checked out");
        Ok(conn)
    }

    /// Drops a poisoned connection instead of returning it to the pool.
    pub fn discard(conn: PooledConnection) {
        debug!("discarding connection after connection-level error");
        drop(PooledConnection::take(conn));
    }

    /// Pre-establishes `min_connections` connections.
    pub async fn warm_up(&self) -> Result<(), PoolError> {
        let mut held = Vec::with_capacity(self.min_connections);
        for _ in 0..self.min_connections {
            held.push(self.checkout().await?);
        }
        drop(held);
        Ok(())
    }

    /// Runs `SELECT 1` on a pooled connection.
    pub async fn test_connection(&self) -> bool {
        use diesel_async::RunQueryDsl;
        match self.checkout().await {
            Ok(mut conn) => diesel::sql_query("SELECT 1")
                .execute(&mut conn)
                .await
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Current pool gauges.
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_bounds_are_a_configuration_error() {
        let cfg = PoolConfig {
            min_connections: 8,
            max_connections: 2,
            ..PoolConfig::default()
        };
        let err = ConnectionPool::connect("postgres://u@localhost/db", &cfg).unwrap_err();
        assert!(matches!(err, PoolError::Bounds { min: 8, max: 2 }));
    }

    #[test]
    fn valid_bounds_build_without_connecting() {
        // Pool construction is lazy; no server is contacted here.
        let pool =
            ConnectionPool::connect("postgres://u@localhost/db", &PoolConfig::default()).unwrap();
        let status = pool.status();
        assert_eq!(status.max_size, 10);
        assert_eq!(status.size, 0);
    }
}
