//! Embedded schema migrations.
//!
//! Bundled with the crate and applied through the blocking wrapper around the
//! async connection, so no native client library is needed at build time.

use anyhow::anyhow;
use diesel::Connection;
use diesel_async::AsyncPgConnection;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::info;

/// Embedded Diesel migrations bundled with this crate.
///
/// These are applied by [`run`] to bring the `trading` schema up to date.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Runs pending migrations against the database at the given URL.
///
/// Migration execution is blocking, so it is pushed onto the blocking
/// thread pool.
pub async fn run(database_url: &str) -> anyhow::Result<()> {
    let url = database_url.to_string();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow!(e))?;
        info!(applied = applied.len(), "migrations up to date");
        Ok(())
    })
    .await??;

    Ok(())
}
