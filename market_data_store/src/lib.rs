//! Bulk-load layer for validated market bars.
//!
//! Validated tables from the retrieval layer are written into a
//! Postgres/TimescaleDB `trading` schema through a bounded connection pool.
//! The loader survives individual-row constraint violations without losing
//! the rest of the batch and reports exactly which rows succeeded, failed or
//! were duplicates.

#![deny(missing_docs)]

pub mod config;
pub mod db;
pub mod executor;
pub mod failures;
pub mod loader;
pub mod models;
pub mod quality;
pub mod queries;
pub mod schema;
pub mod sink;
