//! Object-store access behind a trait seam.
//!
//! [`ObjectStore`] is the raw byte-level interface (existence probe + fetch);
//! [`S3ObjectStore`](s3::S3ObjectStore) is the production implementation and
//! tests substitute in-memory fakes. [`ObjectStoreGateway`] layers path
//! templating and payload decompression on top, and is what the retriever
//! talks to.
//!
//! Control flow never rides on exceptions here: "not found" and throttling
//! arrive as data ([`StoreError`] variants) that the caller branches on.

pub mod path;
pub mod s3;

use std::io::Read;

use async_trait::async_trait;
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::debug;

use crate::config::PathTemplates;
use crate::models::data_type::DataType;

/// Outcome taxonomy for object-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist. Benign: no retry, no failure record.
    #[error("object not found")]
    NotFound,

    /// The store signalled throttling; retried on the slow schedule.
    #[error("rate limited by object store: {0}")]
    RateLimited(String),

    /// Any other retryable condition: 5xx, connectivity, truncated transfer.
    #[error("transient object store error: {0}")]
    Transient(String),
}

/// Minimal byte-level object store interface.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Metadata-only existence probe. Returns `Ok(false)` only for a
    /// definitive "not found"; any other failure is a [`StoreError`].
    async fn head(&self, key: &str) -> Result<bool, StoreError>;

    /// Fetches the raw (still compressed) object bytes. Fails with
    /// [`StoreError::NotFound`] if the object vanished since the probe.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Path templating + decompression over a raw [`ObjectStore`].
pub struct ObjectStoreGateway<S> {
    store: S,
    paths: PathTemplates,
}

impl<S: ObjectStore> ObjectStoreGateway<S> {
    pub fn new(store: S, paths: PathTemplates) -> Self {
        Self { store, paths }
    }

    /// Checks whether the archive has a file for this date and data type.
    pub async fn exists(
        &self,
        ticker: &str,
        date: NaiveDate,
        data_type: DataType,
    ) -> Result<bool, StoreError> {
        let key = path::object_key(self.paths.template(data_type), date);
        let present = self.store.head(&key).await?;
        debug!(ticker, %key, present, "existence probe");
        Ok(present)
    }

    /// Fetches and decompresses the day's flat file.
    ///
    /// Decompression failure is transient: the usual cause is a truncated
    /// transfer, and a re-fetch gets a fresh body.
    pub async fn fetch(
        &self,
        ticker: &str,
        date: NaiveDate,
        data_type: DataType,
    ) -> Result<Vec<u8>, StoreError> {
        let key = path::object_key(self.paths.template(data_type), date);
        let raw = self.store.get(&key).await?;
        debug!(ticker, %key, bytes = raw.len(), "fetched object");

        if !key.ends_with(".gz") {
            return Ok(raw);
        }
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|e| {
                StoreError::Transient(format!("decompression failed (truncated transfer?): {e}"))
            })?;
        Ok(decoded)
    }
}
