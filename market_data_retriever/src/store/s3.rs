//! S3-backed [`ObjectStore`] implementation.
//!
//! The archive speaks the S3 protocol on a custom endpoint, so this is a thin
//! wrapper over the AWS SDK. The SDK's own retry machinery is disabled: all
//! backoff decisions belong to the retriever's retry loop, which knows the
//! difference between a rate limit and a generic 5xx.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use secrecy::ExposeSecret;

use crate::config::ObjectStoreConfig;
use crate::store::{ObjectStore, StoreError};

const THROTTLE_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "TooManyRequests",
    "RequestLimitExceeded",
];

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Builds a client for the configured endpoint and credentials.
    pub fn new(cfg: &ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            cfg.access_key.expose_secret(),
            cfg.secret_key.expose_secret(),
            None,
            None,
            "pipeline-config",
        );
        let timeouts = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_seconds))
            .read_timeout(Duration::from_secs(cfg.read_timeout_seconds))
            .build();
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .endpoint_url(cfg.endpoint.clone())
            .credentials_provider(credentials)
            .timeout_config(timeouts)
            .retry_config(RetryConfig::disabled())
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
        }
    }
}

fn classify_sdk<E, R>(err: &SdkError<E, R>) -> StoreError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    match err {
        SdkError::ServiceError(_) => {
            let code = err.code().unwrap_or("unknown");
            let message = err.message().unwrap_or("no message").to_string();
            if THROTTLE_CODES.contains(&code) {
                StoreError::RateLimited(format!("{code}: {message}"))
            } else {
                StoreError::Transient(format!("{code}: {message}"))
            }
        }
        // Construction/dispatch/timeout/response failures never prove the
        // object is absent, so they all stay retryable.
        other => StoreError::Transient(format!("{other:?}")),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head(&self, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => match &err {
                SdkError::ServiceError(ctx) if ctx.err().is_not_found() => Ok(false),
                _ => Err(classify_sdk(&err)),
            },
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let out = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => out,
            Err(err) => {
                return Err(match &err {
                    SdkError::ServiceError(ctx) if ctx.err().is_no_such_key() => {
                        StoreError::NotFound
                    }
                    _ => classify_sdk(&err),
                });
            }
        };

        out.body
            .collect()
            .await
            .map(|body| body.into_bytes().to_vec())
            .map_err(|e| StoreError::Transient(format!("body read failed: {e}")))
    }
}
