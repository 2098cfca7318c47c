//! Retrieval-side configuration: object-store access and ingest knobs.
//!
//! Deserialized from the `[object_store]` / `[ingest]` sections of the
//! pipeline TOML after environment substitution. Constructed once and passed
//! by reference; nothing here is globally mutable.

use secrecy::SecretString;
use serde::Deserialize;

use crate::models::data_type::DataType;

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

/// Connection settings for the object-store archive.
#[derive(Debug, Deserialize)]
pub struct ObjectStoreConfig {
    /// S3-compatible endpoint URL.
    pub endpoint: String,
    /// Region to sign requests for.
    pub region: String,
    /// Bucket holding the flat files.
    pub bucket: String,
    /// Access key id, resolved from the environment by substitution.
    pub access_key: SecretString,
    /// Secret access key, resolved from the environment by substitution.
    pub secret_key: SecretString,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: u64,
    /// Path templates per data type.
    pub paths: PathTemplates,
}

/// Object-key templates, parameterized by `{year}`, `{month}`, `{day}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PathTemplates {
    pub day_aggs: String,
    pub minute_aggs: String,
    pub trades: String,
    pub quotes: String,
}

impl PathTemplates {
    /// The template for a given data type.
    pub fn template(&self, data_type: DataType) -> &str {
        match data_type {
            DataType::DayAggs => &self.day_aggs,
            DataType::MinuteAggs => &self.minute_aggs,
            DataType::Trades => &self.trades,
            DataType::Quotes => &self.quotes,
        }
    }
}

/// Which calendar a retrieval range iterates over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCalendar {
    /// Exchange-traded instruments: Monday through Friday.
    #[default]
    Weekdays,
    /// Continuous markets: every calendar day.
    AllDays,
}

fn default_sanity_ceiling() -> f64 {
    10_000.0
}

fn default_source_label() -> String {
    "polygon_s3".to_string()
}

/// Knobs for retrieval and row triage.
#[derive(Debug, Deserialize)]
pub struct IngestConfig {
    /// Prices above this (in quote currency units) are rejected as nonsense.
    #[serde(default = "default_sanity_ceiling")]
    pub price_sanity_ceiling: f64,
    /// Retries per date after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Data-source label stamped on accepted rows.
    #[serde(default = "default_source_label")]
    pub source_label: String,
    /// Calendar used for range iteration.
    #[serde(default)]
    pub calendar: MarketCalendar,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            price_sanity_ceiling: default_sanity_ceiling(),
            max_retries: default_max_retries(),
            source_label: default_source_label(),
            calendar: MarketCalendar::default(),
        }
    }
}
