//! Bulk loading of validated bars with batch-to-row fallback.
//!
//! Each batch is first attempted as one multi-row statement; when that
//! fails, every row in the batch is retried individually so a single bad
//! row never sinks its batch-mates. The report always satisfies
//! `successful + failed == total_rows`.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use market_data_retriever::models::bar::Bar;
use market_data_retriever::models::timeframe::{TimeFrame, TimeFrameUnit};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::executor::ExecError;
use crate::models::NewBarRow;
use crate::sink::BarSink;

/// Smallest inter-batch throttle sleep.
const MIN_THROTTLE: Duration = Duration::from_millis(10);

/// Behavior when an insert's natural key already exists in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Upsert: overwrite measurement columns, refresh the ingestion
    /// timestamp.
    Update,
    /// Keep the existing row silently.
    Ignore,
    /// No conflict clause; duplicates surface as integrity failures.
    Error,
}

impl ConflictPolicy {
    /// Short label for logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Update => "update",
            ConflictPolicy::Ignore => "ignore",
            ConflictPolicy::Error => "error",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(ConflictPolicy::Update),
            // "nothing" is the legacy spelling some operators still use.
            "ignore" | "nothing" => Ok(ConflictPolicy::Ignore),
            "error" => Ok(ConflictPolicy::Error),
            other => Err(format!(
                "unknown conflict policy '{other}', expected update, ignore or error"
            )),
        }
    }
}

/// Hard failure of a whole load invocation.
///
/// Per-row problems never surface here; they are isolated into the report.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Caller or environment defect, e.g. a missing natural-key constraint.
    #[error("configuration error: {0}")]
    Config(String),

    /// A statement outside per-row isolation kept failing.
    #[error(transparent)]
    Db(#[from] ExecError),
}

/// Parameters of one load invocation.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Timeframe label applied to every row.
    pub timeframe: TimeFrame,
    /// Data-source label applied to every row.
    pub data_source: String,
    /// Conflict behavior for duplicate natural keys.
    pub conflict: ConflictPolicy,
    /// Rows per batch; auto-selected by timeframe when `None`.
    pub batch_size: Option<usize>,
    /// Optional throughput cap in rows per second.
    pub throttle_rows_per_second: Option<f64>,
}

impl LoadOptions {
    /// Options with defaults for everything but the labels.
    pub fn new(timeframe: TimeFrame, data_source: impl Into<String>, conflict: ConflictPolicy) -> Self {
        Self {
            timeframe,
            data_source: data_source.into(),
            conflict,
            batch_size: None,
            throttle_rows_per_second: None,
        }
    }
}

/// One row that could not be persisted.
#[derive(Debug, Clone)]
pub struct RowFailure {
    /// Position of the row in the input table.
    pub index: usize,
    /// Natural key: instrument.
    pub ticker: String,
    /// Natural key: bar timestamp.
    pub timestamp: DateTime<Utc>,
    /// Natural key: timeframe label.
    pub timeframe: String,
    /// Natural key: data-source label.
    pub data_source: String,
    /// Rendered error text.
    pub error: String,
    /// Error category (integrity_error / retry_exhausted).
    pub category: &'static str,
}

/// Immutable result of one load invocation.
#[derive(Debug)]
pub struct LoadReport {
    /// Rows presented to the loader.
    pub total_rows: usize,
    /// Rows persisted (including conflict no-ops under `ignore`).
    pub successful: usize,
    /// Rows that failed after isolation.
    pub failed: usize,
    /// One record per failed row, input order preserved.
    pub failed_details: Vec<RowFailure>,
    /// Wall-clock duration of the call.
    pub duration: Duration,
    /// Effective throughput over successful rows.
    pub rows_per_second: f64,
}

impl LoadReport {
    fn empty() -> Self {
        Self {
            total_rows: 0,
            successful: 0,
            failed: 0,
            failed_details: Vec::new(),
            duration: Duration::ZERO,
            rows_per_second: 0.0,
        }
    }
}

struct BatchOutcome {
    successful: usize,
    failures: Vec<RowFailure>,
}

/// Batch size by timeframe: coarser frames mean fewer rows per ticker, so
/// bigger statements stay cheap to retry.
pub fn estimate_batch_size(timeframe: &TimeFrame) -> usize {
    match timeframe.unit {
        TimeFrameUnit::Day | TimeFrameUnit::Week | TimeFrameUnit::Month => 500,
        TimeFrameUnit::Hour if timeframe.amount >= 4 => 300,
        TimeFrameUnit::Hour => 200,
        TimeFrameUnit::Minute => 100,
    }
}

/// Sleep needed between batches to respect a rows-per-second cap.
pub fn throttle_delay(rows_per_second: f64, batch_len: usize) -> Duration {
    if rows_per_second <= 0.0 {
        return MIN_THROTTLE;
    }
    let target = Duration::from_secs_f64(batch_len as f64 / rows_per_second);
    target.max(MIN_THROTTLE)
}

/// Turns validated tables into ordered batches and drives the sink.
pub struct BulkLoader<K> {
    sink: K,
}

impl<K: BarSink> BulkLoader<K> {
    /// Loader writing through `sink`.
    pub fn new(sink: K) -> Self {
        Self { sink }
    }

    /// The underlying sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Loads `bars` and reports exactly which rows succeeded or failed.
    pub async fn load(&self, bars: &[Bar], opts: &LoadOptions) -> Result<LoadReport, LoadError> {
        let started = Instant::now();
        if bars.is_empty() {
            return Ok(LoadReport::empty());
        }

        // The update/ignore policies silently do the wrong thing without a
        // natural-key constraint, so its absence fails the invocation.
        if opts.conflict != ConflictPolicy::Error {
            self.sink.ensure_natural_key_constraint().await?;
        }

        let timeframe_label = opts.timeframe.to_string();
        let ingested_at = Utc::now();
        let rows: Vec<NewBarRow> = bars
            .iter()
            .map(|bar| NewBarRow::from_bar(bar, &timeframe_label, &opts.data_source, ingested_at))
            .collect();

        let total = rows.len();
        let batch_size = opts
            .batch_size
            .unwrap_or_else(|| estimate_batch_size(&opts.timeframe))
            .max(1);

        info!(
            total_rows = total,
            batch_size,
            policy = %opts.conflict,
            "starting bulk load"
        );

        let mut successful = 0usize;
        let mut failed_details: Vec<RowFailure> = Vec::new();

        for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;
            if batch_index > 0 {
                if let Some(rate) = opts.throttle_rows_per_second {
                    tokio::time::sleep(throttle_delay(rate, batch.len())).await;
                }
            }

            let outcome = self.load_batch(batch, offset, opts.conflict).await;
            successful += outcome.successful;
            failed_details.extend(outcome.failures);

            debug!(
                progress_rows = (offset + batch.len()).min(total),
                total_rows = total,
                "batch complete"
            );
        }

        let duration = started.elapsed();
        let rows_per_second = if duration.as_secs_f64() > 0.0 {
            successful as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        info!(
            successful,
            failed = failed_details.len(),
            duration_ms = duration.as_millis() as u64,
            "bulk load complete"
        );
        if let Some(first) = failed_details.first() {
            warn!(
                failed = failed_details.len(),
                first_error = %first.error,
                "some rows failed to insert"
            );
        }

        Ok(LoadReport {
            total_rows: total,
            successful,
            failed: failed_details.len(),
            failed_details,
            duration,
            rows_per_second,
        })
    }

    async fn load_batch(
        &self,
        batch: &[NewBarRow],
        offset: usize,
        policy: ConflictPolicy,
    ) -> BatchOutcome {
        if batch.len() > 1 {
            match self.sink.insert_batch(batch, policy).await {
                Ok(_) => {
                    return BatchOutcome {
                        successful: batch.len(),
                        failures: Vec::new(),
                    };
                }
                Err(err) => {
                    warn!(
                        rows = batch.len(),
                        error = %err,
                        "batch insert failed, falling back to row-by-row"
                    );
                }
            }
        }

        let mut successful = 0usize;
        let mut failures = Vec::new();
        for (i, row) in batch.iter().enumerate() {
            match self.sink.insert_row(row, policy).await {
                Ok(_) => successful += 1,
                Err(err) => failures.push(RowFailure {
                    index: offset + i,
                    ticker: row.ticker.clone(),
                    timestamp: row.timestamp,
                    timeframe: row.timeframe.clone(),
                    data_source: row.data_source.clone(),
                    error: err.to_string(),
                    category: err.category(),
                }),
            }
        }
        BatchOutcome {
            successful,
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_sizes_scale_with_timeframe() {
        assert_eq!(estimate_batch_size(&TimeFrame::day()), 500);
        assert_eq!(estimate_batch_size(&TimeFrame::minute()), 100);
        let four_hour = TimeFrame::new(4, TimeFrameUnit::Hour).unwrap();
        assert_eq!(estimate_batch_size(&four_hour), 300);
        let hourly = TimeFrame::new(1, TimeFrameUnit::Hour).unwrap();
        assert_eq!(estimate_batch_size(&hourly), 200);
    }

    #[test]
    fn throttle_respects_rate_and_floor() {
        assert_eq!(throttle_delay(100.0, 50), Duration::from_millis(500));
        // Faster than the floor: clamp to the 10ms minimum.
        assert_eq!(throttle_delay(1_000_000.0, 5), MIN_THROTTLE);
        // Nonsensical rates degrade to the floor instead of dividing by zero.
        assert_eq!(throttle_delay(0.0, 50), MIN_THROTTLE);
    }

    #[test]
    fn conflict_policy_parses_operator_spellings() {
        assert_eq!("update".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Update);
        assert_eq!("ignore".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Ignore);
        assert_eq!("nothing".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Ignore);
        assert_eq!("error".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Error);
        assert!("upsert".parse::<ConflictPolicy>().is_err());
    }
}
