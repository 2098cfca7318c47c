//! Bulk-load scenarios driven through a scripted sink.
//!
//! These cover the report contract (conservation, per-row isolation, batch
//! fallback) without a live database; the diesel-backed sink is exercised by
//! the ignored round-trip tests in `pg_roundtrip.rs`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use market_data_retriever::models::bar::Bar;
use market_data_retriever::models::timeframe::TimeFrame;
use market_data_store::executor::ExecError;
use market_data_store::loader::{BulkLoader, ConflictPolicy, LoadError, LoadOptions};
use market_data_store::models::NewBarRow;
use market_data_store::sink::BarSink;
use rust_decimal::Decimal;

fn day(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

fn ts(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn bar(ticker: &str, date: NaiveDate) -> Bar {
    Bar {
        ticker: ticker.to_string(),
        timestamp: ts(date),
        open: Decimal::new(1800, 1),
        high: Decimal::new(1820, 1),
        low: Decimal::new(1795, 1),
        close: Decimal::new(1815, 1),
        volume: 1_000,
        transactions: Some(10),
        vwap: Some(Decimal::new(1810, 1)),
        ingestion_date: date,
        source: "polygon_s3".to_string(),
    }
}

fn unique_violation() -> ExecError {
    ExecError::Integrity {
        source: DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key value violates unique constraint".to_string()),
        ),
    }
}

fn not_null_violation() -> ExecError {
    ExecError::Integrity {
        source: DieselError::DatabaseError(
            DatabaseErrorKind::NotNullViolation,
            Box::new("null value in column \"close\"".to_string()),
        ),
    }
}

/// Scripted sink: rows with ticker "BAD" violate a not-null constraint, and
/// under the `error` policy any (ticker, timestamp) in `existing` conflicts.
#[derive(Default)]
struct FakeSink {
    existing: HashSet<(String, DateTime<Utc>)>,
    missing_constraint: bool,
    ensure_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    row_calls: AtomicUsize,
}

impl FakeSink {
    fn with_existing(keys: &[(&str, NaiveDate)]) -> Self {
        Self {
            existing: keys
                .iter()
                .map(|(t, d)| (t.to_string(), ts(*d)))
                .collect(),
            ..Self::default()
        }
    }

    fn row_fails(&self, row: &NewBarRow, policy: ConflictPolicy) -> Option<ExecError> {
        if row.ticker == "BAD" {
            return Some(not_null_violation());
        }
        if policy == ConflictPolicy::Error
            && self.existing.contains(&(row.ticker.clone(), row.timestamp))
        {
            return Some(unique_violation());
        }
        None
    }
}

#[async_trait]
impl BarSink for FakeSink {
    async fn ensure_natural_key_constraint(&self) -> Result<(), LoadError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.missing_constraint {
            return Err(LoadError::Config(
                "missing natural-key constraint".to_string(),
            ));
        }
        Ok(())
    }

    async fn insert_batch(
        &self,
        rows: &[NewBarRow],
        policy: ConflictPolicy,
    ) -> Result<usize, ExecError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        for row in rows {
            if let Some(err) = self.row_fails(row, policy) {
                return Err(err);
            }
        }
        Ok(rows.len())
    }

    async fn insert_row(&self, row: &NewBarRow, policy: ConflictPolicy) -> Result<usize, ExecError> {
        self.row_calls.fetch_add(1, Ordering::SeqCst);
        match self.row_fails(row, policy) {
            Some(err) => Err(err),
            None => Ok(1),
        }
    }
}

fn options(conflict: ConflictPolicy) -> LoadOptions {
    LoadOptions::new(TimeFrame::day(), "polygon_s3", conflict)
}

#[tokio::test]
async fn clean_batch_loads_in_one_statement() {
    let bars: Vec<Bar> = (2..7).map(|d| bar("AAPL", day(d))).collect();
    let sink = FakeSink::default();
    let loader = BulkLoader::new(sink);

    let report = loader
        .load(&bars, &options(ConflictPolicy::Update))
        .await
        .unwrap();

    assert_eq!(report.total_rows, 5);
    assert_eq!(report.successful, 5);
    assert_eq!(report.failed, 0);
    assert!(report.failed_details.is_empty());
    assert_eq!(loader.sink().batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(loader.sink().row_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bad_row_is_isolated_by_fallback() {
    // Batch of 5 where row 3 (index 2) violates a not-null constraint.
    let mut bars: Vec<Bar> = (2..7).map(|d| bar("AAPL", day(d))).collect();
    bars[2].ticker = "BAD".to_string();

    let loader = BulkLoader::new(FakeSink::default());
    let report = loader
        .load(&bars, &options(ConflictPolicy::Update))
        .await
        .unwrap();

    assert_eq!(report.total_rows, 5);
    assert_eq!(report.successful, 4);
    assert_eq!(report.failed, 1);
    let failure = &report.failed_details[0];
    assert_eq!(failure.index, 2);
    assert_eq!(failure.ticker, "BAD");
    assert_eq!(failure.timestamp, ts(day(4)));
    assert_eq!(failure.timeframe, "1d");
    assert_eq!(failure.data_source, "polygon_s3");
    assert_eq!(failure.category, "integrity_error");
    assert!(failure.error.contains("null value"));

    // One failed batch statement, then five per-row fallback inserts.
    assert_eq!(loader.sink().batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(loader.sink().row_calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn empty_input_returns_zero_report_without_touching_the_sink() {
    let loader = BulkLoader::new(FakeSink::default());
    let report = loader
        .load(&[], &options(ConflictPolicy::Update))
        .await
        .unwrap();

    assert_eq!(report.total_rows, 0);
    assert_eq!(report.successful, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.rows_per_second, 0.0);
    assert_eq!(loader.sink().ensure_calls.load(Ordering::SeqCst), 0);
    assert_eq!(loader.sink().batch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(loader.sink().row_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn conservation_holds_across_batches() {
    let mut bars: Vec<Bar> = (1..=25).map(|d| bar("AAPL", day(d))).collect();
    bars[3].ticker = "BAD".to_string();
    bars[17].ticker = "BAD".to_string();

    let mut opts = options(ConflictPolicy::Update);
    opts.batch_size = Some(10);
    let loader = BulkLoader::new(FakeSink::default());
    let report = loader.load(&bars, &opts).await.unwrap();

    assert_eq!(report.total_rows, 25);
    assert_eq!(report.successful + report.failed, report.total_rows);
    assert_eq!(report.failed, report.failed_details.len());
    assert_eq!(report.failed, 2);
    let failed_indexes: Vec<usize> = report.failed_details.iter().map(|f| f.index).collect();
    assert_eq!(failed_indexes, vec![3, 17]);
}

#[tokio::test]
async fn single_row_batches_skip_the_batch_statement() {
    let bars = vec![bar("AAPL", day(2))];
    let loader = BulkLoader::new(FakeSink::default());
    let report = loader
        .load(&bars, &options(ConflictPolicy::Update))
        .await
        .unwrap();

    assert_eq!(report.successful, 1);
    assert_eq!(loader.sink().batch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(loader.sink().row_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn error_policy_surfaces_each_overlapping_key() {
    // Three of five natural keys already exist.
    let bars: Vec<Bar> = (2..7).map(|d| bar("AAPL", day(d))).collect();
    let sink = FakeSink::with_existing(&[("AAPL", day(2)), ("AAPL", day(4)), ("AAPL", day(6))]);
    let loader = BulkLoader::new(sink);

    let report = loader
        .load(&bars, &options(ConflictPolicy::Error))
        .await
        .unwrap();

    assert_eq!(report.total_rows, 5);
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 3);
    assert!(report
        .failed_details
        .iter()
        .all(|f| f.category == "integrity_error"));
    // The error policy performs no constraint probe.
    assert_eq!(loader.sink().ensure_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn update_policy_treats_overlap_as_success() {
    let bars: Vec<Bar> = (2..7).map(|d| bar("AAPL", day(d))).collect();
    let sink = FakeSink::with_existing(&[("AAPL", day(2)), ("AAPL", day(4))]);
    let loader = BulkLoader::new(sink);

    let report = loader
        .load(&bars, &options(ConflictPolicy::Update))
        .await
        .unwrap();

    assert_eq!(report.successful, 5);
    assert_eq!(report.failed, 0);
    assert_eq!(loader.sink().ensure_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_constraint_fails_the_invocation_for_upsert_policies() {
    let sink = FakeSink {
        missing_constraint: true,
        ..FakeSink::default()
    };
    let loader = BulkLoader::new(sink);
    let bars = vec![bar("AAPL", day(2))];

    let err = loader
        .load(&bars, &options(ConflictPolicy::Ignore))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Config(_)));

    // The error policy does not need the constraint and proceeds.
    let report = loader
        .load(&bars, &options(ConflictPolicy::Error))
        .await
        .unwrap();
    assert_eq!(report.successful, 1);
}
