//! Row types mapped onto the diesel schema.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use market_data_retriever::models::bar::Bar;
use market_data_retriever::models::data_type::DataType;
use market_data_retriever::retriever::FailedFetch;
use market_data_retriever::validate::QualityCounts;
use rust_decimal::Decimal;

use crate::schema::{data_quality_metrics, failed_downloads, market_data_raw};

/// Insertable bar row with the load-time labels applied.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = market_data_raw)]
pub struct NewBarRow {
    /// Instrument identifier.
    pub ticker: String,
    /// Bar timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Timeframe label, e.g. "1d".
    pub timeframe: String,
    /// Data-source label, e.g. "polygon_s3".
    pub data_source: String,
    /// Opening price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: i64,
    /// Trade count, when the archive supplies one.
    pub transactions: Option<i64>,
    /// Volume-weighted average price, when present.
    pub vwap: Option<Decimal>,
    /// Ingestion timestamp stamped by the loader; refreshed on upsert.
    pub ingested_at: DateTime<Utc>,
}

impl NewBarRow {
    /// Combines a validated bar with the invocation's labels.
    pub fn from_bar(
        bar: &Bar,
        timeframe: &str,
        data_source: &str,
        ingested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ticker: bar.ticker.clone(),
            timestamp: bar.timestamp,
            timeframe: timeframe.to_string(),
            data_source: data_source.to_string(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            transactions: bar.transactions,
            vwap: bar.vwap,
            ingested_at,
        }
    }
}

/// Queryable bar row, used by coverage queries and round-trip tests.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = market_data_raw)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BarRow {
    /// Instrument identifier.
    pub ticker: String,
    /// Bar timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Timeframe label.
    pub timeframe: String,
    /// Data-source label.
    pub data_source: String,
    /// Opening price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: i64,
    /// Trade count.
    pub transactions: Option<i64>,
    /// Volume-weighted average price.
    pub vwap: Option<Decimal>,
    /// Server-side ingestion timestamp.
    pub ingested_at: DateTime<Utc>,
}

/// Insertable failed-download record.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = failed_downloads)]
pub struct NewFailedDownload {
    /// Instrument identifier.
    pub ticker: String,
    /// Date that could not be retrieved.
    pub date: NaiveDate,
    /// Requested feed, e.g. "day_aggs".
    pub data_type: String,
    /// Error category (rate_limited, transient_store_error, ...).
    pub error_type: String,
    /// Last underlying error message.
    pub error_message: Option<String>,
    /// Attempts made before giving up.
    pub attempts: i32,
    /// When the final attempt happened.
    pub last_attempt_at: DateTime<Utc>,
}

impl From<&FailedFetch> for NewFailedDownload {
    fn from(failure: &FailedFetch) -> Self {
        Self {
            ticker: failure.ticker.clone(),
            date: failure.date,
            data_type: failure.data_type.as_str().to_string(),
            error_type: failure.kind.as_str().to_string(),
            error_message: Some(failure.message.clone()),
            attempts: failure.attempts as i32,
            last_attempt_at: failure.failed_at,
        }
    }
}

/// Queryable failed-download record.
#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = failed_downloads)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FailedDownloadRow {
    /// Surrogate id.
    pub id: i32,
    /// Instrument identifier.
    pub ticker: String,
    /// Date that could not be retrieved.
    pub date: NaiveDate,
    /// Requested feed.
    pub data_type: String,
    /// Error category.
    pub error_type: String,
    /// Last underlying error message.
    pub error_message: Option<String>,
    /// Attempts made before giving up.
    pub attempts: i32,
    /// First time this (ticker, date, feed) failed.
    pub created_at: DateTime<Utc>,
    /// Most recent failure time.
    pub last_attempt_at: DateTime<Utc>,
    /// Set once a later retrieval succeeded.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Insertable quality-metrics record.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = data_quality_metrics)]
pub struct NewQualityRow {
    /// Instrument identifier.
    pub ticker: String,
    /// Date the file was ingested for.
    pub date: NaiveDate,
    /// Feed the metrics describe.
    pub data_type: String,
    /// Rows belonging to the ticker.
    pub total_rows: i32,
    /// Rows accepted.
    pub accepted_rows: i32,
    /// Rows rejected, all reasons.
    pub rejected_rows: i32,
    /// Rows accepted with modifications.
    pub modified_rows: i32,
    /// Per-reason rejection tallies.
    pub rejection_reasons: Option<serde_json::Value>,
    /// Accepted share in percent, two decimals.
    pub quality_score: Decimal,
}

impl NewQualityRow {
    /// Flattens triage tallies into a metrics row.
    pub fn from_counts(
        ticker: &str,
        date: NaiveDate,
        data_type: DataType,
        counts: &QualityCounts,
    ) -> Self {
        let quality_score = if counts.total_rows == 0 {
            Decimal::from(100)
        } else {
            (Decimal::from(counts.accepted) * Decimal::from(100) / Decimal::from(counts.total_rows))
                .round_dp(2)
        };
        Self {
            ticker: ticker.to_string(),
            date,
            data_type: data_type.as_str().to_string(),
            total_rows: counts.total_rows as i32,
            accepted_rows: counts.accepted as i32,
            rejected_rows: counts.rejected() as i32,
            modified_rows: counts.modified() as i32,
            rejection_reasons: serde_json::to_value(counts.rejection_reasons()).ok(),
            quality_score,
        }
    }
}

/// One (constraint, column) pair from the information schema.
#[derive(Debug, QueryableByName)]
pub struct ConstraintColumn {
    /// Constraint the column belongs to.
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub constraint_name: String,
    /// Column covered by that constraint.
    #[diesel(sql_type = diesel::sql_types::Text)]
    pub column_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn bar_row_carries_load_labels() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let bar = Bar {
            ticker: "AAPL".into(),
            timestamp: date.and_time(NaiveTime::MIN).and_utc(),
            open: Decimal::new(1800, 1),
            high: Decimal::new(1820, 1),
            low: Decimal::new(1795, 1),
            close: Decimal::new(1815, 1),
            volume: 75_000_000,
            transactions: Some(500_000),
            vwap: None,
            ingestion_date: date,
            source: "polygon_s3".into(),
        };
        let stamped = Utc::now();
        let row = NewBarRow::from_bar(&bar, "1d", "polygon_s3", stamped);
        assert_eq!(row.timeframe, "1d");
        assert_eq!(row.data_source, "polygon_s3");
        assert_eq!(row.ingested_at, stamped);
        assert_eq!(row.vwap, None);
    }

    #[test]
    fn quality_score_rounds_to_two_decimals() {
        let counts = QualityCounts {
            total_rows: 3,
            accepted: 2,
            rejected_ohlc_relationship: 1,
            ..QualityCounts::default()
        };
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let row = NewQualityRow::from_counts("AAPL", date, DataType::DayAggs, &counts);
        assert_eq!(row.quality_score.to_string(), "66.67");
        assert_eq!(row.rejected_rows, 1);
        let reasons = row.rejection_reasons.unwrap();
        assert_eq!(reasons["invalid_ohlc_relationship"], 1);
    }

    #[test]
    fn empty_file_scores_perfect() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let row =
            NewQualityRow::from_counts("AAPL", date, DataType::DayAggs, &QualityCounts::default());
        assert_eq!(row.quality_score, Decimal::from(100));
    }
}
