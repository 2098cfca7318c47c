//! Canonical in-memory representation of a time-series bar (OHLCV).
//!
//! This struct is the standard output of the validation layer and the input
//! of the bulk loader, regardless of which object-store archive the row came
//! from.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

/// A single validated OHLCV row.
///
/// The natural key in storage is (ticker, timestamp, timeframe, data source);
/// timeframe and data-source labels are applied at load time, the rest lives
/// here. Prices are fixed-precision decimals, volume is a non-negative count.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    /// The instrument this row belongs to (e.g., "AAPL").
    pub ticker: String,

    /// The timestamp for this bar (UTC, midnight for day aggregates).
    pub timestamp: DateTime<Utc>,

    /// Opening price.
    pub open: Decimal,

    /// Highest price during the bar interval.
    pub high: Decimal,

    /// Lowest price during the bar interval.
    pub low: Decimal,

    /// Closing price.
    pub close: Decimal,

    /// Volume traded during the bar interval.
    pub volume: i64,

    /// Trade count for the bar. Not all archives supply this.
    pub transactions: Option<i64>,

    /// Volume-weighted average price. Nullable in storage.
    pub vwap: Option<Decimal>,

    /// The date this row was ingested from the archive.
    pub ingestion_date: NaiveDate,

    /// Label of the upstream archive (e.g., "polygon_s3").
    pub source: String,
}
