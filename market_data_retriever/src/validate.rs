//! Row-level quality triage for flat-file bar data.
//!
//! One day's flat file holds every instrument in the market; validation
//! filters it down to the requested ticker and applies the acceptance rules
//! row by row, short-circuiting at the first rule that fires. Malformed rows
//! are counted and dropped, never raised; the only hard error is a file whose
//! header is missing required columns, which is a caller/configuration
//! problem rather than a data-quality one.

use chrono::{NaiveDate, NaiveTime};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::IngestConfig;
use crate::models::bar::Bar;

/// Columns every aggregate flat file must carry.
pub const REQUIRED_COLUMNS: &[&str] = &["ticker", "open", "high", "low", "close", "volume", "vwap"];

/// Rejection threshold above which a warning is logged, in percent.
const REJECTION_WARN_PCT: f64 = 5.0;

#[derive(Debug, Error)]
pub enum ValidateError {
    /// The file header lacks required columns; aborts the whole call.
    #[error("missing required columns: {0:?}")]
    MissingColumns(Vec<String>),

    /// The payload is not readable as CSV at all.
    #[error("unreadable csv payload: {0}")]
    Csv(#[from] csv::Error),
}

/// Per-call tallies of what happened to each source row.
///
/// Counts are always complete: nothing is dropped without showing up here.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct QualityCounts {
    /// Rows in the file belonging to the requested ticker.
    pub total_rows: u64,
    /// Rows that made it into the output.
    pub accepted: u64,
    /// Rejected: one or more OHLC fields missing or unparseable.
    pub rejected_missing_price: u64,
    /// Rejected: high/low bracket inconsistent with open/close.
    pub rejected_ohlc_relationship: u64,
    /// Rejected: a price at or below zero, or above the sanity ceiling.
    pub rejected_price_sanity: u64,
    /// Rejected: negative volume.
    pub rejected_negative_volume: u64,
    /// Accepted with volume coerced to zero.
    pub volume_coerced_zero: u64,
    /// Accepted with vwap left absent.
    pub vwap_absent: u64,
}

impl QualityCounts {
    /// Total rejected rows across all reasons.
    pub fn rejected(&self) -> u64 {
        self.rejected_missing_price
            + self.rejected_ohlc_relationship
            + self.rejected_price_sanity
            + self.rejected_negative_volume
    }

    /// Accepted rows that were altered on the way in.
    pub fn modified(&self) -> u64 {
        self.volume_coerced_zero + self.vwap_absent
    }

    /// Rejection rate in percent; zero for an empty input.
    pub fn rejection_rate_pct(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        self.rejected() as f64 / self.total_rows as f64 * 100.0
    }

    /// Per-reason rejection tallies, keyed by the fixed reason vocabulary.
    pub fn rejection_reasons(&self) -> IndexMap<&'static str, u64> {
        IndexMap::from([
            ("missing_price_field", self.rejected_missing_price),
            ("invalid_ohlc_relationship", self.rejected_ohlc_relationship),
            ("price_out_of_sane_range", self.rejected_price_sanity),
            ("negative_volume", self.rejected_negative_volume),
        ])
    }
}

/// Accepted rows plus the tallies describing how they were selected.
#[derive(Debug)]
pub struct Validated {
    pub bars: Vec<Bar>,
    pub counts: QualityCounts,
}

struct Columns {
    ticker: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
    vwap: usize,
    transactions: Option<usize>,
}

/// Applies the row acceptance rules to one day's flat file.
pub struct RowValidator {
    sanity_ceiling: Decimal,
    source: String,
}

impl RowValidator {
    pub fn new(cfg: &IngestConfig) -> Self {
        let sanity_ceiling =
            Decimal::from_f64(cfg.price_sanity_ceiling).unwrap_or_else(|| Decimal::from(10_000));
        Self {
            sanity_ceiling,
            source: cfg.source_label.clone(),
        }
    }

    /// Validator with explicit limits, mostly for tests.
    pub fn with_limits(sanity_ceiling: Decimal, source: impl Into<String>) -> Self {
        Self {
            sanity_ceiling,
            source: source.into(),
        }
    }

    /// Filters `csv_bytes` to `ticker` and triages each row.
    ///
    /// Accepted rows are stamped with `date` (midnight UTC timestamp and
    /// ingestion date) and this validator's source label.
    pub fn validate(
        &self,
        csv_bytes: &[u8],
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Validated, ValidateError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(csv_bytes);

        let headers = reader.headers()?.clone();
        let position = |name: &str| headers.iter().position(|h| h == name);
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|&name| position(name).is_none())
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ValidateError::MissingColumns(missing));
        }
        let column = |name: &str| {
            position(name).ok_or_else(|| ValidateError::MissingColumns(vec![name.to_string()]))
        };
        let columns = Columns {
            ticker: column("ticker")?,
            open: column("open")?,
            high: column("high")?,
            low: column("low")?,
            close: column("close")?,
            volume: column("volume")?,
            vwap: column("vwap")?,
            transactions: position("transactions"),
        };

        let timestamp = date.and_time(NaiveTime::MIN).and_utc();
        let mut counts = QualityCounts::default();
        let mut bars = Vec::new();

        for record in reader.records() {
            let record = record?;
            if record.get(columns.ticker) != Some(ticker) {
                continue;
            }
            counts.total_rows += 1;

            let open = parse_decimal(record.get(columns.open));
            let high = parse_decimal(record.get(columns.high));
            let low = parse_decimal(record.get(columns.low));
            let close = parse_decimal(record.get(columns.close));
            let (Some(open), Some(high), Some(low), Some(close)) = (open, high, low, close) else {
                counts.rejected_missing_price += 1;
                continue;
            };

            if high < low || high < open || high < close || low > open || low > close {
                counts.rejected_ohlc_relationship += 1;
                continue;
            }

            if [open, high, low, close]
                .iter()
                .any(|p| *p <= Decimal::ZERO || *p > self.sanity_ceiling)
            {
                counts.rejected_price_sanity += 1;
                continue;
            }

            let volume = parse_integer(record.get(columns.volume));
            if volume.is_some_and(|v| v < 0) {
                counts.rejected_negative_volume += 1;
                continue;
            }
            let volume = match volume {
                Some(v) => v,
                None => {
                    counts.volume_coerced_zero += 1;
                    0
                }
            };

            let vwap = parse_decimal(record.get(columns.vwap));
            if vwap.is_none() {
                counts.vwap_absent += 1;
            }
            let transactions = columns
                .transactions
                .and_then(|i| parse_integer(record.get(i)));

            counts.accepted += 1;
            bars.push(Bar {
                ticker: ticker.to_string(),
                timestamp,
                open,
                high,
                low,
                close,
                volume,
                transactions,
                vwap,
                ingestion_date: date,
                source: self.source.clone(),
            });
        }

        if counts.total_rows == 0 {
            debug!(ticker, %date, "no rows found for ticker");
        }
        let rate = counts.rejection_rate_pct();
        if rate > REJECTION_WARN_PCT {
            warn!(
                ticker,
                %date,
                rejection_rate_pct = rate,
                total_rows = counts.total_rows,
                "high rejection rate"
            );
        }

        Ok(Validated { bars, counts })
    }
}

fn parse_decimal(field: Option<&str>) -> Option<Decimal> {
    let trimmed = field.map(str::trim).filter(|v| !v.is_empty())?;
    trimmed.parse::<Decimal>().ok()
}

fn parse_integer(field: Option<&str>) -> Option<i64> {
    let trimmed = field.map(str::trim).filter(|v| !v.is_empty())?;
    if let Ok(v) = trimmed.parse::<i64>() {
        return Some(v);
    }
    // Archives sometimes serialize counts as floats ("75000000.0").
    let v = trimmed.parse::<f64>().ok()?;
    v.is_finite().then_some(v.round() as i64)
}
