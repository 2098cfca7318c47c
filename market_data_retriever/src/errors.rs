use chrono::NaiveDate;
use thiserror::Error;

/// Hard failures of a whole retrieval invocation.
///
/// Everything else (absent objects, transient store errors, malformed rows)
/// is recovered from locally and surfaced through counts and records, never
/// through this type.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// Caller or environment defect: bad parameters, malformed config,
    /// a flat file without the required columns.
    #[error("configuration error: {0}")]
    Config(String),

    /// The requested range is inverted.
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange {
        /// Requested range start.
        start: NaiveDate,
        /// Requested range end.
        end: NaiveDate,
    },
}
