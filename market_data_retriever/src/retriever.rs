//! Per-date retrieval state machine and range orchestration.
//!
//! Each (ticker, date) walks `Unchecked -> Absent | Present`, and a present
//! date is fetched and validated with bounded retries. Absence is terminal
//! and silent; retry exhaustion produces exactly one [`FailedFetch`]. Range
//! calls aggregate accepted rows and failures independently; both are always
//! returned, possibly empty.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use shared_utils::calendar;
use shared_utils::retry::{RateLimitSchedule, RetryPolicy};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{IngestConfig, MarketCalendar};
use crate::errors::RetrieveError;
use crate::models::bar::Bar;
use crate::models::data_type::DataType;
use crate::store::{ObjectStore, ObjectStoreGateway, StoreError};
use crate::validate::{QualityCounts, RowValidator, ValidateError};

/// Why a date ultimately could not be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Every attempt was throttled by the store.
    RateLimited,
    /// The store kept failing with retryable errors.
    TransientStore,
    /// Something outside the store taxonomy, e.g. an unparseable payload.
    Unexpected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::TransientStore => "transient_store_error",
            FailureKind::Unexpected => "unexpected_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One exhausted (ticker, date): all retries burned without a fetch.
///
/// A merely-absent file never produces one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedFetch {
    pub ticker: String,
    pub date: NaiveDate,
    pub data_type: DataType,
    pub kind: FailureKind,
    pub message: String,
    /// Total attempts made, i.e. `max_retries + 1`.
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Terminal state of one (ticker, date).
#[derive(Debug)]
pub enum DayOutcome {
    /// No backing object; contributes nothing anywhere.
    Absent,
    /// Fetched and validated.
    Fetched {
        bars: Vec<Bar>,
        quality: QualityCounts,
    },
    /// Retries exhausted.
    Failed(FailedFetch),
}

/// Aggregated result of a range call.
#[derive(Debug, Default)]
pub struct RangeOutcome {
    /// Accepted rows across all dates, sorted by timestamp ascending.
    pub bars: Vec<Bar>,
    /// One record per date whose retries were exhausted.
    pub failures: Vec<FailedFetch>,
    /// Per-date triage tallies for dates that had a file.
    pub quality: Vec<(NaiveDate, QualityCounts)>,
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unreadable payload: {0}")]
    Parse(String),

    #[error("{0}")]
    Config(String),
}

impl AttemptError {
    fn kind(&self) -> FailureKind {
        match self {
            AttemptError::Store(StoreError::RateLimited(_)) => FailureKind::RateLimited,
            AttemptError::Store(_) => FailureKind::TransientStore,
            AttemptError::Parse(_) => FailureKind::Unexpected,
            // Config errors abort the invocation before a FailedFetch exists.
            AttemptError::Config(_) => FailureKind::Unexpected,
        }
    }
}

/// Fetch-and-validate orchestrator over an [`ObjectStore`].
pub struct Retriever<S> {
    gateway: ObjectStoreGateway<S>,
    validator: RowValidator,
    policy: RetryPolicy,
    rate_limit: RateLimitSchedule,
    max_retries: u32,
    calendar: MarketCalendar,
}

impl<S: ObjectStore> Retriever<S> {
    pub fn new(gateway: ObjectStoreGateway<S>, validator: RowValidator, cfg: &IngestConfig) -> Self {
        Self {
            gateway,
            validator,
            policy: RetryPolicy::default(),
            rate_limit: RateLimitSchedule::default(),
            max_retries: cfg.max_retries,
            calendar: cfg.calendar,
        }
    }

    /// Overrides both backoff schedules. Tests use this to avoid real sleeps.
    pub fn with_backoff(mut self, policy: RetryPolicy, rate_limit: RateLimitSchedule) -> Self {
        self.policy = policy;
        self.rate_limit = rate_limit;
        self
    }

    /// Resolves one (ticker, date) to its terminal state.
    pub async fn fetch_day(
        &self,
        ticker: &str,
        date: NaiveDate,
        data_type: DataType,
    ) -> Result<DayOutcome, RetrieveError> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt_day(ticker, date, data_type).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::Config(msg)) => return Err(RetrieveError::Config(msg)),
                Err(err) => {
                    if attempt >= self.max_retries {
                        let attempts = attempt + 1;
                        warn!(
                            ticker,
                            %date,
                            attempts,
                            kind = %err.kind(),
                            error = %err,
                            "retries exhausted for date"
                        );
                        return Ok(DayOutcome::Failed(FailedFetch {
                            ticker: ticker.to_string(),
                            date,
                            data_type,
                            kind: err.kind(),
                            message: err.to_string(),
                            attempts,
                            failed_at: Utc::now(),
                        }));
                    }
                    // Rate limits back off on the slow linear schedule;
                    // everything else uses the exponential policy.
                    let delay = match &err {
                        AttemptError::Store(StoreError::RateLimited(_)) => {
                            self.rate_limit.delay(attempt)
                        }
                        _ => self.policy.delay(attempt),
                    };
                    warn!(
                        ticker,
                        %date,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt_day(
        &self,
        ticker: &str,
        date: NaiveDate,
        data_type: DataType,
    ) -> Result<DayOutcome, AttemptError> {
        if !self.gateway.exists(ticker, date, data_type).await? {
            debug!(ticker, %date, "no file for date");
            return Ok(DayOutcome::Absent);
        }

        let bytes = match self.gateway.fetch(ticker, date, data_type).await {
            Ok(bytes) => bytes,
            // Vanished between probe and fetch; treated exactly like Absent.
            Err(StoreError::NotFound) => {
                debug!(ticker, %date, "object vanished between probe and fetch");
                return Ok(DayOutcome::Absent);
            }
            Err(err) => return Err(err.into()),
        };

        let validated = self
            .validator
            .validate(&bytes, ticker, date)
            .map_err(|err| match err {
                ValidateError::MissingColumns(_) => AttemptError::Config(err.to_string()),
                ValidateError::Csv(csv_err) => AttemptError::Parse(csv_err.to_string()),
            })?;

        Ok(DayOutcome::Fetched {
            bars: validated.bars,
            quality: validated.counts,
        })
    }

    /// Retrieves `[start, end]` inclusive, date by date in ascending order.
    pub async fn fetch_range(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
        data_type: DataType,
    ) -> Result<RangeOutcome, RetrieveError> {
        if start > end {
            return Err(RetrieveError::InvalidRange { start, end });
        }

        let dates = match self.calendar {
            MarketCalendar::Weekdays => calendar::business_days(start, end),
            MarketCalendar::AllDays => calendar::calendar_days(start, end),
        };

        let mut outcome = RangeOutcome::default();
        for date in dates {
            match self.fetch_day(ticker, date, data_type).await? {
                DayOutcome::Absent => {}
                DayOutcome::Fetched { bars, quality } => {
                    outcome.bars.extend(bars);
                    outcome.quality.push((date, quality));
                }
                DayOutcome::Failed(failure) => outcome.failures.push(failure),
            }
        }

        // Processing order already ascends, but the contract is a sorted
        // table regardless of how dates were processed.
        outcome.bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        info!(
            ticker,
            %start,
            %end,
            rows = outcome.bars.len(),
            failed_dates = outcome.failures.len(),
            "range retrieval complete"
        );
        Ok(outcome)
    }
}
