//! The loader's write seam.
//!
//! [`BarSink`] is the trait boundary between batching/fallback logic and the
//! actual database; [`PgBarSink`] is the production implementation over the
//! retrying executor, and scenario tests script a fake.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::executor::{ExecError, RetryingExecutor, Statement};
use crate::loader::{ConflictPolicy, LoadError};
use crate::models::{ConstraintColumn, NewBarRow};

/// Columns of the natural key, the conflict target for upserts.
pub const NATURAL_KEY_COLUMNS: [&str; 4] = ["ticker", "timestamp", "timeframe", "data_source"];

/// Write interface the bulk loader drives.
#[async_trait]
pub trait BarSink: Send + Sync {
    /// Fails with a configuration error when the natural-key uniqueness
    /// constraint required by update/ignore policies is missing.
    async fn ensure_natural_key_constraint(&self) -> Result<(), LoadError>;

    /// One multi-row statement covering the whole batch.
    async fn insert_batch(&self, rows: &[NewBarRow], policy: ConflictPolicy)
    -> Result<usize, ExecError>;

    /// Single-row fallback insert with a reduced retry budget.
    async fn insert_row(&self, row: &NewBarRow, policy: ConflictPolicy)
    -> Result<usize, ExecError>;
}

/// True when any unique or primary-key constraint covers exactly the
/// natural key.
pub fn covers_natural_key(columns: &[ConstraintColumn]) -> bool {
    let mut by_constraint: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for row in columns {
        by_constraint
            .entry(row.constraint_name.as_str())
            .or_default()
            .insert(row.column_name.as_str());
    }
    let natural_key: BTreeSet<&str> = NATURAL_KEY_COLUMNS.into_iter().collect();
    by_constraint.values().any(|cols| *cols == natural_key)
}

/// Production sink writing through the retrying executor.
pub struct PgBarSink {
    executor: RetryingExecutor,
}

impl PgBarSink {
    /// Retry budget for batch-level statements.
    const BATCH_RETRIES: u32 = 3;
    /// Reduced budget for per-row fallback inserts; per-row retries
    /// multiply cost across a failing batch.
    const ROW_RETRIES: u32 = 1;

    /// Sink over `executor`.
    pub fn new(executor: RetryingExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl BarSink for PgBarSink {
    async fn ensure_natural_key_constraint(&self) -> Result<(), LoadError> {
        let columns = self
            .executor
            .load_key_constraints(Self::BATCH_RETRIES)
            .await?;
        if covers_natural_key(&columns) {
            Ok(())
        } else {
            Err(LoadError::Config(format!(
                "trading.market_data_raw lacks a unique constraint over ({}); \
                 the update/ignore conflict policies cannot work without it",
                NATURAL_KEY_COLUMNS.join(", ")
            )))
        }
    }

    async fn insert_batch(
        &self,
        rows: &[NewBarRow],
        policy: ConflictPolicy,
    ) -> Result<usize, ExecError> {
        self.executor
            .execute(
                "bulk_insert_bars",
                Statement::InsertBars { rows, policy },
                Self::BATCH_RETRIES,
            )
            .await
    }

    async fn insert_row(
        &self,
        row: &NewBarRow,
        policy: ConflictPolicy,
    ) -> Result<usize, ExecError> {
        self.executor
            .execute(
                "insert_bar",
                Statement::InsertBar { row, policy },
                Self::ROW_RETRIES,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(constraint: &str, column: &str) -> ConstraintColumn {
        ConstraintColumn {
            constraint_name: constraint.to_string(),
            column_name: column.to_string(),
        }
    }

    #[test]
    fn primary_key_over_natural_key_is_detected() {
        let rows = vec![
            col("market_data_raw_pkey", "ticker"),
            col("market_data_raw_pkey", "timestamp"),
            col("market_data_raw_pkey", "timeframe"),
            col("market_data_raw_pkey", "data_source"),
        ];
        assert!(covers_natural_key(&rows));
    }

    #[test]
    fn partial_constraint_does_not_count() {
        let rows = vec![
            col("pk", "ticker"),
            col("pk", "timestamp"),
            col("pk", "timeframe"),
        ];
        assert!(!covers_natural_key(&rows));
    }

    #[test]
    fn wider_constraint_does_not_count() {
        let rows = vec![
            col("pk", "ticker"),
            col("pk", "timestamp"),
            col("pk", "timeframe"),
            col("pk", "data_source"),
            col("pk", "volume"),
        ];
        assert!(!covers_natural_key(&rows));
    }

    #[test]
    fn any_matching_constraint_suffices() {
        let rows = vec![
            col("pk", "id"),
            col("uq_natural", "data_source"),
            col("uq_natural", "ticker"),
            col("uq_natural", "timeframe"),
            col("uq_natural", "timestamp"),
        ];
        assert!(covers_natural_key(&rows));
    }

    #[test]
    fn no_constraints_at_all() {
        assert!(!covers_natural_key(&[]));
    }
}
