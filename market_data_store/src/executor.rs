//! Statement execution with retry, error classification and metrics.
//!
//! Transient and connectivity errors are retried on the shared backoff
//! policy; integrity errors (duplicate key, not-null, check constraint)
//! fail immediately, since retrying cannot change the outcome and would only
//! mask a data problem. Anything unrecognized is treated as transient, the
//! conservative default. Every execution emits one structured metric event
//! on the `db_metrics` target.

use std::time::Instant;

use diesel::ExpressionMethods;
use diesel::result::{DatabaseErrorKind, Error as DieselError, QueryResult};
use diesel::upsert::excluded;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared_utils::retry::RetryPolicy;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::pool::ConnectionPool;
use crate::loader::ConflictPolicy;
use crate::models::{ConstraintColumn, NewBarRow};

/// How a database error should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Constraint violation; never retried.
    Integrity,
    /// The connection itself is broken; retried on a fresh connection and
    /// the old one is discarded.
    ConnectionLost,
    /// Everything else; retried.
    Transient,
}

/// Maps a diesel error onto the retry taxonomy.
pub fn classify(err: &DieselError) -> ErrorClass {
    match err {
        DieselError::DatabaseError(kind, _) => match kind {
            DatabaseErrorKind::UniqueViolation
            | DatabaseErrorKind::ForeignKeyViolation
            | DatabaseErrorKind::NotNullViolation
            | DatabaseErrorKind::CheckViolation => ErrorClass::Integrity,
            DatabaseErrorKind::ClosedConnection => ErrorClass::ConnectionLost,
            _ => ErrorClass::Transient,
        },
        DieselError::BrokenTransactionManager => ErrorClass::ConnectionLost,
        _ => ErrorClass::Transient,
    }
}

/// Terminal failure of one executed statement.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Constraint violation, surfaced immediately.
    #[error("integrity violation: {source}")]
    Integrity {
        /// The underlying diesel error.
        #[source]
        source: DieselError,
    },

    /// Transient failures outlasted the retry budget.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Total attempts made.
        attempts: u32,
        /// The last underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl ExecError {
    /// Short category tag for per-row failure records.
    pub fn category(&self) -> &'static str {
        match self {
            ExecError::Integrity { .. } => "integrity_error",
            ExecError::RetryExhausted { .. } => "retry_exhausted",
        }
    }
}

/// A parameterized insert against the bar table.
#[derive(Debug)]
pub enum Statement<'a> {
    /// One multi-row statement covering the whole batch.
    InsertBars {
        /// Rows to insert.
        rows: &'a [NewBarRow],
        /// Conflict clause to build.
        policy: ConflictPolicy,
    },
    /// Single-row fallback insert.
    InsertBar {
        /// Row to insert.
        row: &'a NewBarRow,
        /// Conflict clause to build.
        policy: ConflictPolicy,
    },
}

enum TryError {
    Integrity(DieselError),
    Transient(Box<dyn std::error::Error + Send + Sync>),
}

const NATURAL_KEY_SQL: &str = "\
    SELECT tc.constraint_name::text AS constraint_name, \
           kcu.column_name::text AS column_name \
    FROM information_schema.table_constraints tc \
    JOIN information_schema.key_column_usage kcu \
      ON tc.constraint_name = kcu.constraint_name \
     AND tc.constraint_schema = kcu.constraint_schema \
    WHERE tc.table_schema = 'trading' \
      AND tc.table_name = 'market_data_raw' \
      AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE') \
    ORDER BY tc.constraint_name, kcu.ordinal_position";

/// Executes statements through the pool with bounded retries.
pub struct RetryingExecutor {
    pool: ConnectionPool,
    policy: RetryPolicy,
}

impl RetryingExecutor {
    /// Executor over `pool` with the default backoff policy.
    pub fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
            policy: RetryPolicy::default(),
        }
    }

    /// Overrides the backoff policy; tests use this to avoid real sleeps.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs one insert statement, retrying transients up to `max_retries`.
    pub async fn execute(
        &self,
        operation: &'static str,
        stmt: Statement<'_>,
        max_retries: u32,
    ) -> Result<usize, ExecError> {
        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let last_err = match self.try_statement(&stmt).await {
                Ok(rows) => {
                    emit(operation, attempt, started, "success", Some(rows));
                    return Ok(rows);
                }
                Err(TryError::Integrity(source)) => {
                    emit(operation, attempt, started, "integrity_error", None);
                    return Err(ExecError::Integrity { source });
                }
                Err(TryError::Transient(source)) => {
                    emit(operation, attempt, started, "transient_error", None);
                    source
                }
            };

            if attempt >= max_retries {
                return Err(ExecError::RetryExhausted {
                    attempts: attempt + 1,
                    source: last_err,
                });
            }
            let delay = self.policy.delay(attempt);
            warn!(
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %last_err,
                "transient database error, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Loads the unique/primary-key column sets of the bar table.
    pub async fn load_key_constraints(
        &self,
        max_retries: u32,
    ) -> Result<Vec<ConstraintColumn>, ExecError> {
        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            let last_err: Box<dyn std::error::Error + Send + Sync> =
                match self.pool.checkout().await {
                    Ok(mut conn) => {
                        match diesel::sql_query(NATURAL_KEY_SQL)
                            .load::<ConstraintColumn>(&mut conn)
                            .await
                        {
                            Ok(rows) => {
                                emit("verify_natural_key", attempt, started, "success", None);
                                return Ok(rows);
                            }
                            Err(err) => match classify(&err) {
                                ErrorClass::Integrity => {
                                    emit(
                                        "verify_natural_key",
                                        attempt,
                                        started,
                                        "integrity_error",
                                        None,
                                    );
                                    return Err(ExecError::Integrity { source: err });
                                }
                                ErrorClass::ConnectionLost => {
                                    ConnectionPool::discard(conn);
                                    Box::new(err)
                                }
                                ErrorClass::Transient => Box::new(err),
                            },
                        }
                    }
                    Err(pool_err) => Box::new(pool_err),
                };

            emit("verify_natural_key", attempt, started, "transient_error", None);
            if attempt >= max_retries {
                return Err(ExecError::RetryExhausted {
                    attempts: attempt + 1,
                    source: last_err,
                });
            }
            let delay = self.policy.delay(attempt);
            warn!(
                operation = "verify_natural_key",
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %last_err,
                "transient database error, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn try_statement(&self, stmt: &Statement<'_>) -> Result<usize, TryError> {
        let mut conn = match self.pool.checkout().await {
            Ok(conn) => conn,
            // Pool exhaustion and connect failures are transient by policy.
            Err(err) => return Err(TryError::Transient(Box::new(err))),
        };

        match run_statement(&mut conn, stmt).await {
            Ok(rows) => Ok(rows),
            Err(err) => match classify(&err) {
                ErrorClass::Integrity => Err(TryError::Integrity(err)),
                ErrorClass::ConnectionLost => {
                    ConnectionPool::discard(conn);
                    Err(TryError::Transient(Box::new(err)))
                }
                ErrorClass::Transient => Err(TryError::Transient(Box::new(err))),
            },
        }
    }
}

async fn run_statement(
    conn: &mut AsyncPgConnection,
    stmt: &Statement<'_>,
) -> QueryResult<usize> {
    use crate::schema::market_data_raw::dsl as m;

    match stmt {
        Statement::InsertBars { rows, policy } => match policy {
            ConflictPolicy::Update => {
                diesel::insert_into(m::market_data_raw)
                    .values(*rows)
                    .on_conflict((m::ticker, m::timestamp, m::timeframe, m::data_source))
                    .do_update()
                    .set((
                        m::open.eq(excluded(m::open)),
                        m::high.eq(excluded(m::high)),
                        m::low.eq(excluded(m::low)),
                        m::close.eq(excluded(m::close)),
                        m::volume.eq(excluded(m::volume)),
                        m::transactions.eq(excluded(m::transactions)),
                        m::vwap.eq(excluded(m::vwap)),
                        m::ingested_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
                    .await
            }
            ConflictPolicy::Ignore => {
                diesel::insert_into(m::market_data_raw)
                    .values(*rows)
                    .on_conflict((m::ticker, m::timestamp, m::timeframe, m::data_source))
                    .do_nothing()
                    .execute(conn)
                    .await
            }
            ConflictPolicy::Error => {
                diesel::insert_into(m::market_data_raw)
                    .values(*rows)
                    .execute(conn)
                    .await
            }
        },
        Statement::InsertBar { row, policy } => match policy {
            ConflictPolicy::Update => {
                diesel::insert_into(m::market_data_raw)
                    .values(*row)
                    .on_conflict((m::ticker, m::timestamp, m::timeframe, m::data_source))
                    .do_update()
                    .set((
                        m::open.eq(excluded(m::open)),
                        m::high.eq(excluded(m::high)),
                        m::low.eq(excluded(m::low)),
                        m::close.eq(excluded(m::close)),
                        m::volume.eq(excluded(m::volume)),
                        m::transactions.eq(excluded(m::transactions)),
                        m::vwap.eq(excluded(m::vwap)),
                        m::ingested_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
                    .await
            }
            ConflictPolicy::Ignore => {
                diesel::insert_into(m::market_data_raw)
                    .values(*row)
                    .on_conflict((m::ticker, m::timestamp, m::timeframe, m::data_source))
                    .do_nothing()
                    .execute(conn)
                    .await
            }
            ConflictPolicy::Error => {
                diesel::insert_into(m::market_data_raw)
                    .values(*row)
                    .execute(conn)
                    .await
            }
        },
    }
}

fn emit(operation: &str, attempt: u32, started: Instant, outcome: &str, rows: Option<usize>) {
    info!(
        target: "db_metrics",
        operation,
        attempt = attempt + 1,
        duration_ms = started.elapsed().as_millis() as u64,
        rows = rows.map(|r| r as u64),
        outcome,
        "statement executed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_error(kind: DatabaseErrorKind) -> DieselError {
        DieselError::DatabaseError(kind, Box::new("boom".to_string()))
    }

    #[test]
    fn constraint_violations_are_integrity() {
        for kind in [
            DatabaseErrorKind::UniqueViolation,
            DatabaseErrorKind::ForeignKeyViolation,
            DatabaseErrorKind::NotNullViolation,
            DatabaseErrorKind::CheckViolation,
        ] {
            assert_eq!(classify(&db_error(kind)), ErrorClass::Integrity);
        }
    }

    #[test]
    fn closed_connections_are_connection_lost() {
        assert_eq!(
            classify(&db_error(DatabaseErrorKind::ClosedConnection)),
            ErrorClass::ConnectionLost
        );
        assert_eq!(
            classify(&DieselError::BrokenTransactionManager),
            ErrorClass::ConnectionLost
        );
    }

    #[test]
    fn everything_else_is_transient() {
        assert_eq!(
            classify(&db_error(DatabaseErrorKind::SerializationFailure)),
            ErrorClass::Transient
        );
        assert_eq!(classify(&DieselError::NotFound), ErrorClass::Transient);
    }

    #[test]
    fn categories_match_report_vocabulary() {
        let integrity = ExecError::Integrity {
            source: db_error(DatabaseErrorKind::UniqueViolation),
        };
        assert_eq!(integrity.category(), "integrity_error");

        let exhausted = ExecError::RetryExhausted {
            attempts: 4,
            source: Box::new(db_error(DatabaseErrorKind::SerializationFailure)),
        };
        assert_eq!(exhausted.category(), "retry_exhausted");
        assert!(exhausted.to_string().contains("4 attempts"));
    }
}
