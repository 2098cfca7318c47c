//! Tracking of exhausted retrievals in `trading.failed_downloads`.
//!
//! One row per (ticker, date, data_type); re-recording the same failure
//! refreshes the attempt count and message and clears any stale resolution.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::result::QueryResult;
use diesel::upsert::excluded;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use market_data_retriever::models::data_type::DataType;
use market_data_retriever::retriever::FailedFetch;
use tracing::debug;

use crate::models::{FailedDownloadRow, NewFailedDownload};
use crate::schema::failed_downloads::dsl as fd;

/// Records (or refreshes) one failed retrieval.
pub async fn record(conn: &mut AsyncPgConnection, failure: &FailedFetch) -> QueryResult<usize> {
    let row = NewFailedDownload::from(failure);
    diesel::insert_into(fd::failed_downloads)
        .values(&row)
        .on_conflict((fd::ticker, fd::date, fd::data_type))
        .do_update()
        .set((
            fd::error_type.eq(excluded(fd::error_type)),
            fd::error_message.eq(excluded(fd::error_message)),
            fd::attempts.eq(excluded(fd::attempts)),
            fd::last_attempt_at.eq(excluded(fd::last_attempt_at)),
            fd::resolved_at.eq(None::<DateTime<Utc>>),
        ))
        .execute(conn)
        .await
}

/// Records a whole range's failures.
pub async fn record_batch(
    conn: &mut AsyncPgConnection,
    failures: &[FailedFetch],
) -> QueryResult<usize> {
    let mut written = 0;
    for failure in failures {
        written += record(conn, failure).await?;
    }
    if written > 0 {
        debug!(written, "recorded failed downloads");
    }
    Ok(written)
}

/// Unresolved failures that have not yet burned `max_attempts` attempts,
/// oldest first.
pub async fn pending_retries(
    conn: &mut AsyncPgConnection,
    max_attempts: i32,
) -> QueryResult<Vec<FailedDownloadRow>> {
    fd::failed_downloads
        .filter(fd::resolved_at.is_null())
        .filter(fd::attempts.lt(max_attempts))
        .order(fd::last_attempt_at.asc())
        .select(FailedDownloadRow::as_select())
        .load(conn)
        .await
}

/// Marks a previously-failed (ticker, date, feed) as resolved.
pub async fn mark_resolved(
    conn: &mut AsyncPgConnection,
    ticker: &str,
    date: NaiveDate,
    data_type: DataType,
) -> QueryResult<usize> {
    diesel::update(
        fd::failed_downloads
            .filter(fd::ticker.eq(ticker))
            .filter(fd::date.eq(date))
            .filter(fd::data_type.eq(data_type.as_str()))
            .filter(fd::resolved_at.is_null()),
    )
    .set(fd::resolved_at.eq(diesel::dsl::now))
    .execute(conn)
    .await
}
