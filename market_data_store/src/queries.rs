//! Coverage and maintenance queries over the bar table.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use diesel::result::QueryResult;
use diesel::sql_types::{Text, Timestamptz};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared_utils::calendar;
use tracing::{info, warn};

use crate::schema::market_data_raw::dsl as m;

#[derive(QueryableByName)]
struct PresentDate {
    #[diesel(sql_type = diesel::sql_types::Date)]
    day: NaiveDate,
}

fn day_bounds(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_ts = start.and_time(NaiveTime::MIN).and_utc();
    // Exclusive upper bound: midnight after the last requested day.
    let end_ts = end
        .succ_opt()
        .unwrap_or(end)
        .and_time(NaiveTime::MIN)
        .and_utc();
    (start_ts, end_ts)
}

/// Most recent stored timestamp for a (ticker, timeframe, source), for
/// incremental ingestion.
pub async fn last_timestamp(
    conn: &mut AsyncPgConnection,
    ticker: &str,
    timeframe: &str,
    data_source: &str,
) -> QueryResult<Option<DateTime<Utc>>> {
    m::market_data_raw
        .filter(m::ticker.eq(ticker))
        .filter(m::timeframe.eq(timeframe))
        .filter(m::data_source.eq(data_source))
        .select(diesel::dsl::max(m::timestamp))
        .first(conn)
        .await
}

/// Distinct dates with stored rows in `[start, end]`, ascending.
pub async fn present_dates(
    conn: &mut AsyncPgConnection,
    ticker: &str,
    timeframe: &str,
    data_source: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> QueryResult<Vec<NaiveDate>> {
    let (start_ts, end_ts) = day_bounds(start, end);
    let rows: Vec<PresentDate> = diesel::sql_query(
        "SELECT DISTINCT (\"timestamp\" AT TIME ZONE 'UTC')::date AS day \
         FROM trading.market_data_raw \
         WHERE ticker = $1 AND timeframe = $2 AND data_source = $3 \
           AND \"timestamp\" >= $4 AND \"timestamp\" < $5 \
         ORDER BY day",
    )
    .bind::<Text, _>(ticker)
    .bind::<Text, _>(timeframe)
    .bind::<Text, _>(data_source)
    .bind::<Timestamptz, _>(start_ts)
    .bind::<Timestamptz, _>(end_ts)
    .load(conn)
    .await?;

    Ok(rows.into_iter().map(|r| r.day).collect())
}

/// Business days in `[start, end]` with no stored rows; weekends are never
/// reported as gaps.
pub async fn data_gaps(
    conn: &mut AsyncPgConnection,
    ticker: &str,
    timeframe: &str,
    data_source: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> QueryResult<Vec<NaiveDate>> {
    let present: BTreeSet<NaiveDate> =
        present_dates(conn, ticker, timeframe, data_source, start, end)
            .await?
            .into_iter()
            .collect();
    let gaps = calendar::missing_business_days(start, end, &present);
    if !gaps.is_empty() {
        warn!(ticker, gap_count = gaps.len(), %start, %end, "coverage gaps found");
    }
    Ok(gaps)
}

/// Deletes a date range for reprocessing; `dry_run` only counts.
///
/// Returns the number of rows deleted (or that would be deleted).
pub async fn delete_date_range(
    conn: &mut AsyncPgConnection,
    ticker: &str,
    timeframe: &str,
    data_source: &str,
    start: NaiveDate,
    end: NaiveDate,
    dry_run: bool,
) -> QueryResult<usize> {
    let (start_ts, end_ts) = day_bounds(start, end);

    let count: i64 = m::market_data_raw
        .filter(m::ticker.eq(ticker))
        .filter(m::timeframe.eq(timeframe))
        .filter(m::data_source.eq(data_source))
        .filter(m::timestamp.ge(start_ts))
        .filter(m::timestamp.lt(end_ts))
        .count()
        .get_result(conn)
        .await?;

    if dry_run {
        info!(ticker, rows = count, %start, %end, "dry run: would delete");
        return Ok(count as usize);
    }
    if count == 0 {
        info!(ticker, %start, %end, "no rows to delete");
        return Ok(0);
    }

    diesel::delete(
        m::market_data_raw
            .filter(m::ticker.eq(ticker))
            .filter(m::timeframe.eq(timeframe))
            .filter(m::data_source.eq(data_source))
            .filter(m::timestamp.ge(start_ts))
            .filter(m::timestamp.lt(end_ts)),
    )
    .execute(conn)
    .await?;

    warn!(ticker, rows = count, %start, %end, "deleted date range");
    Ok(count as usize)
}
