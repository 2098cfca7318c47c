//! Persistence of row-triage tallies in `trading.data_quality_metrics`.

use chrono::NaiveDate;
use diesel::prelude::*;
use diesel::result::QueryResult;
use diesel::upsert::excluded;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use market_data_retriever::models::data_type::DataType;
use market_data_retriever::validate::QualityCounts;

use crate::models::NewQualityRow;
use crate::schema::data_quality_metrics::dsl as dq;

/// Writes one day's triage tallies; re-ingesting a day overwrites them.
pub async fn insert_metrics(
    conn: &mut AsyncPgConnection,
    ticker: &str,
    date: NaiveDate,
    data_type: DataType,
    counts: &QualityCounts,
) -> QueryResult<usize> {
    let row = NewQualityRow::from_counts(ticker, date, data_type, counts);
    diesel::insert_into(dq::data_quality_metrics)
        .values(&row)
        .on_conflict((dq::ticker, dq::date, dq::data_type))
        .do_update()
        .set((
            dq::total_rows.eq(excluded(dq::total_rows)),
            dq::accepted_rows.eq(excluded(dq::accepted_rows)),
            dq::rejected_rows.eq(excluded(dq::rejected_rows)),
            dq::modified_rows.eq(excluded(dq::modified_rows)),
            dq::rejection_reasons.eq(excluded(dq::rejection_reasons)),
            dq::quality_score.eq(excluded(dq::quality_score)),
        ))
        .execute(conn)
        .await
}

/// Writes tallies for every date of a range retrieval.
pub async fn insert_metrics_batch(
    conn: &mut AsyncPgConnection,
    ticker: &str,
    data_type: DataType,
    per_date: &[(NaiveDate, QualityCounts)],
) -> QueryResult<usize> {
    let mut written = 0;
    for (date, counts) in per_date {
        written += insert_metrics(conn, ticker, *date, data_type, counts).await?;
    }
    Ok(written)
}
