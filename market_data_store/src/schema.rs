//! Diesel table definitions for the `trading` schema.
//!
//! Kept in lockstep with the embedded migrations; the natural-key primary
//! key on `market_data_raw` is what the update/ignore conflict policies
//! target.

// The `diesel::table!` macro generates column structs without doc comments,
// which trips the crate-level `#![deny(missing_docs)]`. Allow it for this
// module of generated definitions.
#![allow(missing_docs)]

diesel::table! {
    /// Raw OHLCV bars, one row per (ticker, timestamp, timeframe, data_source).
    trading.market_data_raw (ticker, timestamp, timeframe, data_source) {
        #[max_length = 10]
        ticker -> Varchar,
        timestamp -> Timestamptz,
        #[max_length = 8]
        timeframe -> Varchar,
        #[max_length = 20]
        data_source -> Varchar,
        open -> Numeric,
        high -> Numeric,
        low -> Numeric,
        close -> Numeric,
        volume -> Int8,
        transactions -> Nullable<Int8>,
        vwap -> Nullable<Numeric>,
        ingested_at -> Timestamptz,
    }
}

diesel::table! {
    /// Dates whose retrieval exhausted every retry.
    trading.failed_downloads (id) {
        id -> Int4,
        #[max_length = 10]
        ticker -> Varchar,
        date -> Date,
        #[max_length = 20]
        data_type -> Varchar,
        #[max_length = 50]
        error_type -> Varchar,
        error_message -> Nullable<Text>,
        attempts -> Int4,
        created_at -> Timestamptz,
        last_attempt_at -> Timestamptz,
        resolved_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    /// Row-triage tallies per (ticker, date, data_type).
    trading.data_quality_metrics (ticker, date, data_type) {
        #[max_length = 10]
        ticker -> Varchar,
        date -> Date,
        #[max_length = 20]
        data_type -> Varchar,
        total_rows -> Int4,
        accepted_rows -> Int4,
        rejected_rows -> Int4,
        modified_rows -> Int4,
        rejection_reasons -> Nullable<Jsonb>,
        quality_score -> Numeric,
        created_at -> Timestamptz,
    }
}
