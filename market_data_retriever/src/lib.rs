//! Retrieval layer for daily market bars stored in an object-store archive.
//!
//! The flow is: probe for the day's flat file ([`store::ObjectStoreGateway`]),
//! fetch and decompress it, triage its rows ([`validate::RowValidator`]) and
//! aggregate per-date results across a range ([`retriever::Retriever`]).
//! A day with no backing object is not an error; a day whose fetch keeps
//! failing after backoff becomes a [`retriever::FailedFetch`] record.

pub mod config;
pub mod errors;
pub mod models;
pub mod retriever;
pub mod store;
pub mod validate;
