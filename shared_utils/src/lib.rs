//! Cross-crate helpers shared by the retrieval and storage layers.

pub mod calendar;
pub mod env;
pub mod retry;
