//! Result collection and aggregation.
//!
//! The collector turns the raw per-test files left by the runners into a
//! single collected-results document, the matrix builder aggregates metrics
//! into region-pair matrices, and the summary/format stages render the CSV,
//! JSON and Markdown artifacts.

pub mod format;
pub mod matrix;
pub mod results;
pub mod summary;
