//! Result staging and aggregation
//!
//! Per-device artifacts are staged under unique names while suites run, then
//! merged into one report once every suite has finished.

mod aggregate;
mod staging;
mod summary;

pub use aggregate::{AggregateReport, Aggregator};
pub use staging::{ArtifactState, StagingArea};
pub use summary::RunSummary;
