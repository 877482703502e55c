//! Analysis of scan outcomes.
//!
//! The aggregator turns per-module results into the final report.

pub mod aggregator;

pub use aggregator::*;
