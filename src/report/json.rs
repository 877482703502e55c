//! JSON export.

use crate::models::Report;
use anyhow::{Context, Result};

/// Pretty-printed camelCase JSON.
pub fn render_json(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to encode report as JSON")
}

/// Decode a JSON report.
///
/// Rejects fields without provenance and recomputes `completeness` and
/// `status` from the module counts.
pub fn decode_json(input: &str) -> Result<Report> {
    serde_json::from_str(input).context("Failed to decode JSON report")
}
