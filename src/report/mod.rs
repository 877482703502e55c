//! Report output.
//!
//! One encoder per output format. Every encoder is a pure function of the
//! [`Report`]; JSON and CSV can be decoded back.

pub mod console;
pub mod csv;
pub mod html;
pub mod json;
pub mod markdown;

use crate::models::Report;
use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Human-readable summary on stdout.
    Console,
    Json,
    #[value(alias = "md")]
    Markdown,
    Html,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Console => "txt",
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
            ExportFormat::Html => "html",
            ExportFormat::Csv => "csv",
        }
    }

    /// Console output goes to stdout; everything else is written to a file.
    pub fn writes_file(&self) -> bool {
        !matches!(self, ExportFormat::Console)
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Console => write!(f, "console"),
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Markdown => write!(f, "markdown"),
            ExportFormat::Html => write!(f, "html"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Encode a report in the given format.
pub fn render(report: &Report, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Console => Ok(console::render_console(report)),
        ExportFormat::Json => json::render_json(report),
        ExportFormat::Markdown => Ok(markdown::generate_markdown_report(report)),
        ExportFormat::Html => Ok(html::render_html(report)),
        ExportFormat::Csv => csv::render_csv(report),
    }
}

/// `<type>_<YYYYMMDD_HHMMSS>.<ext>`, stamped with the report time.
pub fn output_filename(report: &Report, format: ExportFormat) -> String {
    format!(
        "{}_{}.{}",
        report.query().query_type().as_str(),
        report.generated_at().format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Render the report and write it into `dir`, creating the directory if needed.
pub fn write_report(report: &Report, format: ExportFormat, dir: &Path) -> Result<PathBuf> {
    let content = render(report, format)?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

    let path = dir.join(output_filename(report, format));
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;

    info!("Wrote {} report to {}", format, path.display());
    Ok(path)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::analysis::aggregate_at;
    use crate::models::{Coordinate, FieldValue, ModuleError, PartialResult, Query, QueryType, Report};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    /// An IP report with a conflict, an error and a warning.
    pub fn sample_report() -> Report {
        let query = Query::new(QueryType::Ip, "8.8.8.8")
            .unwrap()
            .with_flag("deep", true);

        let mut ip_api = PartialResult::new("ip_api", 0.8)
            .with_field("city", "Mountain View")
            .with_field("location", Coordinate { lat: 37.386, lon: -122.0838 })
            .with_field("org", "Google LLC <AS15169>");
        ip_api.warn("reverse DNS unavailable");

        let ipinfo = PartialResult::new("ipinfo", 0.85)
            .with_field("city", "mountain view")
            .with_field("location", Coordinate { lat: 37.4056, lon: -122.0775 })
            .with_field("open", FieldValue::Bool(false))
            .with_field("ports", FieldValue::texts(["53", "443"]))
            .with_field("asn", 15169u64);

        aggregate_at(
            &query,
            vec![ip_api, ipinfo],
            vec![ModuleError::timeout("port_scan", Duration::from_secs(30))],
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixtures::sample_report;

    #[test]
    fn test_output_filename() {
        let report = sample_report();
        assert_eq!(output_filename(&report, ExportFormat::Json), "ip_20240501_123005.json");
        assert_eq!(output_filename(&report, ExportFormat::Markdown), "ip_20240501_123005.md");
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");

        let path = write_report(&sample_report(), ExportFormat::Html, &out).unwrap();

        assert_eq!(path, out.join("ip_20240501_123005.html"));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn test_format_names() {
        assert_eq!(ExportFormat::from_str("md", true).unwrap(), ExportFormat::Markdown);
        assert_eq!(ExportFormat::Csv.to_string(), "csv");
        assert!(!ExportFormat::Console.writes_file());
    }
}
