//! Markdown report generation.

use crate::analysis::{conflicting_fields, fields_per_module};
use crate::models::{FieldValue, ModuleError, ModuleWarning, Report, ReportField};
use std::collections::BTreeMap;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    // Title
    output.push_str(&format!(
        "# CKSearch Report: {} `{}`\n\n",
        report.query().query_type(),
        report.query().value()
    ));

    output.push_str(&generate_metadata_section(report));
    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_findings_section(report.fields()));
    output.push_str(&generate_conflicts_section(report));
    output.push_str(&generate_errors_section(report.module_errors()));
    output.push_str(&generate_warnings_section(report.warnings()));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Target:** `{}`\n",
        report.query().value()
    ));
    section.push_str(&format!("- **Type:** {}\n", report.query().query_type()));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at().format("%Y-%m-%d %H:%M:%S UTC")
    ));
    for (key, value) in report.query().options() {
        section.push_str(&format!("- **Option `{}`:** {}\n", key, value));
    }
    section.push('\n');

    section
}

fn generate_summary_section(report: &Report) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Status | Succeeded | Eligible | Completeness |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} {} | {} | {} | {:.0}% |\n\n",
        report.status().emoji(),
        report.status(),
        report.succeeded_modules().len(),
        report.eligible_modules(),
        report.completeness() * 100.0
    ));

    let per_module = fields_per_module(report);
    if !per_module.is_empty() {
        section.push_str("### Fields by Module\n\n");
        section.push_str("| Module | Fields |\n");
        section.push_str("|:---|:---:|\n");
        for (module, count) in per_module {
            section.push_str(&format!("| `{}` | {} |\n", module, count));
        }
        section.push('\n');
    }

    section
}

fn generate_findings_section(fields: &BTreeMap<String, ReportField>) -> String {
    let mut section = String::new();

    section.push_str("## Findings\n\n");

    if fields.is_empty() {
        section.push_str("No findings.\n\n");
        return section;
    }

    section.push_str("| Field | Value | Confidence | Sources |\n");
    section.push_str("|:---|:---|:---:|:---|\n");
    for (name, field) in fields {
        section.push_str(&format!(
            "| `{}` | {} | {:.2} | {} |\n",
            name,
            cell(&field.value),
            field.confidence,
            field.provenance.join(", ")
        ));
    }
    section.push('\n');

    section
}

fn generate_conflicts_section(report: &Report) -> String {
    let conflicts = conflicting_fields(report);
    if conflicts.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Conflicting Values\n\n");

    for name in conflicts {
        let Some(field) = report.field(name) else {
            continue;
        };
        section.push_str(&format!("### `{}`\n\n", name));
        section.push_str(&format!(
            "- **{}** ({:.2}, {}) *primary*\n",
            cell(&field.value),
            field.confidence,
            field.provenance.join(", ")
        ));
        for alt in &field.alternatives {
            section.push_str(&format!(
                "- {} ({:.2}, {})\n",
                cell(&alt.value),
                alt.confidence,
                alt.provenance.join(", ")
            ));
        }
        section.push('\n');
    }

    section
}

fn generate_errors_section(errors: &[ModuleError]) -> String {
    if errors.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Module Errors\n\n");
    section.push_str("| Module | Kind | Retryable | Message |\n");
    section.push_str("|:---|:---|:---:|:---|\n");
    for error in errors {
        section.push_str(&format!(
            "| `{}` | {} | {} | {} |\n",
            error.module_name,
            error.kind,
            if error.retryable { "yes" } else { "no" },
            escape_cell(&error.message)
        ));
    }
    section.push('\n');

    section
}

fn generate_warnings_section(warnings: &[ModuleWarning]) -> String {
    if warnings.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Warnings\n\n");
    for warning in warnings {
        section.push_str(&format!("- `{}`: {}\n", warning.module, warning.message));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    "---\n\n*Report generated by CKSearch*\n".to_string()
}

/// Lists render one item per line inside the table cell.
fn cell(value: &FieldValue) -> String {
    match value {
        FieldValue::List(items) => items
            .iter()
            .map(|item| escape_cell(&item.to_string()))
            .collect::<Vec<_>>()
            .join("<br>"),
        other => escape_cell(&other.to_string()),
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::sample_report;

    #[test]
    fn test_generate_markdown_report() {
        let markdown = generate_markdown_report(&sample_report());

        assert!(markdown.starts_with("# CKSearch Report: IP `8.8.8.8`"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("- **Option `deep`:** true"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("| `ipinfo` | 5 |"));
        assert!(markdown.contains("| `ports` | 53<br>443 | 0.85 | ipinfo |"));
        assert!(markdown.contains("## Conflicting Values"));
        assert!(markdown.contains("### `location`"));
        assert!(markdown.contains("| `port_scan` | Timeout | yes |"));
        assert!(markdown.contains("## Warnings"));
    }

    #[test]
    fn test_escape_cell() {
        assert_eq!(escape_cell("a|b\nc"), "a\\|b c");
    }

    #[test]
    fn test_empty_sections_omitted() {
        let section = generate_errors_section(&[]);
        assert!(section.is_empty());
        assert!(generate_findings_section(&BTreeMap::new()).contains("No findings."));
    }
}
