//! Console summary, printed to stdout after a scan.

use crate::analysis::conflicting_fields;
use crate::models::{FieldValue, Report, ReportField};

pub fn render_console(report: &Report) -> String {
    let mut out = String::new();
    let query = report.query();

    out.push_str(&format!(
        "\n🔎 {} scan: {}\n",
        query.query_type(),
        query.value()
    ));
    out.push_str(&format!(
        "   Status: {} {}\n",
        report.status().emoji(),
        report.status()
    ));
    out.push_str(&format!(
        "   Modules: {}/{} succeeded ({:.0}% complete)\n",
        report.succeeded_modules().len(),
        report.eligible_modules(),
        report.completeness() * 100.0
    ));
    out.push_str(&format!(
        "   Generated: {}\n",
        report.generated_at().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if report.fields().is_empty() {
        out.push_str("\n   No findings.\n");
    } else {
        out.push_str("\n📊 Findings:\n");
        for (name, field) in report.fields() {
            out.push_str(&field_line(name, field));
        }
    }

    let conflicts = conflicting_fields(report);
    if !conflicts.is_empty() {
        out.push_str(&format!(
            "\n⚖️  Providers disagreed on: {}\n",
            conflicts.join(", ")
        ));
    }

    if !report.module_errors().is_empty() {
        out.push_str("\n❌ Module errors:\n");
        for error in report.module_errors() {
            out.push_str(&format!(
                "   {} [{}]: {}{}\n",
                error.module_name,
                error.kind,
                error.message,
                if error.retryable { " (retryable)" } else { "" }
            ));
        }
    }

    if !report.warnings().is_empty() {
        out.push_str("\n⚠️  Warnings:\n");
        for warning in report.warnings() {
            out.push_str(&format!("   {}: {}\n", warning.module, warning.message));
        }
    }

    out
}

fn field_line(name: &str, field: &ReportField) -> String {
    let mut line = match &field.value {
        FieldValue::List(items) if !items.is_empty() => {
            let mut block = format!(
                "   {} ({:.2}, {}):\n",
                name,
                field.confidence,
                field.provenance.join(", ")
            );
            for item in items {
                block.push_str(&format!("     - {}\n", item));
            }
            block
        }
        value => format!(
            "   {}: {} ({:.2}, {})\n",
            name,
            value,
            field.confidence,
            field.provenance.join(", ")
        ),
    };

    for alt in &field.alternatives {
        line.push_str(&format!(
            "     ↳ {} ({:.2}, {})\n",
            alt.value,
            alt.confidence,
            alt.provenance.join(", ")
        ));
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::sample_report;

    #[test]
    fn test_console_summary() {
        let out = render_console(&sample_report());

        assert!(out.contains("IP scan: 8.8.8.8"));
        assert!(out.contains("Partially Completed"));
        assert!(out.contains("2/3 succeeded (67% complete)"));
        assert!(out.contains("city: Mountain View (0.85, ip_api, ipinfo)"));
        assert!(out.contains("↳ 37.38600, -122.08380 (0.80, ip_api)"));
        assert!(out.contains("     - 53\n"));
        assert!(out.contains("port_scan [Timeout]"));
        assert!(out.contains("ip_api: reverse DNS unavailable"));
    }
}
