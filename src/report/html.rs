//! Standalone HTML report. Display only.

use crate::models::{FieldValue, Report, ReportField};

pub fn render_html(report: &Report) -> String {
    let query = report.query();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>CKSearch Report - {title}</title>
    <style>
{css}
    </style>
</head>
<body>
    <div class="container">
        <header>
            <h1>{kind} scan: <code>{title}</code></h1>
            <p class="meta">Generated {generated}</p>
        </header>
{summary}
{findings}
{errors}
{warnings}
        <footer>Report generated by CKSearch</footer>
    </div>
</body>
</html>
"#,
        title = escape_html(query.value()),
        kind = query.query_type(),
        generated = report.generated_at().format("%Y-%m-%d %H:%M:%S UTC"),
        css = CSS,
        summary = summary_section(report),
        findings = findings_section(report),
        errors = errors_section(report),
        warnings = warnings_section(report),
    )
}

const CSS: &str = r#"        body { font-family: -apple-system, "Segoe UI", Roboto, sans-serif; background: #f4f5f7; color: #1f2933; margin: 0; }
        .container { max-width: 1100px; margin: 0 auto; padding: 24px; }
        h1 { font-size: 1.6rem; }
        .meta { color: #616e7c; }
        .summary { display: flex; gap: 16px; margin: 16px 0; }
        .card { background: #fff; border-radius: 8px; padding: 12px 18px; box-shadow: 0 1px 3px rgba(0,0,0,.1); }
        .status-completed { color: #2f9e44; }
        .status-partiallyCompleted { color: #e67700; }
        .status-failed { color: #c92a2a; }
        table { width: 100%; border-collapse: collapse; background: #fff; margin-bottom: 24px; }
        th, td { text-align: left; padding: 8px 10px; border-bottom: 1px solid #e4e7eb; vertical-align: top; }
        th { background: #323f4b; color: #fff; }
        ul.values { margin: 0; padding-left: 18px; }
        .alt { color: #7b8794; font-size: .9em; }
        footer { color: #9aa5b1; font-size: .85em; margin-top: 32px; }"#;

fn summary_section(report: &Report) -> String {
    let status_class = match report.status() {
        crate::models::ScanStatus::Completed => "completed",
        crate::models::ScanStatus::PartiallyCompleted => "partiallyCompleted",
        crate::models::ScanStatus::Failed => "failed",
    };

    format!(
        r#"        <section class="summary">
            <div class="card"><strong>Status</strong><br><span class="status-{}">{}</span></div>
            <div class="card"><strong>Modules</strong><br>{}/{} succeeded</div>
            <div class="card"><strong>Completeness</strong><br>{:.0}%</div>
        </section>"#,
        status_class,
        report.status(),
        report.succeeded_modules().len(),
        report.eligible_modules(),
        report.completeness() * 100.0
    )
}

fn findings_section(report: &Report) -> String {
    if report.fields().is_empty() {
        return "        <h2>Findings</h2>\n        <p>No findings.</p>".to_string();
    }

    let rows: String = report
        .fields()
        .iter()
        .map(|(name, field)| field_row(name, field))
        .collect();

    format!(
        "        <h2>Findings</h2>\n        <table>\n            <tr><th>Field</th><th>Value</th><th>Confidence</th><th>Sources</th></tr>\n{}        </table>",
        rows
    )
}

fn field_row(name: &str, field: &ReportField) -> String {
    let mut value = render_value(&field.value);
    for alt in &field.alternatives {
        value.push_str(&format!(
            r#"<div class="alt">also: {} ({:.2}, {})</div>"#,
            render_value(&alt.value),
            alt.confidence,
            escape_html(&alt.provenance.join(", "))
        ));
    }

    format!(
        "            <tr><td><code>{}</code></td><td>{}</td><td>{:.2}</td><td>{}</td></tr>\n",
        escape_html(name),
        value,
        field.confidence,
        escape_html(&field.provenance.join(", "))
    )
}

fn render_value(value: &FieldValue) -> String {
    match value {
        FieldValue::List(items) => {
            let items: String = items
                .iter()
                .map(|item| format!("<li>{}</li>", escape_html(&item.to_string())))
                .collect();
            format!(r#"<ul class="values">{}</ul>"#, items)
        }
        other => escape_html(&other.to_string()),
    }
}

fn errors_section(report: &Report) -> String {
    if report.module_errors().is_empty() {
        return String::new();
    }

    let rows: String = report
        .module_errors()
        .iter()
        .map(|e| {
            format!(
                "            <tr><td><code>{}</code></td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape_html(&e.module_name),
                e.kind,
                if e.retryable { "yes" } else { "no" },
                escape_html(&e.message)
            )
        })
        .collect();

    format!(
        "        <h2>Module Errors</h2>\n        <table>\n            <tr><th>Module</th><th>Kind</th><th>Retryable</th><th>Message</th></tr>\n{}        </table>",
        rows
    )
}

fn warnings_section(report: &Report) -> String {
    if report.warnings().is_empty() {
        return String::new();
    }

    let items: String = report
        .warnings()
        .iter()
        .map(|w| {
            format!(
                "            <li><code>{}</code>: {}</li>\n",
                escape_html(&w.module),
                escape_html(&w.message)
            )
        })
        .collect();

    format!("        <h2>Warnings</h2>\n        <ul>\n{}        </ul>", items)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::sample_report;

    #[test]
    fn test_render_html() {
        let html = render_html(&sample_report());

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>CKSearch Report - 8.8.8.8</title>"));
        assert!(html.contains(r#"class="status-partiallyCompleted""#));
        assert!(html.contains("<li>443</li>"));
        assert!(html.contains("also: 37.38600, -122.08380"));
        assert!(html.contains("<h2>Module Errors</h2>"));
    }

    #[test]
    fn test_values_are_escaped() {
        let html = render_html(&sample_report());

        assert!(html.contains("Google LLC &lt;AS15169&gt;"));
        assert!(!html.contains("<AS15169>"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }
}
