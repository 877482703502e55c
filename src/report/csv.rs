//! CSV export: one row per report field.
//!
//! `value` and `alternatives` hold JSON text, `provenance` holds module
//! names separated by `;`.

use crate::models::Report;
use anyhow::{Context, Result};
use csv::Writer;

const HEADER: [&str; 5] = ["name", "value", "confidence", "provenance", "alternatives"];

pub fn render_csv(report: &Report) -> Result<String> {
    let mut wtr = Writer::from_writer(vec![]);

    wtr.write_record(HEADER)?;

    for (name, field) in report.fields() {
        let value = serde_json::to_string(&field.value)?;
        let alternatives = serde_json::to_string(&field.alternatives)?;

        wtr.write_record(&[
            name.clone(),
            value,
            field.confidence.to_string(),
            field.provenance.join(";"),
            alternatives,
        ])?;
    }

    let data = wtr.into_inner().context("Failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not UTF-8")
}

/// Rebuild the field mapping from CSV produced by [`render_csv`].
#[cfg(test)]
pub fn decode_csv(
    input: &str,
) -> Result<std::collections::BTreeMap<String, crate::models::ReportField>> {
    use crate::models::{Alternative, FieldValue, ReportField};
    use anyhow::bail;
    use csv::ReaderBuilder;
    use std::collections::BTreeMap;

    let mut rdr = ReaderBuilder::new().from_reader(input.as_bytes());

    let headers = rdr.headers()?.clone();
    if headers.iter().ne(HEADER) {
        bail!("Unexpected CSV header: {:?}", headers);
    }

    let mut fields = BTreeMap::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Malformed CSV row {}", line + 1))?;
        let name = record[0].to_string();

        let value: FieldValue = serde_json::from_str(&record[1])
            .with_context(|| format!("Invalid value for field '{}'", name))?;
        let confidence: f64 = record[2]
            .parse()
            .with_context(|| format!("Invalid confidence for field '{}'", name))?;
        let provenance: Vec<String> = record[3]
            .split(';')
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        if provenance.is_empty() {
            bail!("Field '{}' has no provenance", name);
        }
        let alternatives: Vec<Alternative> = serde_json::from_str(&record[4])
            .with_context(|| format!("Invalid alternatives for field '{}'", name))?;

        fields.insert(
            name,
            ReportField {
                value,
                confidence,
                provenance,
                alternatives,
            },
        );
    }

    Ok(fields)
}
