//! Result aggregation.
//!
//! Merges the partial results of one scan into a [`Report`]. Values that agree
//! after normalization share one entry with combined provenance; values that
//! disagree are kept as alternatives.

use crate::models::{
    clamp_confidence, Alternative, FieldValue, ModuleError, ModuleWarning, PartialResult, Query,
    Report, ReportField,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Build the report for a finished scan, stamped with the current time.
pub fn aggregate(query: &Query, results: Vec<PartialResult>, errors: Vec<ModuleError>) -> Report {
    aggregate_at(query, results, errors, Utc::now())
}

/// Build the report with a fixed timestamp.
///
/// The same multiset of results and errors always yields the same report.
pub fn aggregate_at(
    query: &Query,
    mut results: Vec<PartialResult>,
    mut errors: Vec<ModuleError>,
    generated_at: DateTime<Utc>,
) -> Report {
    results.sort_by(|a, b| a.module_name.cmp(&b.module_name));
    errors.sort_by(|a, b| {
        (&a.module_name, a.kind, &a.message).cmp(&(&b.module_name, b.kind, &b.message))
    });

    let eligible = results
        .iter()
        .map(|r| r.module_name.as_str())
        .chain(errors.iter().map(|e| e.module_name.as_str()))
        .collect::<BTreeSet<&str>>()
        .len();
    let succeeded: BTreeSet<String> = results.iter().map(|r| r.module_name.clone()).collect();

    let mut warnings: Vec<ModuleWarning> = results
        .iter()
        .flat_map(|r| {
            r.warnings.iter().map(|message| ModuleWarning {
                module: r.module_name.clone(),
                message: message.clone(),
            })
        })
        .collect();
    warnings.sort();

    let mut candidates: BTreeMap<&str, Vec<Candidate>> = BTreeMap::new();
    for result in &results {
        let confidence = clamp_confidence(result.confidence);
        for (name, value) in &result.fields {
            candidates.entry(name.as_str()).or_default().push(Candidate {
                key: normalize(value),
                value,
                confidence,
                module: &result.module_name,
            });
        }
    }

    let fields = candidates
        .into_iter()
        .filter_map(|(name, candidates)| Some((name.to_string(), merge(candidates)?)))
        .collect();

    Report::from_parts(
        query.clone(),
        generated_at,
        fields,
        errors,
        warnings,
        eligible,
        succeeded.into_iter().collect(),
    )
}

struct Candidate<'a> {
    key: ValueKey,
    value: &'a FieldValue,
    confidence: f64,
    module: &'a str,
}

struct Group {
    key: ValueKey,
    value: FieldValue,
    confidence: f64,
    provenance: BTreeSet<String>,
}

/// Candidates arrive in module order, so each group keeps the value
/// reported by its lexically-first module.
fn merge(candidates: Vec<Candidate<'_>>) -> Option<ReportField> {
    let mut groups: Vec<Group> = Vec::new();

    for candidate in candidates {
        match groups.iter_mut().find(|g| g.key == candidate.key) {
            Some(group) => {
                group.confidence = group.confidence.max(candidate.confidence);
                group.provenance.insert(candidate.module.to_string());
            }
            None => groups.push(Group {
                key: candidate.key,
                value: candidate.value.clone(),
                confidence: candidate.confidence,
                provenance: BTreeSet::from([candidate.module.to_string()]),
            }),
        }
    }

    // Highest confidence first; ties go to the lexically-first module
    groups.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.provenance.first().cmp(&b.provenance.first()))
    });

    let mut groups = groups.into_iter();
    let primary = groups.next()?;

    Some(ReportField {
        value: primary.value,
        confidence: primary.confidence,
        provenance: primary.provenance.into_iter().collect(),
        alternatives: groups
            .map(|g| Alternative {
                value: g.value,
                confidence: g.confidence,
                provenance: g.provenance.into_iter().collect(),
            })
            .collect(),
    })
}

/// Comparison key: values with equal keys are the same finding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ValueKey {
    Bool(bool),
    Number(String),
    Text(String),
    Coordinate(String, String),
    /// Sorted, so item order does not matter but multiplicity does.
    List(Vec<ValueKey>),
}

fn normalize(value: &FieldValue) -> ValueKey {
    match value {
        FieldValue::Bool(b) => ValueKey::Bool(*b),
        FieldValue::Number(n) => ValueKey::Number(format!("{:.6}", rounded(*n, 6))),
        FieldValue::Text(s) => ValueKey::Text(s.trim().to_lowercase()),
        FieldValue::Coordinate(c) => ValueKey::Coordinate(
            format!("{:.2}", rounded(c.lat, 2)),
            format!("{:.2}", rounded(c.lon, 2)),
        ),
        FieldValue::List(items) => {
            let mut keys: Vec<ValueKey> = items.iter().map(normalize).collect();
            keys.sort();
            ValueKey::List(keys)
        }
    }
}

/// Round to `places` decimals, folding negative zero into zero.
fn rounded(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale + 0.0
}

/// Number of report fields each module contributed to, as primary or alternative.
pub fn fields_per_module(report: &Report) -> BTreeMap<&str, usize> {
    let mut counts: BTreeMap<&str, usize> = report
        .succeeded_modules()
        .iter()
        .map(|m| (m.as_str(), 0))
        .collect();

    for field in report.fields().values() {
        let sources = field
            .provenance
            .iter()
            .chain(field.alternatives.iter().flat_map(|a| a.provenance.iter()));
        for module in sources {
            *counts.entry(module.as_str()).or_default() += 1;
        }
    }

    counts
}

/// Names of fields where providers disagreed.
pub fn conflicting_fields(report: &Report) -> Vec<&str> {
    report
        .fields()
        .iter()
        .filter(|(_, f)| f.has_conflict())
        .map(|(name, _)| name.as_str())
        .collect()
}
