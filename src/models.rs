//! Data models for the scan engine.
//!
//! This module contains the query a caller submits, the partial findings and
//! errors each module produces, and the merged report every exporter reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The kind of target a scan investigates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Phone,
    Username,
    Email,
    Domain,
    Ip,
    Person,
    Image,
    Social,
    Geo,
}

impl QueryType {
    /// Every query type, in declaration order.
    pub const ALL: [QueryType; 9] = [
        QueryType::Phone,
        QueryType::Username,
        QueryType::Email,
        QueryType::Domain,
        QueryType::Ip,
        QueryType::Person,
        QueryType::Image,
        QueryType::Social,
        QueryType::Geo,
    ];

    /// Lowercase identifier, used in file names and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Phone => "phone",
            QueryType::Username => "username",
            QueryType::Email => "email",
            QueryType::Domain => "domain",
            QueryType::Ip => "ip",
            QueryType::Person => "person",
            QueryType::Image => "image",
            QueryType::Social => "social",
            QueryType::Geo => "geo",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Phone => write!(f, "Phone"),
            QueryType::Username => write!(f, "Username"),
            QueryType::Email => write!(f, "Email"),
            QueryType::Domain => write!(f, "Domain"),
            QueryType::Ip => write!(f, "IP"),
            QueryType::Person => write!(f, "Person"),
            QueryType::Image => write!(f, "Image"),
            QueryType::Social => write!(f, "Social"),
            QueryType::Geo => write!(f, "Geolocation"),
        }
    }
}

/// Errors raised while building a query from user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("{0} target must not be empty")]
    EmptyTarget(QueryType),
}

/// A scan request. Immutable once handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "type")]
    query_type: QueryType,
    value: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, String>,
}

impl Query {
    /// Create a query, trimming the target value.
    pub fn new(query_type: QueryType, value: impl Into<String>) -> Result<Self, QueryError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(QueryError::EmptyTarget(query_type));
        }

        Ok(Self {
            query_type,
            value,
            options: BTreeMap::new(),
        })
    }

    /// Attach a recognized option. Only used while the query is being built.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Attach a boolean flag; `false` leaves the query untouched.
    pub fn with_flag(self, key: &str, enabled: bool) -> Self {
        if enabled {
            self.with_option(key, "true")
        } else {
            self
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// True when the option is present and set to a truthy value.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.option(key), Some("true" | "1" | "yes"))
    }
}

/// A geographic coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Returns `None` when either component is out of range.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            Some(Self { lat, lon })
        } else {
            None
        }
    }

    /// Parse the `"lat,lon"` form most providers use.
    pub fn parse_pair(text: &str) -> Option<Self> {
        let (lat, lon) = text.split_once(',')?;
        Self::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}, {:.5}", self.lat, self.lon)
    }
}

/// A typed field value reported by a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Coordinate(Coordinate),
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Build a list of text values.
    pub fn texts<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldValue::List(items.into_iter().map(|s| FieldValue::Text(s.into())).collect())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", if *b { "yes" } else { "no" }),
            FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Coordinate(c) => write!(f, "{}", c),
            FieldValue::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<Coordinate> for FieldValue {
    fn from(value: Coordinate) -> Self {
        FieldValue::Coordinate(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::texts(value)
    }
}

/// Findings of one module invocation, before merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResult {
    pub module_name: String,
    pub fields: BTreeMap<String, FieldValue>,
    /// How much the module trusts its own findings (0.0 - 1.0).
    pub confidence: f64,
    pub source_latency_ms: u64,
    pub warnings: Vec<String>,
}

impl PartialResult {
    /// Creates an empty result; confidence is clamped to `[0, 1]`.
    pub fn new(module_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            module_name: module_name.into(),
            fields: BTreeMap::new(),
            confidence: clamp_confidence(confidence),
            source_latency_ms: 0,
            warnings: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Set the field only when a value is present.
    pub fn set_opt<V: Into<FieldValue>>(&mut self, name: &str, value: Option<V>) {
        if let Some(value) = value {
            self.set(name, value);
        }
    }

    /// Set a text field, skipping empty strings.
    pub fn set_text(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.set(name, value);
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Clamp to `[0, 1]`, treating NaN as no confidence at all.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Classification of a module failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Timeout,
    RateLimited,
    ProviderUnavailable,
    InvalidTarget,
    AuthFailure,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::RateLimited => write!(f, "Rate Limited"),
            ErrorKind::ProviderUnavailable => write!(f, "Provider Unavailable"),
            ErrorKind::InvalidTarget => write!(f, "Invalid Target"),
            ErrorKind::AuthFailure => write!(f, "Auth Failure"),
            ErrorKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A failed module invocation.
///
/// `retryable` is decided where the failure is observed; the orchestrator
/// only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleError {
    #[serde(rename = "module")]
    pub module_name: String,
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ModuleError {
    pub fn new(
        module_name: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn timeout(module_name: impl Into<String>, after: Duration) -> Self {
        Self::new(
            module_name,
            ErrorKind::Timeout,
            format!("no result within {:.1}s", after.as_secs_f64()),
            true,
        )
    }

    pub fn rate_limited(module_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(module_name, ErrorKind::RateLimited, message, true)
    }

    pub fn unavailable(module_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(module_name, ErrorKind::ProviderUnavailable, message, true)
    }

    /// Anonymity was requested but the call cannot be anonymized.
    pub fn anonymity_refused(module_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(module_name, ErrorKind::ProviderUnavailable, message, false)
    }

    pub fn invalid_target(module_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(module_name, ErrorKind::InvalidTarget, message, false)
    }

    pub fn auth_failure(module_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(module_name, ErrorKind::AuthFailure, message, false)
    }

    pub fn unknown(module_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(module_name, ErrorKind::Unknown, message, false)
    }

    /// The module stopped because the scan was cancelled.
    pub fn cancelled(module_name: impl Into<String>) -> Self {
        Self::unknown(module_name, "scan cancelled")
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.module_name, self.kind, self.message)
    }
}

impl std::error::Error for ModuleError {}

/// A non-fatal note a module attached to its result.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleWarning {
    pub module: String,
    pub message: String,
}

/// Terminal outcome of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanStatus {
    Completed,
    PartiallyCompleted,
    Failed,
}

impl ScanStatus {
    /// Derive the outcome from how many eligible modules succeeded.
    pub fn from_counts(succeeded: usize, eligible: usize) -> Self {
        if eligible > 0 && succeeded == eligible {
            ScanStatus::Completed
        } else if succeeded > 0 {
            ScanStatus::PartiallyCompleted
        } else {
            ScanStatus::Failed
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            ScanStatus::Completed => "✅",
            ScanStatus::PartiallyCompleted => "⚠️",
            ScanStatus::Failed => "❌",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Completed => write!(f, "Completed"),
            ScanStatus::PartiallyCompleted => write!(f, "Partially Completed"),
            ScanStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// A value that lost the precedence contest but is kept with its sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub value: FieldValue,
    pub confidence: f64,
    pub provenance: Vec<String>,
}

/// A merged report field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportField {
    pub value: FieldValue,
    pub confidence: f64,
    /// Modules that reported `value`, in lexical order.
    pub provenance: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

impl ReportField {
    pub fn has_conflict(&self) -> bool {
        !self.alternatives.is_empty()
    }
}

/// Errors raised when a decoded report breaks a report invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportDecodeError {
    #[error("field '{0}' has no provenance")]
    MissingProvenance(String),
    #[error("{succeeded} succeeded modules exceed {eligible} eligible modules")]
    CountMismatch { succeeded: usize, eligible: usize },
}

/// The merged result of one scan.
///
/// Built once by the aggregator and only read afterwards. `completeness` and
/// `status` are derived from the module counts and recomputed on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ReportDocument")]
pub struct Report {
    query: Query,
    generated_at: DateTime<Utc>,
    status: ScanStatus,
    fields: BTreeMap<String, ReportField>,
    module_errors: Vec<ModuleError>,
    warnings: Vec<ModuleWarning>,
    eligible_modules: usize,
    succeeded_modules: Vec<String>,
    completeness: f64,
}

impl Report {
    /// Assemble a report from already-merged parts.
    pub fn from_parts(
        query: Query,
        generated_at: DateTime<Utc>,
        fields: BTreeMap<String, ReportField>,
        module_errors: Vec<ModuleError>,
        warnings: Vec<ModuleWarning>,
        eligible_modules: usize,
        succeeded_modules: Vec<String>,
    ) -> Self {
        let succeeded = succeeded_modules.len();
        Self {
            query,
            generated_at,
            status: ScanStatus::from_counts(succeeded, eligible_modules),
            fields,
            module_errors,
            warnings,
            eligible_modules,
            succeeded_modules,
            completeness: completeness(succeeded, eligible_modules),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn fields(&self) -> &BTreeMap<String, ReportField> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ReportField> {
        self.fields.get(name)
    }

    pub fn module_errors(&self) -> &[ModuleError] {
        &self.module_errors
    }

    pub fn warnings(&self) -> &[ModuleWarning] {
        &self.warnings
    }

    pub fn eligible_modules(&self) -> usize {
        self.eligible_modules
    }

    pub fn succeeded_modules(&self) -> &[String] {
        &self.succeeded_modules
    }

    /// Fraction of eligible modules that returned a result.
    pub fn completeness(&self) -> f64 {
        self.completeness
    }
}

/// Fraction of eligible modules that succeeded; zero when nothing was eligible.
pub fn completeness(succeeded: usize, eligible: usize) -> f64 {
    if eligible == 0 {
        0.0
    } else {
        succeeded as f64 / eligible as f64
    }
}

/// Wire form of a report. Derived values are ignored and recomputed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportDocument {
    query: Query,
    generated_at: DateTime<Utc>,
    #[serde(default)]
    fields: BTreeMap<String, ReportField>,
    #[serde(default)]
    module_errors: Vec<ModuleError>,
    #[serde(default)]
    warnings: Vec<ModuleWarning>,
    eligible_modules: usize,
    #[serde(default)]
    succeeded_modules: Vec<String>,
}

impl TryFrom<ReportDocument> for Report {
    type Error = ReportDecodeError;

    fn try_from(doc: ReportDocument) -> Result<Self, Self::Error> {
        if let Some((name, _)) = doc.fields.iter().find(|(_, f)| f.provenance.is_empty()) {
            return Err(ReportDecodeError::MissingProvenance(name.clone()));
        }

        if doc.succeeded_modules.len() > doc.eligible_modules {
            return Err(ReportDecodeError::CountMismatch {
                succeeded: doc.succeeded_modules.len(),
                eligible: doc.eligible_modules,
            });
        }

        Ok(Report::from_parts(
            doc.query,
            doc.generated_at,
            doc.fields,
            doc.module_errors,
            doc.warnings,
            doc.eligible_modules,
            doc.succeeded_modules,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_rejects_empty_target() {
        assert_eq!(
            Query::new(QueryType::Email, "   "),
            Err(QueryError::EmptyTarget(QueryType::Email))
        );

        let query = Query::new(QueryType::Email, "  test@example.com ").unwrap();
        assert_eq!(query.value(), "test@example.com");
    }

    #[test]
    fn test_query_flags() {
        let query = Query::new(QueryType::Ip, "8.8.8.8")
            .unwrap()
            .with_flag("deep", true)
            .with_flag("active", false)
            .with_option("location", "Jakarta");

        assert!(query.flag("deep"));
        assert!(!query.flag("active"));
        assert_eq!(query.option("location"), Some("Jakarta"));
        assert_eq!(query.options().len(), 2);
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(PartialResult::new("m", 1.7).confidence, 1.0);
        assert_eq!(PartialResult::new("m", -0.2).confidence, 0.0);
        assert_eq!(PartialResult::new("m", f64::NAN).confidence, 0.0);
        assert_eq!(PartialResult::new("m", 0.42).confidence, 0.42);
    }

    #[test]
    fn test_completeness_for_every_combination() {
        for eligible in 0..=6 {
            for succeeded in 0..=eligible {
                let expected = if eligible == 0 {
                    0.0
                } else {
                    succeeded as f64 / eligible as f64
                };
                assert_eq!(completeness(succeeded, eligible), expected);
            }
        }
    }

    #[test]
    fn test_status_from_counts() {
        assert_eq!(ScanStatus::from_counts(3, 3), ScanStatus::Completed);
        assert_eq!(ScanStatus::from_counts(1, 3), ScanStatus::PartiallyCompleted);
        assert_eq!(ScanStatus::from_counts(0, 3), ScanStatus::Failed);
        assert_eq!(ScanStatus::from_counts(0, 0), ScanStatus::Failed);
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::from(true).to_string(), "yes");
        assert_eq!(FieldValue::from(42usize).to_string(), "42");
        assert_eq!(FieldValue::from(0.5).to_string(), "0.5");
        assert_eq!(
            FieldValue::texts(["a", "b"]).to_string(),
            "a, b"
        );
        assert_eq!(
            FieldValue::from(Coordinate { lat: -6.2, lon: 106.8 }).to_string(),
            "-6.20000, 106.80000"
        );
    }

    #[test]
    fn test_coordinate_parse_pair() {
        assert_eq!(
            Coordinate::parse_pair("37.4056,-122.0775"),
            Some(Coordinate { lat: 37.4056, lon: -122.0775 })
        );
        assert_eq!(Coordinate::parse_pair("91,0"), None);
        assert_eq!(Coordinate::parse_pair("nope"), None);
    }

    #[test]
    fn test_decode_rejects_field_without_provenance() {
        let json = r#"{
            "query": {"type": "email", "value": "a@b.co"},
            "generatedAt": "2024-05-01T10:00:00Z",
            "fields": {"breached": {"value": true, "confidence": 0.9, "provenance": []}},
            "moduleErrors": [],
            "warnings": [],
            "eligibleModules": 1,
            "succeededModules": ["email_breach"],
            "completeness": 1.0
        }"#;

        let err = serde_json::from_str::<Report>(json).unwrap_err();
        assert!(err.to_string().contains("no provenance"));
    }

    #[test]
    fn test_decode_recomputes_completeness() {
        let json = r#"{
            "query": {"type": "email", "value": "a@b.co"},
            "generatedAt": "2024-05-01T10:00:00Z",
            "status": "completed",
            "fields": {},
            "eligibleModules": 4,
            "succeededModules": ["email_breach"],
            "completeness": 1.0
        }"#;

        let report: Report = serde_json::from_str(json).unwrap();
        assert_eq!(report.completeness(), 0.25);
        assert_eq!(report.status(), ScanStatus::PartiallyCompleted);
    }
}
