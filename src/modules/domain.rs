//! Domain intelligence: DNS records, HTTP posture and reputation.

use crate::models::{ErrorKind, FieldValue, ModuleError, PartialResult, Query, QueryType};
use crate::modules::dns::{self, normalize_domain, RecordType};
use crate::modules::{Module, ScanContext};
use crate::net::{ProviderRequest, ProviderResponse};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

const SECURITY_HEADERS: &[&str] = &[
    "strict-transport-security",
    "content-security-policy",
    "x-frame-options",
    "x-content-type-options",
    "referrer-policy",
    "permissions-policy",
];

fn domain_or_reject(module: &str, query: &Query) -> Result<String, ModuleError> {
    normalize_domain(query.value())
        .ok_or_else(|| ModuleError::invalid_target(module, "not a valid domain name"))
}

/// A, AAAA, MX, NS and TXT records plus mail-auth posture.
pub struct DomainDnsModule;

#[async_trait]
impl Module for DomainDnsModule {
    fn name(&self) -> &'static str {
        "domain_dns"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Domain]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let domain = domain_or_reject(self.name(), query)?;
        let record_types = [
            ("dns.a", RecordType::A),
            ("dns.aaaa", RecordType::Aaaa),
            ("dns.mx", RecordType::Mx),
            ("dns.ns", RecordType::Ns),
            ("dns.txt", RecordType::Txt),
        ];

        let mut result = PartialResult::new(self.name(), 0.95).with_field("domain", domain.clone());
        let mut records: BTreeMap<&str, Vec<String>> = BTreeMap::new();

        for (field, record_type) in record_types {
            let mut values = dns::resolve(ctx, self.name(), &domain, record_type).await?;
            values.sort();
            records.insert(field, values);
        }

        if records.values().all(Vec::is_empty) {
            return Err(ModuleError::invalid_target(
                self.name(),
                format!("{} does not resolve", domain),
            ));
        }

        let has_spf = records["dns.txt"].iter().any(|t| t.starts_with("v=spf1"));
        let dmarc = dns::resolve(ctx, self.name(), &format!("_dmarc.{}", domain), RecordType::Txt).await?;
        let has_dmarc = dmarc.iter().any(|t| t.starts_with("v=DMARC1"));

        for (field, values) in records {
            if !values.is_empty() {
                result.set(field, values);
            }
        }
        result.set("dns.spf", has_spf);
        result.set("dns.dmarc", has_dmarc);
        if !has_spf || !has_dmarc {
            result.warn("mail authentication incomplete (SPF/DMARC)");
        }

        Ok(result)
    }
}

/// Detect technologies from response headers and body markers.
pub fn detect_technologies(response: &ProviderResponse) -> Vec<String> {
    let mut found = Vec::new();
    let server = response.header("server").unwrap_or_default().to_ascii_lowercase();
    let powered_by = response.header("x-powered-by").unwrap_or_default().to_ascii_lowercase();
    let body = response.text();

    let checks: [(&str, bool); 10] = [
        ("nginx", server.contains("nginx")),
        ("Apache", server.contains("apache")),
        ("Cloudflare", server.contains("cloudflare") || response.header("cf-ray").is_some()),
        ("Microsoft IIS", server.contains("iis")),
        ("PHP", powered_by.contains("php")),
        ("Express", powered_by.contains("express")),
        ("ASP.NET", powered_by.contains("asp.net")),
        ("WordPress", body.contains("wp-content")),
        ("Next.js", body.contains("__NEXT_DATA__")),
        ("Shopify", body.contains("cdn.shopify.com")),
    ];

    for (name, present) in checks {
        if present {
            found.push(name.to_string());
        }
    }
    found
}

/// HTTP status, redirects, security headers and technologies.
pub struct DomainHttpModule;

#[async_trait]
impl Module for DomainHttpModule {
    fn name(&self) -> &'static str {
        "domain_http"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Domain]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let domain = domain_or_reject(self.name(), query)?;

        let https = ProviderRequest::get("domain_http", format!("https://{}/", domain));
        let (response, tls) = match ctx.fetch(self.name(), https).await {
            Ok(response) => (response, true),
            Err(e) if e.kind == ErrorKind::ProviderUnavailable => {
                let http = ProviderRequest::get("domain_http", format!("http://{}/", domain));
                (ctx.fetch(self.name(), http).await?, false)
            }
            Err(e) => return Err(e),
        };

        let (present, missing): (Vec<&str>, Vec<&str>) = SECURITY_HEADERS
            .iter()
            .copied()
            .partition(|h| response.header(h).is_some());
        let score = (present.len() * 100 / SECURITY_HEADERS.len()) as u64;

        let mut result = PartialResult::new(self.name(), 0.9)
            .with_field("http.status", response.status as u64)
            .with_field("http.https", tls)
            .with_field("security_headers.score", score);
        result.set_text("http.final_url", Some(response.final_url.as_str()));
        result.set_text("http.server", response.header("server"));
        if !present.is_empty() {
            result.set("security_headers.present", FieldValue::texts(present));
        }
        if !missing.is_empty() {
            result.set("security_headers.missing", FieldValue::texts(missing));
        }

        let technologies = detect_technologies(&response);
        if !technologies.is_empty() {
            result.set("http.technologies", technologies);
        }
        if !tls {
            result.warn("site is not reachable over HTTPS");
        }

        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct VirusTotalResponse {
    data: VirusTotalData,
}

#[derive(Debug, Deserialize)]
struct VirusTotalData {
    attributes: VirusTotalAttributes,
}

#[derive(Debug, Deserialize)]
struct VirusTotalAttributes {
    #[serde(default)]
    last_analysis_stats: AnalysisStats,
    #[serde(default)]
    reputation: i64,
    #[serde(default)]
    categories: BTreeMap<String, String>,
    #[serde(default)]
    registrar: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisStats {
    #[serde(default)]
    harmless: u64,
    #[serde(default)]
    malicious: u64,
    #[serde(default)]
    suspicious: u64,
    #[serde(default)]
    undetected: u64,
}

/// Domain reputation from VirusTotal.
pub struct DomainReputationModule;

#[async_trait]
impl Module for DomainReputationModule {
    fn name(&self) -> &'static str {
        "domain_reputation"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Domain]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let domain = domain_or_reject(self.name(), query)?;
        let key = ctx.require_key(self.name(), "virustotal")?;

        let request = ProviderRequest::get(
            "virustotal",
            format!("https://www.virustotal.com/api/v3/domains/{}", domain),
        )
        .header("x-apikey", key);
        let response = ctx.fetch(self.name(), request).await?;

        if response.status == 404 {
            return Err(ModuleError::invalid_target(self.name(), "domain unknown to VirusTotal"));
        }
        let body: VirusTotalResponse = response
            .error_for_status()
            .and_then(|r| r.json())
            .map_err(|e| e.into_module_error(self.name()))?;

        let attributes = body.data.attributes;
        let stats = attributes.last_analysis_stats;
        let risk = if stats.malicious > 0 {
            "high"
        } else if stats.suspicious > 0 {
            "medium"
        } else {
            "low"
        };

        let mut result = PartialResult::new(self.name(), 0.9)
            .with_field("reputation.malicious", stats.malicious)
            .with_field("reputation.suspicious", stats.suspicious)
            .with_field("reputation.harmless", stats.harmless)
            .with_field("reputation.undetected", stats.undetected)
            .with_field("reputation.score", attributes.reputation)
            .with_field("risk_level", risk);
        result.set_text("domain.registrar", attributes.registrar.as_deref());

        let mut categories: Vec<String> = attributes.categories.into_values().collect();
        categories.sort();
        categories.dedup();
        if !categories.is_empty() {
            result.set("reputation.categories", categories);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKeys;
    use crate::modules::testing::*;
    use crate::net::{ProviderError, Transport};
    use serde_json::json;
    use std::sync::Arc;

    fn domain_query(value: &str) -> Query {
        Query::new(QueryType::Domain, value).unwrap()
    }

    #[tokio::test]
    async fn test_dns_records() {
        let mock = Arc::new(
            MockProvider::new()
                .json("name=_dmarc", 200, json!({"Status": 0, "Answer": [
                    {"type": 16, "data": "\"v=DMARC1; p=reject\""}
                ]}))
                .json("type=AAAA", 200, json!({"Status": 0}))
                .json("type=TXT", 200, json!({"Status": 0, "Answer": [
                    {"type": 16, "data": "\"v=spf1 -all\""}
                ]}))
                .json("type=A", 200, json!({"Status": 0, "Answer": [
                    {"type": 1, "data": "93.184.216.34"}
                ]}))
                .json("dns.google", 200, json!({"Status": 0})),
        );
        let ctx = context(mock);

        let result = DomainDnsModule
            .investigate(&domain_query("https://www.example.com/"), &ctx)
            .await
            .unwrap();

        assert_eq!(result.fields["domain"], FieldValue::from("example.com"));
        assert_eq!(result.fields["dns.a"], FieldValue::texts(["93.184.216.34"]));
        assert_eq!(result.fields["dns.spf"], FieldValue::Bool(true));
        assert_eq!(result.fields["dns.dmarc"], FieldValue::Bool(true));
        assert!(!result.fields.contains_key("dns.mx"));
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_domain() {
        let mock = Arc::new(MockProvider::new().json("dns.google", 200, json!({"Status": 3})));
        let ctx = context(mock);

        let err = DomainDnsModule
            .investigate(&domain_query("nothing-here.example"), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTarget);
    }

    #[tokio::test]
    async fn test_http_posture() {
        let response = ProviderResponse::new(200, "<html><script id=\"__NEXT_DATA__\"></script></html>")
            .with_header("Server", "nginx/1.25")
            .with_header("Strict-Transport-Security", "max-age=31536000")
            .with_header("X-Frame-Options", "DENY")
            .with_final_url("https://example.com/");
        let mock = Arc::new(MockProvider::new().on("https://example.com", response));
        let ctx = context(mock);

        let result = DomainHttpModule
            .investigate(&domain_query("example.com"), &ctx)
            .await
            .unwrap();

        assert_eq!(result.fields["http.status"], FieldValue::from(200u64));
        assert_eq!(result.fields["security_headers.score"], FieldValue::from(33u64));
        assert_eq!(
            result.fields["http.technologies"],
            FieldValue::texts(["nginx", "Next.js"])
        );
        assert_eq!(result.fields["http.https"], FieldValue::Bool(true));
    }

    #[tokio::test]
    async fn test_http_falls_back_to_plain_http() {
        let mock = Arc::new(
            MockProvider::new()
                .fail("https://example.com", ProviderError::Connect("tls".into()))
                .on("http://example.com", ProviderResponse::new(200, "")),
        );
        let ctx = context(mock);

        let result = DomainHttpModule
            .investigate(&domain_query("example.com"), &ctx)
            .await
            .unwrap();

        assert_eq!(result.fields["http.https"], FieldValue::Bool(false));
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_reputation() {
        let mock = Arc::new(MockProvider::new().json(
            "virustotal.com",
            200,
            json!({"data": {"attributes": {
                "last_analysis_stats": {"harmless": 70, "malicious": 2, "suspicious": 0, "undetected": 10},
                "reputation": -5,
                "categories": {"a": "phishing", "b": "phishing"}
            }}}),
        ));
        let keys = ApiKeys {
            virustotal: Some("vt".into()),
            ..Default::default()
        };
        let ctx = context_with(mock.clone(), keys, Transport::Direct);

        let result = DomainReputationModule
            .investigate(&domain_query("example.com"), &ctx)
            .await
            .unwrap();

        assert_eq!(result.fields["risk_level"], FieldValue::from("high"));
        assert_eq!(result.fields["reputation.score"], FieldValue::from(-5i64));
        assert_eq!(result.fields["reputation.categories"], FieldValue::texts(["phishing"]));
        assert_eq!(mock.calls()[0].headers[0].0, "x-apikey");
    }
}
