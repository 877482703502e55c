//! DNS lookups over HTTPS.
//!
//! Resolution goes through a DNS-over-HTTPS provider so lookups share the
//! scan's transport and rate limits instead of leaking to the local resolver.

use crate::models::ModuleError;
use crate::modules::ScanContext;
use crate::net::ProviderRequest;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

const DOH_URL: &str = "https://dns.google/resolve";
pub const DOH_PROVIDER: &str = "dns_google";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    A,
    Aaaa,
    Mx,
    Ns,
    Txt,
}

impl RecordType {
    fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Mx => "MX",
            RecordType::Ns => "NS",
            RecordType::Txt => "TXT",
        }
    }

    fn code(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Ns => 2,
            RecordType::Mx => 15,
            RecordType::Txt => 16,
            RecordType::Aaaa => 28,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// Resolve `name`, returning record data with trailing dots and quotes removed.
///
/// NXDOMAIN yields an empty list.
pub async fn resolve(
    ctx: &ScanContext,
    module: &str,
    name: &str,
    record_type: RecordType,
) -> Result<Vec<String>, ModuleError> {
    let request = ProviderRequest::get(DOH_PROVIDER, DOH_URL)
        .query("name", name)
        .query("type", record_type.as_str())
        .header("Accept", "application/dns-json");

    let response: DohResponse = ctx.fetch_json(module, request).await?;

    // 0 = NOERROR, 3 = NXDOMAIN
    match response.status {
        0 | 3 => {}
        2 => return Err(ModuleError::unavailable(module, "DNS server failure")),
        other => {
            return Err(ModuleError::unknown(
                module,
                format!("DNS lookup failed with rcode {}", other),
            ))
        }
    }

    Ok(response
        .answer
        .into_iter()
        .filter(|a| a.record_type == record_type.code())
        .map(|a| clean_record(&a.data))
        .collect())
}

fn clean_record(data: &str) -> String {
    data.trim().trim_matches('"').trim_end_matches('.').to_string()
}

/// Hostname of an MX record (`"10 mx.example.com"` -> `"mx.example.com"`).
pub fn mx_host(record: &str) -> &str {
    record.split_whitespace().last().unwrap_or(record)
}

/// Normalize user input to a bare domain name.
pub fn normalize_domain(input: &str) -> Option<String> {
    static DOMAIN: OnceLock<Regex> = OnceLock::new();
    let pattern = DOMAIN.get_or_init(|| {
        Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
            .expect("valid domain regex")
    });

    let mut domain = input.trim().to_ascii_lowercase();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = domain.strip_prefix(prefix) {
            domain = rest.to_string();
        }
    }
    if let Some(rest) = domain.strip_prefix("www.") {
        domain = rest.to_string();
    }
    let domain = domain
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .trim_end_matches('.')
        .to_string();

    pattern.is_match(&domain).then_some(domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("Example.COM").as_deref(), Some("example.com"));
        assert_eq!(
            normalize_domain("https://www.example.co.id/path?q=1").as_deref(),
            Some("example.co.id")
        );
        assert_eq!(normalize_domain("example.com:8443").as_deref(), Some("example.com"));
        assert_eq!(normalize_domain("not a domain"), None);
        assert_eq!(normalize_domain("localhost"), None);
        assert_eq!(normalize_domain("-bad-.com"), None);
    }

    #[test]
    fn test_mx_host() {
        assert_eq!(mx_host("10 aspmx.l.google.com"), "aspmx.l.google.com");
        assert_eq!(mx_host("mail.example.com"), "mail.example.com");
    }

    #[tokio::test]
    async fn test_resolve_filters_and_cleans() {
        let mock = Arc::new(MockProvider::new().json(
            "type=MX",
            200,
            json!({
                "Status": 0,
                "Answer": [
                    {"name": "example.com.", "type": 5, "TTL": 60, "data": "alias.example.com."},
                    {"name": "example.com.", "type": 15, "TTL": 60, "data": "10 mx.example.com."}
                ]
            }),
        ));
        let ctx = context(mock);

        let records = resolve(&ctx, "domain_dns", "example.com", RecordType::Mx)
            .await
            .unwrap();
        assert_eq!(records, vec!["10 mx.example.com"]);
    }

    #[tokio::test]
    async fn test_resolve_nxdomain_is_empty() {
        let mock = Arc::new(MockProvider::new().json("dns.google", 200, json!({"Status": 3})));
        let ctx = context(mock);

        let records = resolve(&ctx, "domain_dns", "nope.invalid", RecordType::A)
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}
