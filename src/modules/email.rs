//! Email address intelligence: breaches, Gravatar profile and mail domain.

use crate::models::{ModuleError, PartialResult, Query, QueryType};
use crate::modules::dns::{self, RecordType};
use crate::modules::{encode_component, link_list, Module, ScanContext};
use crate::net::ProviderRequest;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "dispostable.com",
    "getnada.com",
    "guerrillamail.com",
    "mailinator.com",
    "maildrop.cc",
    "sharklasers.com",
    "temp-mail.org",
    "tempmail.com",
    "throwawaymail.com",
    "trashmail.com",
    "yopmail.com",
];

const FREE_PROVIDERS: &[&str] = &[
    "aol.com",
    "gmail.com",
    "gmx.com",
    "hotmail.com",
    "icloud.com",
    "mail.com",
    "outlook.com",
    "proton.me",
    "protonmail.com",
    "yahoo.com",
    "yandex.com",
    "zoho.com",
];

/// Split a syntactically valid address into `(local, domain)`.
pub fn parse_email(input: &str) -> Option<(String, String)> {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    let pattern = EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("valid email regex")
    });

    let email = input.trim();
    if !pattern.is_match(email) {
        return None;
    }
    let (local, domain) = email.rsplit_once('@')?;
    Some((local.to_string(), domain.to_ascii_lowercase()))
}

fn parse_or_reject(module: &str, query: &Query) -> Result<(String, String), ModuleError> {
    parse_email(query.value())
        .ok_or_else(|| ModuleError::invalid_target(module, "not a valid email address"))
}

/// Breach exposure level by number of known breaches.
pub fn breach_risk(count: usize) -> &'static str {
    match count {
        0 => "low",
        1..=4 => "medium",
        _ => "high",
    }
}

#[derive(Debug, Deserialize)]
struct BreachResponse {
    #[serde(default)]
    breaches: Vec<Vec<String>>,
}

/// Breach lookup against XposedOrNot.
pub struct EmailBreachModule;

#[async_trait]
impl Module for EmailBreachModule {
    fn name(&self) -> &'static str {
        "email_breach"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Email]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let (local, domain) = parse_or_reject(self.name(), query)?;
        let email = format!("{}@{}", local, domain);

        let url = format!(
            "https://api.xposedornot.com/v1/check-email/{}",
            encode_component(&email)
        );
        let response = ctx
            .fetch(self.name(), ProviderRequest::get("xposedornot", url))
            .await?;

        // A 404 means the address is not in any known breach.
        let mut breaches: Vec<String> = if response.status == 404 {
            Vec::new()
        } else {
            let body: BreachResponse = response
                .error_for_status()
                .and_then(|r| r.json())
                .map_err(|e| e.into_module_error(self.name()))?;
            body.breaches.into_iter().flatten().collect()
        };
        breaches.sort();
        breaches.dedup();

        let mut result = PartialResult::new(self.name(), 0.9)
            .with_field("breached", !breaches.is_empty())
            .with_field("breaches.count", breaches.len())
            .with_field("risk_level", breach_risk(breaches.len()));
        if !breaches.is_empty() {
            result.set("breaches", breaches);
        }
        result.set(
            "links.breach_check",
            link_list(&[
                ("Have I Been Pwned", format!("https://haveibeenpwned.com/account/{}", encode_component(&email))),
                ("DeHashed", format!("https://dehashed.com/search?query={}", encode_component(&email))),
                ("IntelX", format!("https://intelx.io/?s={}", encode_component(&email))),
            ]),
        );

        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct GravatarResponse {
    entry: Vec<GravatarEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GravatarEntry {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    profile_url: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    current_location: Option<String>,
    #[serde(default)]
    accounts: Vec<GravatarAccount>,
}

#[derive(Debug, Deserialize)]
struct GravatarAccount {
    url: String,
}

/// Gravatar hash of an address (SHA-256 of the trimmed, lowercased address).
pub fn gravatar_hash(email: &str) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Public Gravatar profile.
pub struct EmailGravatarModule;

#[async_trait]
impl Module for EmailGravatarModule {
    fn name(&self) -> &'static str {
        "email_gravatar"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Email]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let (local, domain) = parse_or_reject(self.name(), query)?;
        let hash = gravatar_hash(&format!("{}@{}", local, domain));

        let url = format!("https://en.gravatar.com/{}.json", hash);
        let response = ctx
            .fetch(self.name(), ProviderRequest::get("gravatar", url))
            .await?;

        let mut result = PartialResult::new(self.name(), 0.7).with_field("gravatar.hash", hash.clone());

        if response.status == 404 {
            result.set("gravatar.exists", false);
            return Ok(result);
        }

        let body: GravatarResponse = response
            .error_for_status()
            .and_then(|r| r.json())
            .map_err(|e| e.into_module_error(self.name()))?;

        result.set("gravatar.exists", true);
        if let Some(entry) = body.entry.into_iter().next() {
            result.set_text("gravatar.display_name", entry.display_name.as_deref());
            result.set_text("gravatar.profile_url", entry.profile_url.as_deref());
            result.set_text("gravatar.avatar", entry.thumbnail_url.as_deref());
            result.set_text("gravatar.location", entry.current_location.as_deref());
            if !entry.accounts.is_empty() {
                let mut accounts: Vec<String> = entry.accounts.into_iter().map(|a| a.url).collect();
                accounts.sort();
                result.set("gravatar.accounts", accounts);
            }
        }

        Ok(result)
    }
}

/// Mail domain classification and MX records.
pub struct EmailDomainModule;

#[async_trait]
impl Module for EmailDomainModule {
    fn name(&self) -> &'static str {
        "email_domain"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Email]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let (_, domain) = parse_or_reject(self.name(), query)?;

        let mut mx = dns::resolve(ctx, self.name(), &domain, RecordType::Mx).await?;
        mx.sort_by_key(|record| {
            record
                .split_whitespace()
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .unwrap_or(u32::MAX)
        });
        let hosts: Vec<String> = mx.iter().map(|r| dns::mx_host(r).to_string()).collect();

        let disposable = DISPOSABLE_DOMAINS.contains(&domain.as_str());
        let mut result = PartialResult::new(self.name(), 0.85)
            .with_field("email.domain", domain.clone())
            .with_field("email.disposable", disposable)
            .with_field("email.free_provider", FREE_PROVIDERS.contains(&domain.as_str()))
            .with_field("email.accepts_mail", !hosts.is_empty());

        if hosts.is_empty() {
            result.warn(format!("{} has no MX records", domain));
        } else {
            result.set("email.mx", hosts);
        }
        if disposable {
            result.warn("disposable email provider");
        }

        Ok(result)
    }
}
