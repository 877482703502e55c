//! Social profile analysis from a profile URL.
//!
//! Three independent sources feed the result: the profile page itself, the
//! platform API where one is public, and the Wayback Machine. A failing
//! source becomes a warning as long as one source answers.

use crate::models::{ModuleError, PartialResult, Query, QueryType};
use crate::modules::{encode_component, link_list, Module, ScanContext};
use crate::net::ProviderRequest;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use serde::Deserialize;
use std::sync::OnceLock;

/// A recognized profile URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUrl {
    pub url: String,
    pub platform: &'static str,
    pub username: Option<String>,
}

fn platform_for_host(host: &str) -> &'static str {
    let host = host.trim_start_matches("www.").trim_start_matches("m.");
    match host {
        "github.com" => "github",
        "twitter.com" | "x.com" => "twitter",
        "instagram.com" => "instagram",
        "facebook.com" | "fb.com" => "facebook",
        "tiktok.com" => "tiktok",
        "linkedin.com" => "linkedin",
        "reddit.com" | "old.reddit.com" => "reddit",
        "youtube.com" => "youtube",
        "medium.com" => "medium",
        "pinterest.com" => "pinterest",
        "twitch.tv" => "twitch",
        "t.me" => "telegram",
        _ => "unknown",
    }
}

/// Parse a profile URL, accepting a missing scheme.
pub fn parse_profile_url(input: &str) -> Option<ProfileUrl> {
    let input = input.trim();
    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };

    let url = Url::parse(&with_scheme).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    if !host.contains('.') {
        return None;
    }

    let platform = platform_for_host(&host);
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let username = match (platform, segments.as_slice()) {
        ("linkedin", ["in", name, ..]) => Some(*name),
        ("reddit", ["user" | "u", name, ..]) => Some(*name),
        ("youtube", ["c" | "user", name, ..]) => Some(*name),
        ("unknown", _) => None,
        (_, [first, ..]) => Some(*first),
        _ => None,
    }
    .map(|name| name.trim_start_matches('@').to_string())
    .filter(|name| !name.is_empty());

    Some(ProfileUrl {
        url: url.to_string(),
        platform,
        username,
    })
}

/// Extract `(title, description, image)` from page markup.
pub fn page_metadata(html: &str) -> (Option<String>, Option<String>, Option<String>) {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    static META: OnceLock<Regex> = OnceLock::new();
    let title_re = TITLE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title regex"));
    let meta_re = META.get_or_init(|| {
        Regex::new(r#"(?i)<meta\s+[^>]*?(?:property|name)\s*=\s*["']([^"']+)["'][^>]*?content\s*=\s*["']([^"']*)["']"#)
            .expect("valid meta regex")
    });

    let mut title = title_re
        .captures(html)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty());
    let mut description = None;
    let mut image = None;

    for caps in meta_re.captures_iter(html) {
        let value = caps[2].trim().to_string();
        if value.is_empty() {
            continue;
        }
        match caps[1].to_ascii_lowercase().as_str() {
            "og:title" => title = Some(value),
            "og:description" | "description" if description.is_none() => description = Some(value),
            "og:image" => image = Some(value),
            _ => {}
        }
    }

    (title, description, image)
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    blog: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    public_repos: u64,
    #[serde(default)]
    followers: u64,
    #[serde(default)]
    following: u64,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaybackResponse {
    #[serde(default)]
    archived_snapshots: WaybackSnapshots,
}

#[derive(Debug, Default, Deserialize)]
struct WaybackSnapshots {
    #[serde(default)]
    closest: Option<WaybackSnapshot>,
}

#[derive(Debug, Deserialize)]
struct WaybackSnapshot {
    available: bool,
    url: String,
    timestamp: String,
}

/// Profile page, platform API and archive history for a profile URL.
pub struct SocialProfileModule;

impl SocialProfileModule {
    async fn profile_page(&self, profile: &ProfileUrl, ctx: &ScanContext, result: &mut PartialResult) -> Result<(), ModuleError> {
        let response = ctx
            .fetch(self.name(), ProviderRequest::get(profile.platform, profile.url.clone()))
            .await?;

        result.set("profile.status", response.status as u64);
        result.set("profile.reachable", response.is_success());
        if response.is_success() {
            let (title, description, image) = page_metadata(&response.text());
            result.set_opt("profile.title", title);
            result.set_opt("profile.description", description);
            result.set_opt("profile.image", image);
        }
        Ok(())
    }

    async fn github(&self, username: &str, ctx: &ScanContext, result: &mut PartialResult) -> Result<(), ModuleError> {
        let request = ProviderRequest::get(
            "github_api",
            format!("https://api.github.com/users/{}", encode_component(username)),
        )
        .header("Accept", "application/vnd.github+json");
        let user: GitHubUser = ctx.fetch_json(self.name(), request).await?;

        result.set_text("github.name", user.name.as_deref());
        result.set_text("github.company", user.company.as_deref());
        result.set_text("github.blog", user.blog.as_deref());
        result.set_text("github.location", user.location.as_deref());
        result.set_text("github.bio", user.bio.as_deref());
        result.set_text("github.created_at", user.created_at.as_deref());
        result.set("github.public_repos", user.public_repos);
        result.set("github.followers", user.followers);
        result.set("github.following", user.following);
        Ok(())
    }

    async fn wayback(&self, url: &str, ctx: &ScanContext, result: &mut PartialResult) -> Result<(), ModuleError> {
        let request = ProviderRequest::get("wayback", "https://archive.org/wayback/available").query("url", url);
        let body: WaybackResponse = ctx.fetch_json(self.name(), request).await?;

        match body.archived_snapshots.closest.filter(|s| s.available) {
            Some(snapshot) => {
                result.set("wayback.archived", true);
                result.set("wayback.snapshot_url", snapshot.url);
                result.set("wayback.timestamp", snapshot.timestamp);
            }
            None => result.set("wayback.archived", false),
        }
        Ok(())
    }
}

#[async_trait]
impl Module for SocialProfileModule {
    fn name(&self) -> &'static str {
        "social_profile"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Social]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let profile = parse_profile_url(query.value())
            .ok_or_else(|| ModuleError::invalid_target(self.name(), "not a valid profile URL"))?;

        let mut result = PartialResult::new(self.name(), 0.75)
            .with_field("social.platform", profile.platform)
            .with_field("social.url", profile.url.clone());
        result.set_opt("social.username", profile.username.clone());

        let mut attempted = 0;
        let mut failures = Vec::new();

        attempted += 1;
        if let Err(e) = self.profile_page(&profile, ctx, &mut result).await {
            failures.push(("profile page", e));
        }

        if let (Some(username), "github") = (profile.username.as_deref(), profile.platform) {
            attempted += 1;
            if let Err(e) = self.github(username, ctx, &mut result).await {
                failures.push(("GitHub API", e));
            }
        }

        if query.flag("deep") {
            attempted += 1;
            if let Err(e) = self.wayback(&profile.url, ctx, &mut result).await {
                failures.push(("Wayback Machine", e));
            }
        }

        ctx.checkpoint(self.name())?;
        if failures.len() == attempted {
            if let Some((_, e)) = failures.into_iter().next() {
                return Err(e);
            }
        } else {
            for (source, e) in failures {
                result.warn(format!("{}: {}", source, e.message));
            }
        }

        let mut links = vec![(
            "Wayback Machine",
            format!("https://web.archive.org/web/*/{}", profile.url),
        )];
        if let Some(ref username) = profile.username {
            links.push(("Google", format!("https://www.google.com/search?q=%22{}%22", encode_component(username))));
            links.push(("WhatsMyName", format!("https://whatsmyname.app/?q={}", encode_component(username))));
        }
        result.set("links.osint", link_list(&links));

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, FieldValue};
    use crate::modules::testing::*;
    use crate::net::{ProviderError, ProviderResponse};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_parse_profile_url() {
        let p = parse_profile_url("github.com/octocat").unwrap();
        assert_eq!(p.platform, "github");
        assert_eq!(p.username.as_deref(), Some("octocat"));

        let p = parse_profile_url("https://www.linkedin.com/in/jane-doe/").unwrap();
        assert_eq!(p.username.as_deref(), Some("jane-doe"));

        let p = parse_profile_url("https://www.tiktok.com/@someone").unwrap();
        assert_eq!(p.username.as_deref(), Some("someone"));

        let p = parse_profile_url("https://example.org/about").unwrap();
        assert_eq!(p.platform, "unknown");
        assert_eq!(p.username, None);

        assert!(parse_profile_url("ftp://github.com/x").is_none());
        assert!(parse_profile_url("not a url").is_none());
    }

    #[test]
    fn test_page_metadata() {
        let html = r#"<html><head><title> Octo Cat </title>
            <meta property="og:description" content="Profile of octocat">
            <meta property="og:image" content="https://avatars.example/1.png">
            </head></html>"#;

        let (title, description, image) = page_metadata(html);
        assert_eq!(title.as_deref(), Some("Octo Cat"));
        assert_eq!(description.as_deref(), Some("Profile of octocat"));
        assert_eq!(image.as_deref(), Some("https://avatars.example/1.png"));
    }

    #[tokio::test]
    async fn test_github_profile() {
        let mock = Arc::new(
            MockProvider::new()
                .on("https://github.com/octocat", ProviderResponse::new(200, "<title>octocat</title>"))
                .json("api.github.com/users/octocat", 200, json!({
                    "login": "octocat",
                    "name": "The Octocat",
                    "location": "San Francisco",
                    "public_repos": 8,
                    "followers": 4000,
                    "following": 9
                })),
        );
        let ctx = context(mock);
        let query = Query::new(QueryType::Social, "https://github.com/octocat").unwrap();

        let result = SocialProfileModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(result.fields["social.platform"], FieldValue::from("github"));
        assert_eq!(result.fields["github.name"], FieldValue::from("The Octocat"));
        assert_eq!(result.fields["github.followers"], FieldValue::from(4000u64));
        assert_eq!(result.fields["profile.title"], FieldValue::from("octocat"));
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_is_a_warning() {
        let mock = Arc::new(
            MockProvider::new()
                .json("archive.org", 200, json!({"archived_snapshots": {"closest": {
                    "available": true,
                    "url": "http://web.archive.org/web/2020/https://github.com/octocat",
                    "timestamp": "20200101000000",
                    "status": "200"
                }}}))
                .on("api.github.com", ProviderResponse::new(403, ""))
                .on("https://github.com/octocat", ProviderResponse::new(200, "")),
        );
        let ctx = context(mock);
        let query = Query::new(QueryType::Social, "https://github.com/octocat")
            .unwrap()
            .with_flag("deep", true);

        let result = SocialProfileModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(result.fields["wayback.archived"], FieldValue::Bool(true));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("GitHub API"));
    }

    #[tokio::test]
    async fn test_all_sources_failing() {
        let mock = Arc::new(MockProvider::new().fail("example.org", ProviderError::Timeout));
        let ctx = context(mock);
        let query = Query::new(QueryType::Social, "https://example.org/someone").unwrap();

        let err = SocialProfileModule.investigate(&query, &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }
}
