//! Username presence across public platforms.
//!
//! Each platform probe is isolated: a failing platform becomes a warning on
//! the result, never an error for the module as a whole.

use crate::models::{ErrorKind, ModuleError, PartialResult, Query, QueryType};
use crate::modules::{Module, ScanContext};
use crate::net::{ProviderRequest, ProviderResponse};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const MAX_CONCURRENT_PROBES: usize = 16;
const PROBE_ATTEMPTS: u32 = 2;
const PROBE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// How a platform reveals that a profile does not exist.
#[derive(Debug, Clone, Copy)]
pub enum Detection {
    /// Non-200 status or a redirect to an error page.
    Status,
    /// Body contains one of these markers when the profile is missing.
    ErrorText(&'static [&'static str]),
    /// Body contains one of these markers when the profile exists.
    PresenceText(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct Platform {
    pub name: &'static str,
    pub url: &'static str,
    pub category: &'static str,
    pub detection: Detection,
    /// Checked in quick mode; deep mode checks every platform.
    pub quick: bool,
}

const fn platform(
    name: &'static str,
    url: &'static str,
    category: &'static str,
    detection: Detection,
    quick: bool,
) -> Platform {
    Platform {
        name,
        url,
        category,
        detection,
        quick,
    }
}

pub const PLATFORMS: &[Platform] = &[
    platform("GitHub", "https://github.com/{}", "Development", Detection::Status, true),
    platform("GitLab", "https://gitlab.com/{}", "Development", Detection::Status, true),
    platform("Bitbucket", "https://bitbucket.org/{}/", "Development", Detection::Status, false),
    platform("Dev.to", "https://dev.to/{}", "Development", Detection::Status, false),
    platform("Replit", "https://replit.com/@{}", "Development", Detection::Status, false),
    platform("npm", "https://www.npmjs.com/~{}", "Development", Detection::Status, false),
    platform("PyPI", "https://pypi.org/user/{}/", "Development", Detection::Status, false),
    platform("Docker Hub", "https://hub.docker.com/u/{}", "Development", Detection::Status, false),
    platform("Instagram", "https://www.instagram.com/{}/", "Social", Detection::ErrorText(&["Page Not Found", "Sorry, this page"]), true),
    platform("Twitter", "https://x.com/{}", "Social", Detection::ErrorText(&["This account doesn", "page doesn"]), true),
    platform("Facebook", "https://www.facebook.com/{}", "Social", Detection::ErrorText(&["isn't available", "Page Not Found"]), true),
    platform("TikTok", "https://www.tiktok.com/@{}", "Social", Detection::ErrorText(&["Couldn't find this account"]), true),
    platform("Reddit", "https://www.reddit.com/user/{}/about.json", "Social", Detection::PresenceText(&["\"name\""]), true),
    platform("Pinterest", "https://www.pinterest.com/{}/", "Social", Detection::Status, true),
    platform("Tumblr", "https://{}.tumblr.com", "Social", Detection::Status, false),
    platform("Mastodon", "https://mastodon.social/@{}", "Social", Detection::Status, false),
    platform("VK", "https://vk.com/{}", "Social", Detection::Status, false),
    platform("Telegram", "https://t.me/{}", "Messaging", Detection::PresenceText(&["tgme_page_title"]), true),
    platform("Keybase", "https://keybase.io/{}", "Messaging", Detection::Status, false),
    platform("LinkedIn", "https://www.linkedin.com/in/{}", "Professional", Detection::Status, true),
    platform("About.me", "https://about.me/{}", "Professional", Detection::Status, false),
    platform("Behance", "https://www.behance.net/{}", "Creative", Detection::Status, false),
    platform("Dribbble", "https://dribbble.com/{}", "Creative", Detection::Status, false),
    platform("DeviantArt", "https://www.deviantart.com/{}", "Creative", Detection::Status, false),
    platform("Flickr", "https://www.flickr.com/people/{}", "Creative", Detection::Status, false),
    platform("SoundCloud", "https://soundcloud.com/{}", "Music", Detection::Status, true),
    platform("Spotify", "https://open.spotify.com/user/{}", "Music", Detection::Status, false),
    platform("YouTube", "https://www.youtube.com/@{}", "Video", Detection::Status, true),
    platform("Twitch", "https://www.twitch.tv/{}", "Video", Detection::Status, true),
    platform("Vimeo", "https://vimeo.com/{}", "Video", Detection::Status, false),
    platform("Steam", "https://steamcommunity.com/id/{}", "Gaming", Detection::ErrorText(&["The specified profile could not be found"]), true),
    platform("Chess.com", "https://www.chess.com/member/{}", "Gaming", Detection::Status, false),
    platform("Lichess", "https://lichess.org/@/{}", "Gaming", Detection::Status, false),
    platform("Medium", "https://medium.com/@{}", "Blogging", Detection::Status, true),
    platform("Substack", "https://{}.substack.com", "Blogging", Detection::Status, false),
    platform("WordPress", "https://{}.wordpress.com", "Blogging", Detection::Status, false),
    platform("Patreon", "https://www.patreon.com/{}", "Funding", Detection::Status, false),
    platform("Ko-fi", "https://ko-fi.com/{}", "Funding", Detection::Status, false),
    platform("HackerOne", "https://hackerone.com/{}", "Security", Detection::Status, false),
    platform("TryHackMe", "https://tryhackme.com/p/{}", "Security", Detection::Status, false),
];

/// Rate-limit bucket of a platform.
pub fn platform_provider(platform: &Platform) -> String {
    platform
        .name
        .to_ascii_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Usernames are restricted to characters every platform URL accepts.
pub fn is_valid_username(username: &str) -> bool {
    (2..=64).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Debug)]
enum Probe {
    Found(String),
    Missing,
    Failed(ModuleError),
}

/// Decide presence from a platform's answer.
pub fn profile_exists(platform: &Platform, response: &ProviderResponse) -> bool {
    if response.status != 200 {
        return false;
    }

    match platform.detection {
        Detection::Status => {
            let final_url = response.final_url.to_ascii_lowercase();
            !["404", "error", "notfound", "not-found", "login"]
                .iter()
                .any(|marker| final_url.contains(marker))
        }
        Detection::ErrorText(markers) => {
            let body = response.text().to_lowercase();
            !markers.iter().any(|m| body.contains(&m.to_lowercase()))
        }
        Detection::PresenceText(markers) => {
            let body = response.text();
            markers.iter().any(|m| body.contains(m))
        }
    }
}

/// Probe public platforms for a username.
pub struct UsernameSearchModule;

impl UsernameSearchModule {
    async fn probe(&self, platform: &Platform, username: &str, ctx: &ScanContext) -> Probe {
        let url = platform.url.replace("{}", username);
        let provider = platform_provider(platform);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let request = ProviderRequest::get(provider.clone(), url.clone());
            match ctx.fetch(self.name(), request).await {
                Ok(response) if profile_exists(platform, &response) => return Probe::Found(url),
                Ok(_) => return Probe::Missing,
                Err(e) if e.retryable && attempt < PROBE_ATTEMPTS && !ctx.is_cancelled() => {
                    debug!("{} probe failed ({}), retrying", platform.name, e.message);
                    tokio::time::sleep(PROBE_RETRY_DELAY).await;
                }
                Err(e) => return Probe::Failed(e),
            }
        }
    }
}

#[async_trait]
impl Module for UsernameSearchModule {
    fn name(&self) -> &'static str {
        "username_search"
    }

    fn query_types(&self) -> &'static [QueryType] {
        &[QueryType::Username]
    }

    async fn investigate(&self, query: &Query, ctx: &ScanContext) -> Result<PartialResult, ModuleError> {
        let username = query.value().trim_start_matches('@');
        if !is_valid_username(username) {
            return Err(ModuleError::invalid_target(
                self.name(),
                "usernames may only contain letters, digits, '.', '_' and '-'",
            ));
        }

        let deep = query.flag("deep");
        let platforms: Vec<&Platform> = PLATFORMS.iter().filter(|p| deep || p.quick).collect();

        let probes: Vec<_> = platforms
            .iter()
            .copied()
            .enumerate()
            .map(|(i, p)| async move { (i, p, self.probe(p, username, ctx).await) })
            .collect();
        let mut outcomes: Vec<(usize, &Platform, Probe)> = stream::iter(probes)
            .buffer_unordered(MAX_CONCURRENT_PROBES)
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _, _)| *i);

        ctx.checkpoint(self.name())?;

        let mut found: BTreeMap<&str, String> = BTreeMap::new();
        let mut by_category: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut warnings = Vec::new();
        let mut failures: Vec<ModuleError> = Vec::new();

        for (_, platform, outcome) in outcomes {
            match outcome {
                Probe::Found(url) => {
                    found.insert(platform.name, url);
                    by_category.entry(platform.category).or_default().push(platform.name);
                }
                Probe::Missing => {}
                Probe::Failed(e) => {
                    warnings.push(format!("{}: {}", platform.name, e.message));
                    failures.push(e);
                }
            }
        }
        warnings.sort();

        // Kind of the first failure in platform order; retryable only if every probe was
        if failures.len() == platforms.len() {
            let kind = failures.first().map(|e| e.kind).unwrap_or(ErrorKind::Unknown);
            let retryable = !failures.is_empty() && failures.iter().all(|e| e.retryable);
            return Err(ModuleError::new(
                self.name(),
                kind,
                format!("all {} platform probes failed", platforms.len()),
                retryable,
            ));
        }

        let mut result = PartialResult::new(self.name(), 0.8)
            .with_field("username", username)
            .with_field("accounts", found.values().cloned().collect::<Vec<_>>())
            .with_field("accounts.count", found.len())
            .with_field("platforms.checked", platforms.len())
            .with_field("platforms.failed", warnings.len());

        for (category, mut names) in by_category {
            names.sort_unstable();
            result.set(
                format!("accounts.{}", category.to_ascii_lowercase()),
                names.into_iter().map(String::from).collect::<Vec<_>>(),
            );
        }
        for warning in warnings {
            result.warn(warning);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use crate::modules::testing::*;
    use crate::net::ProviderError;
    use std::sync::Arc;

    fn github() -> &'static Platform {
        PLATFORMS.iter().find(|p| p.name == "GitHub").unwrap()
    }

    #[test]
    fn test_username_validation() {
        assert!(is_valid_username("john_doe.99"));
        assert!(!is_valid_username("a"));
        assert!(!is_valid_username("john doe"));
        assert!(!is_valid_username("../etc"));
    }

    #[test]
    fn test_platform_provider_keys() {
        assert_eq!(platform_provider(github()), "github");
        let devto = PLATFORMS.iter().find(|p| p.name == "Dev.to").unwrap();
        assert_eq!(platform_provider(devto), "devto");
    }

    #[test]
    fn test_profile_detection() {
        let ok = ProviderResponse::new(200, "").with_final_url("https://github.com/octocat");
        assert!(profile_exists(github(), &ok));

        let redirected = ProviderResponse::new(200, "").with_final_url("https://github.com/404");
        assert!(!profile_exists(github(), &redirected));
        assert!(!profile_exists(github(), &ProviderResponse::new(404, "")));

        let steam = PLATFORMS.iter().find(|p| p.name == "Steam").unwrap();
        let missing = ProviderResponse::new(200, "Error: The specified profile could not be found.");
        assert!(!profile_exists(steam, &missing));
    }

    #[tokio::test]
    async fn test_platform_failures_become_warnings() {
        let mock = Arc::new(
            MockProvider::new()
                .on("github.com/octocat", ProviderResponse::new(200, ""))
                .fail("gitlab.com", ProviderError::Status(403))
                .on("twitch.tv/octocat", ProviderResponse::new(200, "")),
        );
        let ctx = context(mock.clone());
        let query = Query::new(QueryType::Username, "octocat").unwrap();

        let result = UsernameSearchModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(result.fields["accounts.count"], FieldValue::from(2usize));
        assert_eq!(
            result.fields["accounts.development"],
            FieldValue::texts(["GitHub"])
        );
        assert_eq!(result.fields["platforms.failed"], FieldValue::from(1usize));
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].starts_with("GitLab"));
        // 403 is not retryable: one call only
        assert_eq!(mock.calls_to("gitlab.com"), 1);
    }

    #[tokio::test]
    async fn test_retryable_probe_is_retried() {
        let mock = Arc::new(MockProvider::new().fail("github.com", ProviderError::Timeout));
        let ctx = context(mock.clone());
        let query = Query::new(QueryType::Username, "octocat").unwrap();

        let result = UsernameSearchModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(mock.calls_to("github.com"), PROBE_ATTEMPTS as usize);
        assert!(result.warnings.iter().any(|w| w.starts_with("GitHub")));
    }

    #[tokio::test]
    async fn test_deep_mode_checks_every_platform() {
        let mock = Arc::new(MockProvider::new());
        let ctx = context(mock.clone());
        let query = Query::new(QueryType::Username, "octocat")
            .unwrap()
            .with_flag("deep", true);

        let result = UsernameSearchModule.investigate(&query, &ctx).await.unwrap();

        assert_eq!(mock.calls().len(), PLATFORMS.len());
        assert_eq!(result.fields["accounts.count"], FieldValue::from(0usize));
    }

    #[tokio::test]
    async fn test_all_probes_failing_is_an_error() {
        let mock = Arc::new(MockProvider::new().fail("https://", ProviderError::Connect("down".into())));
        let ctx = context(mock);
        let query = Query::new(QueryType::Username, "octocat").unwrap();

        let err = UsernameSearchModule.investigate(&query, &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_refused_probes_are_not_retryable() {
        let mock = Arc::new(MockProvider::new());
        let ctx = context(mock.clone()).requiring_anonymity(true);
        let query = Query::new(QueryType::Username, "octocat").unwrap();

        let err = UsernameSearchModule.investigate(&query, &ctx).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
        assert!(!err.retryable);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_mixed_failures_use_first_platform_kind() {
        assert_eq!(PLATFORMS[0].name, "GitHub");
        let mock = Arc::new(
            MockProvider::new()
                .fail("github.com", ProviderError::Status(401))
                .fail("https://", ProviderError::Connect("down".into())),
        );
        let ctx = context(mock);
        let query = Query::new(QueryType::Username, "octocat").unwrap();

        let err = UsernameSearchModule.investigate(&query, &ctx).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::AuthFailure);
        assert!(!err.retryable);
    }
}
