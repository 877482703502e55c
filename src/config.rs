//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.cksearch.toml` files.

use crate::net::{BucketConfig, RateLimiter, Transport};
use crate::report::ExportFormat;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".cksearch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Scan policy settings.
    #[serde(default)]
    pub scan: ScanConfig,

    /// HTTP client settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Outbound transport settings.
    #[serde(default)]
    pub anonymity: AnonymityConfig,

    /// Per-provider rate limits.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Provider API keys.
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory report files are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Formats produced when `--format` is not given.
    #[serde(default = "default_formats")]
    pub formats: Vec<ExportFormat>,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            formats: default_formats(),
            verbose: false,
        }
    }
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_formats() -> Vec<ExportFormat> {
    vec![ExportFormat::Console]
}

/// Scan policy: timeouts, retries and modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Per-attempt module timeout in seconds.
    #[serde(default = "default_module_timeout")]
    pub module_timeout_secs: u64,

    /// Retries after the first attempt for retryable failures.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// First backoff delay in milliseconds; doubles per retry.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// How long cancelled modules may keep running before they are aborted.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,

    /// Deep mode: wider platform lists and extra lookups.
    #[serde(default)]
    pub deep: bool,

    /// Register the active port scanner for IP queries.
    #[serde(default)]
    pub active_ip_scan: bool,

    /// TCP connect timeout for the port scanner in milliseconds.
    #[serde(default = "default_port_connect_timeout")]
    pub port_connect_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            module_timeout_secs: default_module_timeout(),
            retries: default_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            cancel_grace_ms: default_cancel_grace(),
            deep: false,
            active_ip_scan: false,
            port_connect_timeout_ms: default_port_connect_timeout(),
        }
    }
}

fn default_module_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    1
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    8_000
}

fn default_cancel_grace() -> u64 {
    2_000
}

fn default_port_connect_timeout() -> u64 {
    2_000
}

impl ScanConfig {
    pub fn module_timeout(&self) -> Duration {
        Duration::from_secs(self.module_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn port_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.port_connect_timeout_ms)
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// User-Agent header sent to providers.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_request_timeout() -> u64 {
    15
}

fn default_user_agent() -> String {
    format!("cksearch/{}", env!("CARGO_PKG_VERSION"))
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// How outbound traffic is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnonymityMode {
    #[default]
    Direct,
    Http,
    Socks,
    Tor,
}

/// Outbound transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymityConfig {
    #[serde(default)]
    pub mode: AnonymityMode,

    /// Proxy URL for `http` and `socks` modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// Local Tor SOCKS port.
    #[serde(default = "default_tor_port")]
    pub tor_socks_port: u16,

    /// Refuse provider calls over a direct connection.
    #[serde(default)]
    pub require: bool,
}

impl Default for AnonymityConfig {
    fn default() -> Self {
        Self {
            mode: AnonymityMode::Direct,
            proxy_url: None,
            tor_socks_port: default_tor_port(),
            require: false,
        }
    }
}

fn default_tor_port() -> u16 {
    9050
}

impl AnonymityConfig {
    /// Resolve the configured mode to a transport.
    pub fn transport(&self) -> Result<Transport> {
        let proxy = || {
            self.proxy_url
                .clone()
                .with_context(|| format!("anonymity mode {:?} requires proxy_url", self.mode))
        };

        Ok(match self.mode {
            AnonymityMode::Direct => Transport::Direct,
            AnonymityMode::Http => Transport::HttpProxy(proxy()?),
            AnonymityMode::Socks => Transport::Socks(proxy()?),
            AnonymityMode::Tor => Transport::Tor {
                port: self.tor_socks_port,
            },
        })
    }
}

/// One token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketSettings {
    pub requests_per_second: f64,
    pub burst: u32,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
}

impl BucketSettings {
    fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
            wait_timeout_secs: default_wait_timeout(),
        }
    }

    pub fn to_bucket(&self) -> BucketConfig {
        BucketConfig::new(
            self.requests_per_second,
            self.burst,
            Duration::from_secs(self.wait_timeout_secs),
        )
    }
}

fn default_wait_timeout() -> u64 {
    30
}

/// Rate limits: a default bucket and per-provider overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_bucket")]
    pub default: BucketSettings,

    #[serde(default = "default_provider_buckets")]
    pub providers: BTreeMap<String, BucketSettings>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default: default_bucket(),
            providers: default_provider_buckets(),
        }
    }
}

fn default_bucket() -> BucketSettings {
    BucketSettings::new(5.0, 5)
}

fn default_provider_buckets() -> BTreeMap<String, BucketSettings> {
    [
        ("numverify", BucketSettings::new(1.0, 1)),
        ("ipinfo", BucketSettings::new(10.0, 10)),
        ("xposedornot", BucketSettings::new(1.0, 1)),
        ("ip_api", BucketSettings::new(0.75, 5)),
        ("nominatim", BucketSettings::new(1.0, 1)),
        ("dns_google", BucketSettings::new(10.0, 10)),
        ("virustotal", BucketSettings::new(0.066, 4)),
        ("github_api", BucketSettings::new(1.0, 5)),
        ("wayback", BucketSettings::new(2.0, 2)),
        ("port_scan", BucketSettings::new(100.0, 100)),
    ]
    .into_iter()
    .map(|(name, bucket)| (name.to_string(), bucket))
    .collect()
}

impl RateLimitConfig {
    /// Build the process-wide limiter.
    pub fn build_limiter(&self) -> RateLimiter {
        self.providers
            .iter()
            .fold(RateLimiter::new(self.default.to_bucket()), |limiter, (name, bucket)| {
                limiter.with_bucket(name.clone(), bucket.to_bucket())
            })
    }
}

/// Provider API keys. Environment variables take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numverify: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipinfo: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virustotal: Option<String>,
}

impl ApiKeys {
    pub fn get(&self, provider: &str) -> Option<&str> {
        let key = match provider {
            "numverify" => &self.numverify,
            "ipinfo" => &self.ipinfo,
            "virustotal" => &self.virustotal,
            _ => return None,
        };
        key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// Apply `NUMVERIFY_API_KEY`, `IPINFO_API_KEY` and `VIRUSTOTAL_API_KEY`.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let slots = [
            ("NUMVERIFY_API_KEY", &mut self.numverify),
            ("IPINFO_API_KEY", &mut self.ipinfo),
            ("VIRUSTOTAL_API_KEY", &mut self.virustotal),
        ];
        for (var, slot) in slots {
            if let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) {
                *slot = Some(value);
            }
        }
        self
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Reject settings that would make every scan fail.
    pub fn validate(&self) -> Result<()> {
        if self.scan.module_timeout_secs == 0 {
            bail!("scan.module_timeout_secs must be greater than 0");
        }
        if self.network.request_timeout_secs == 0 {
            bail!("network.request_timeout_secs must be greater than 0");
        }
        for (name, bucket) in std::iter::once(("default", &self.rate_limits.default))
            .chain(self.rate_limits.providers.iter().map(|(k, v)| (k.as_str(), v)))
        {
            if !(bucket.requests_per_second > 0.0) || bucket.burst == 0 {
                bail!("rate limit '{}' needs a positive rate and burst", name);
            }
        }
        self.anonymity.transport().map(|_| ())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref formats) = args.format {
            self.general.formats = formats.clone();
        }
        if let Some(ref dir) = args.output_dir {
            self.general.output_dir = dir.display().to_string();
        }

        if let Some(timeout) = args.timeout {
            self.scan.module_timeout_secs = timeout;
        }
        if let Some(retries) = args.retries {
            self.scan.retries = retries;
        }

        // Proxy and Tor flags replace the configured transport
        if let Some(ref proxy) = args.proxy {
            self.anonymity.mode = match Transport::from_proxy_url(proxy) {
                Transport::Socks(_) => AnonymityMode::Socks,
                _ => AnonymityMode::Http,
            };
            self.anonymity.proxy_url = Some(proxy.clone());
        } else if args.tor {
            self.anonymity.mode = AnonymityMode::Tor;
        }

        // Flags always override
        if args.deep {
            self.scan.deep = true;
        }
        if args.command.active() {
            self.scan.active_ip_scan = true;
        }
        if args.anonymous {
            self.anonymity.require = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
