//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::Config;
use crate::models::{Query, QueryError, QueryType};
use crate::report::ExportFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CKSearch - concurrent OSINT scanner
///
/// Runs every applicable intelligence module against one target, merges
/// overlapping findings from different providers and exports the report.
///
/// Examples:
///   cksearch email someone@example.com
///   cksearch --format json,html domain example.com
///   cksearch --deep username johndoe
///   cksearch ip 8.8.8.8 --active
///   cksearch person "Jane Doe" --location Jakarta
///   cksearch --tor --anonymous social https://github.com/octocat
///   cksearch --format markdown convert output/email_20240501_120000.json
///   cksearch init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output formats (comma-separated): console, json, markdown, html, csv
    ///
    /// Example: --format json,html
    #[arg(long, global = true, value_name = "FORMATS", value_delimiter = ',')]
    pub format: Option<Vec<ExportFormat>>,

    /// Directory for report files
    #[arg(short, long, global = true, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .cksearch.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (errors only, no progress spinner)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Deep scan: more platforms and extra lookups
    #[arg(long, global = true)]
    pub deep: bool,

    /// Per-attempt module timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Retries for retryable module failures
    #[arg(long, global = true, value_name = "COUNT")]
    pub retries: Option<u32>,

    /// Refuse any provider call that is not anonymized
    #[arg(long, global = true)]
    pub anonymous: bool,

    /// Route traffic through a proxy (http://, https://, socks5://)
    #[arg(
        long,
        global = true,
        value_name = "URL",
        env = "CKSEARCH_PROXY",
        conflicts_with = "tor"
    )]
    pub proxy: Option<String>,

    /// Route traffic through the local Tor SOCKS port
    #[arg(long, global = true)]
    pub tor: bool,
}

/// What to investigate.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Phone number in international format (+62..., 0062...)
    Phone { target: String },

    /// Username to look up across platforms
    Username { target: String },

    /// Email address
    Email { target: String },

    /// Domain name or URL
    Domain { target: String },

    /// IP address or hostname
    Ip {
        target: String,

        /// Also probe common TCP ports
        #[arg(long)]
        active: bool,
    },

    /// Full name of a person
    Person {
        target: String,

        /// City or region to narrow the search
        #[arg(long, value_name = "PLACE")]
        location: Option<String>,
    },

    /// Local image path or image URL
    Image { target: String },

    /// Social media profile URL
    Social { target: String },

    /// Coordinates ("lat, lon") or an address
    Geo { target: String },

    /// Re-export a saved JSON report in other formats
    Convert {
        /// JSON report written by an earlier scan
        input: PathBuf,
    },

    /// Generate a default .cksearch.toml configuration file
    InitConfig,
}

impl Command {
    /// Query type and raw target, or `None` for commands that do not scan.
    pub fn target(&self) -> Option<(QueryType, &str)> {
        let (query_type, target) = match self {
            Command::Phone { target } => (QueryType::Phone, target),
            Command::Username { target } => (QueryType::Username, target),
            Command::Email { target } => (QueryType::Email, target),
            Command::Domain { target } => (QueryType::Domain, target),
            Command::Ip { target, .. } => (QueryType::Ip, target),
            Command::Person { target, .. } => (QueryType::Person, target),
            Command::Image { target } => (QueryType::Image, target),
            Command::Social { target } => (QueryType::Social, target),
            Command::Geo { target } => (QueryType::Geo, target),
            Command::Convert { .. } | Command::InitConfig => return None,
        };
        Some((query_type, target.as_str()))
    }

    /// True when `ip --active` was given.
    pub fn active(&self) -> bool {
        matches!(self, Command::Ip { active: true, .. })
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(retries) = self.retries {
            if retries > 10 {
                return Err("Retries must be 10 or fewer".to_string());
            }
        }

        if let Some(ref proxy) = self.proxy {
            let supported = ["http://", "https://", "socks5://", "socks5h://", "socks4://"];
            if !supported.iter().any(|scheme| proxy.starts_with(scheme)) {
                return Err(format!(
                    "Proxy URL must start with one of: {}",
                    supported.join(", ")
                ));
            }
        }

        if let Some(ref formats) = self.format {
            if formats.is_empty() {
                return Err("At least one output format is required".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Build the scan query. Mode flags come from the merged configuration.
    ///
    /// Returns `Ok(None)` for commands that do not scan.
    pub fn query(&self, config: &Config) -> Result<Option<Query>, QueryError> {
        let Some((query_type, target)) = self.command.target() else {
            return Ok(None);
        };

        let mut query = Query::new(query_type, target)?
            .with_flag("deep", config.scan.deep)
            .with_flag("anonymous", config.anonymity.require);

        if query_type == QueryType::Ip {
            query = query.with_flag("active", config.scan.active_ip_scan);
        }
        if let Command::Person {
            location: Some(location),
            ..
        } = &self.command
        {
            if !location.trim().is_empty() {
                query = query.with_option("location", location.trim());
            }
        }

        Ok(Some(query))
    }
}
