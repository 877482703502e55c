//! CKSearch - concurrent OSINT scanner
//!
//! Runs the intelligence modules that apply to a target under a shared
//! rate-limit and anonymity policy, merges their findings and exports
//! the report.
//!
//! Exit codes:
//!   0 - Scan completed or partially completed
//!   1 - Invalid input or runtime error (config, proxy, output, etc.)
//!   2 - Scan failed: no module produced a result

mod analysis;
mod cli;
mod config;
mod models;
mod modules;
mod net;
mod orchestrator;
mod registry;
mod report;

use anyhow::{Context, Result};
use cli::Args;
use config::{Config, CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use models::ScanStatus;
use net::AnonymityRouter;
use orchestrator::{Orchestrator, ScanPolicy};
use registry::ModuleRegistry;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, cli::Command::InitConfig) {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("CKSearch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let outcome = match args.command {
        cli::Command::Convert { ref input } => handle_convert(&args, input),
        _ => run_scan(args).await,
    };

    match outcome {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Scan failed: {}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .cksearch.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set API keys, rate limits, proxy and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run one scan and export it. Returns the exit code (0 or 2).
async fn run_scan(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    let query = args
        .query(&config)?
        .context("No scan target given")?;

    let keys = config.api_keys.clone().with_env_overrides();
    let transport = config.anonymity.transport()?;
    let router = AnonymityRouter::new(
        transport.clone(),
        config.network.request_timeout(),
        &config.network.user_agent,
    )?;
    let registry = ModuleRegistry::standard(&config.scan).context("Invalid module registry")?;

    let modules = registry.module_names(query.query_type());
    println!("🔎 {} scan: {}", query.query_type(), query.value());
    println!("   Modules: {}", modules.join(", "));
    println!("   Transport: {}", transport);
    if query.flag("deep") {
        println!("   Mode: deep");
    }

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        Arc::new(config.rate_limits.build_limiter()),
        Arc::new(router),
        Arc::new(keys),
        ScanPolicy::from_config(&config),
    ));

    // Ctrl-C cancels the scan; the report still gets written
    let canceller = orchestrator.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Cancelling scan...");
            canceller.cancel_scan();
        }
    });

    let spinner = (!args.quiet).then(|| scan_spinner(modules.len()));
    let report = orchestrator.start_scan(query).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    debug!("Orchestrator finished in state {:?}", orchestrator.state());
    ctrl_c.abort();

    export_report(&report, &config)?;

    println!(
        "\n{} Scan {} in {:.1}s ({}/{} modules)",
        report.status().emoji(),
        report.status(),
        start_time.elapsed().as_secs_f64(),
        report.succeeded_modules().len(),
        report.eligible_modules()
    );

    if report.status() == ScanStatus::Failed {
        eprintln!("\n⛔ No module produced a result (exit code 2).");
        return Ok(2);
    }

    Ok(0)
}

/// Handle convert: decode a saved JSON report and export it again.
fn handle_convert(args: &Args, input: &Path) -> Result<i32> {
    let mut config = load_config(args)?;
    config.merge_with_args(args);

    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read report: {}", input.display()))?;
    let report = report::json::decode_json(&content)?;
    info!(
        "Loaded {} report with {} fields",
        report.query().query_type(),
        report.fields().len()
    );

    export_report(&report, &config)?;
    Ok(0)
}

/// Write the report in every configured format; console output goes to stdout.
fn export_report(report: &models::Report, config: &Config) -> Result<()> {
    let mut formats = config.general.formats.clone();
    formats.sort();
    formats.dedup();

    let output_dir = Path::new(&config.general.output_dir);
    for format in formats {
        if !format.writes_file() {
            print!("{}", report::render(report, format)?);
            continue;
        }
        let path = report::write_report(report, format, output_dir)?;
        println!("📄 Saved {} report: {}", format, path.display());
    }

    Ok(())
}

fn scan_spinner(modules: usize) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("Running {} modules...", modules));
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
