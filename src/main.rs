//! horizon-scan - emerging health-signal scanner
//!
//! Runs one surveillance query against the trend and incident feeds and
//! writes the merged picture as a report.
//!
//! Exit codes:
//!   0 - Success (no events above threshold, or no --fail-on set)
//!   1 - Runtime error (config, connection, report writing, etc.)
//!   2 - Events found at or above --fail-on threshold

use anyhow::{Context, Result};
use chrono::Utc;
use horizon_scan::aggregation::{AggregationCoordinator, BranchStatus, ScanSnapshot};
use horizon_scan::cli::{Args, OutputFormat};
use horizon_scan::config::{Config, CONFIG_FILE};
use horizon_scan::feed::HttpTransport;
use horizon_scan::models::{Severity, SourceKind};
use horizon_scan::report::{self, BranchOutcome, ScanMetadata, ScanReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
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

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config comes first so its verbose default can shape logging
    let (mut config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(&args, &config);

    info!("horizon-scan v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    match origin {
        ConfigOrigin::File(path) => info!("Loaded config from {}", path.display()),
        ConfigOrigin::Defaults => debug!("No config file found, using defaults"),
        ConfigOrigin::Unreadable(e) => warn!("Failed to load config: {:#}", e),
    }

    match run_scan(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Scan failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .horizonscan.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to point at your services and tune feed timeouts.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let level = args.log_level(config.general.verbose);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run one scan end to end. Returns exit code (0 or 2).
async fn run_scan(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    config.validate()?;

    let query = args.effective_query().context("No query given")?;

    if let Some(preset) = args.preset {
        println!("🧭 Preset: {}", preset.label());
    }
    println!("🔎 Scanning: {}", query);
    println!("   Services: {}", config.endpoints.base_url);
    match config.channel_settings().idle_timeout {
        Some(limit) => println!("   Idle timeout: {}s", limit.as_secs()),
        None => println!("   Idle timeout: disabled"),
    }

    let transport = HttpTransport::new(
        config.endpoints(),
        config.connect_timeout(),
        config.fallback_timeout(),
    )?;
    let mut coordinator =
        AggregationCoordinator::new(Arc::new(transport), config.channel_settings());

    let progress = (!args.quiet).then(|| spawn_progress(coordinator.subscribe()));
    let generation = coordinator.submit_query(&query)?;

    let view = coordinator
        .wait_for_merge()
        .await
        .context("Scan stopped before both sources finished")?;

    if let Some((bar, task)) = progress {
        task.abort();
        bar.finish_and_clear();
    }

    let metadata = ScanMetadata {
        query,
        generation,
        scan_date: coordinator.lifecycle().started_at().unwrap_or_else(Utc::now),
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };
    let branches = vec![
        BranchOutcome::from_state(SourceKind::Trends, coordinator.trends()),
        BranchOutcome::from_state(SourceKind::Incidents, coordinator.incidents()),
    ];
    let report = ScanReport::new(metadata, branches, view);

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    let output_path = PathBuf::from(&config.general.output);
    report::save_report(&output, &output_path)?;

    print_summary(&report);
    println!(
        "\n✅ Scan complete! Report saved to: {}",
        output_path.display()
    );

    // Check --fail-on threshold
    if let Some(fail_level) = args.fail_on {
        let threshold = Severity::from(fail_level);
        if report.summary.at_or_above(&threshold) > 0 {
            eprintln!(
                "\n⛔ Events found at or above {:?} severity. Failing (exit code 2).",
                fail_level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

fn print_summary(report: &ScanReport) {
    let summary = &report.summary;

    println!("\n📊 Scan Summary:");
    for branch in &report.branches {
        match branch.status {
            BranchStatus::Error => println!(
                "   ⚠️  {}: error ({})",
                branch.label,
                branch.error.as_deref().unwrap_or("unknown")
            ),
            status => println!("   {}: {} ({} results)", branch.label, status, branch.results),
        }
    }
    println!("   Events: {} | Alerts: {}", summary.events, summary.alerts);
    println!(
        "   - 🔴 Critical: {} | 🟠 High: {} | 🟡 Medium: {} | 🟢 Low: {}",
        summary.critical, summary.high, summary.medium, summary.low
    );
    println!(
        "   Hotspots: {} across {} states | People affected: {}",
        summary.active_hotspots, summary.states, summary.total_affected
    );
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
}

/// Spinner fed from the coordinator's snapshots.
fn spawn_progress(mut snapshots: watch::Receiver<ScanSnapshot>) -> (ProgressBar, JoinHandle<()>) {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message("connecting...");

    let handle = bar.clone();
    let task = tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let message = {
                let snapshot = snapshots.borrow_and_update();
                format!(
                    "trends: {} ({}) | incidents: {} ({})",
                    snapshot.trends.status,
                    snapshot.trends.received(),
                    snapshot.incidents.status,
                    snapshot.incidents.received()
                )
            };
            handle.set_message(message);
        }
    });

    (bar, task)
}

/// Where the effective configuration came from.
enum ConfigOrigin {
    File(PathBuf),
    Defaults,
    Unreadable(anyhow::Error),
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is up, so the origin is reported back instead of logged.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::File(config_path.clone())));
    }

    // Try default location
    Ok(match Config::load_default() {
        Ok(Some(config)) => (config, ConfigOrigin::File(PathBuf::from(CONFIG_FILE))),
        Ok(None) => (Config::default(), ConfigOrigin::Defaults),
        Err(e) => (Config::default(), ConfigOrigin::Unreadable(e)),
    })
}
