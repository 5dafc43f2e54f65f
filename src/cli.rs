//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::Severity;
use clap::Parser;
use std::path::PathBuf;

/// horizon-scan - emerging health-signal scanner
///
/// Runs one surveillance query against the trend and incident feeds,
/// merges both into an event timeline with alerts and hotspots, and writes
/// a Markdown or JSON report.
///
/// Examples:
///   horizon-scan --query "kratom seizures teens"
///   horizon-scan --preset gray-market-weight-loss --format json
///   horizon-scan --preset viral-challenges --fail-on high
///   horizon-scan --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Free-text surveillance query
    #[arg(
        short = 'Q',
        long,
        value_name = "TEXT",
        required_unless_present_any = ["preset", "init_config"],
        conflicts_with = "preset"
    )]
    pub query: Option<String>,

    /// Run one of the canned surveillance queries
    #[arg(short, long, value_name = "NAME")]
    pub preset: Option<Preset>,

    /// Base URL of the trend and incident services
    ///
    /// Can also be set via HORIZON_SCAN_URL env var or .horizonscan.toml config.
    #[arg(long, value_name = "URL", env = "HORIZON_SCAN_URL")]
    pub base_url: Option<String>,

    /// Output file path for the report
    ///
    /// Default: from config or horizon_scan_report.md
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .horizonscan.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Longest silence tolerated on a stream, in seconds (0 disables)
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Fail if events at or above this severity are found
    ///
    /// Useful for scheduled scans. Exit code 2 when threshold is exceeded.
    /// Values: critical, high, medium, low
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .horizonscan.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Severity level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl From<FailOnLevel> for Severity {
    fn from(level: FailOnLevel) -> Self {
        match level {
            FailOnLevel::Low => Severity::Low,
            FailOnLevel::Medium => Severity::Medium,
            FailOnLevel::High => Severity::High,
            FailOnLevel::Critical => Severity::Critical,
        }
    }
}

/// Canned surveillance queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// Viral TikTok health challenges
    ViralChallenges,
    /// DIY medical treatments on Reddit
    DiyTreatments,
    /// Unregulated wellness products
    UnregulatedWellness,
    /// Gray market weight loss drugs
    GrayMarketWeightLoss,
    /// 3D printed medical devices
    PrintedDevices,
}

impl Preset {
    pub fn label(self) -> &'static str {
        match self {
            Preset::ViralChallenges => "Viral TikTok Health Challenges",
            Preset::DiyTreatments => "DIY Medical Treatments on Reddit",
            Preset::UnregulatedWellness => "Unregulated Wellness Products",
            Preset::GrayMarketWeightLoss => "Gray Market Weight Loss Drugs",
            Preset::PrintedDevices => "3D Printed Medical Devices",
        }
    }

    pub fn query(self) -> &'static str {
        match self {
            Preset::ViralChallenges => {
                "tiktok health challenges emergency room hospitalizations teens 2025"
            }
            Preset::DiyTreatments => "reddit DIY medical treatments home remedies hospitalizations",
            Preset::UnregulatedWellness => {
                "etsy amazon mushroom supplements peptides nootropics unregulated"
            }
            Preset::GrayMarketWeightLoss => {
                "ozempic alternatives overseas imports social media weight loss"
            }
            Preset::PrintedDevices => "3D printed dental aligners DIY medical devices home manufacturing",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The query to run: explicit text, else the preset's.
    pub fn effective_query(&self) -> Option<String> {
        self.query
            .as_deref()
            .map(str::trim)
            .map(str::to_string)
            .or_else(|| self.preset.map(|p| p.query().to_string()))
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        match self.effective_query() {
            Some(q) if !q.is_empty() => {}
            _ => return Err("Query must not be empty".to_string()),
        }

        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Base URL must start with 'http://' or 'https://'".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `verbose_by_default` comes from the config file; `--quiet` overrides it.
    pub fn log_level(&self, verbose_by_default: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || verbose_by_default {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
