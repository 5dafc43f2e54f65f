//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.horizonscan.toml` files.

use crate::feed::{ChannelSettings, Endpoints};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".horizonscan.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Upstream endpoint settings.
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Feed timing settings.
    #[serde(default)]
    pub feed: FeedConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "horizon_scan_report.md".to_string()
}

/// Where the trend and incident services live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Base URL shared by all four endpoints.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_trends_stream_path")]
    pub trends_stream_path: String,

    #[serde(default = "default_trends_fallback_path")]
    pub trends_fallback_path: String,

    #[serde(default = "default_incidents_stream_path")]
    pub incidents_stream_path: String,

    #[serde(default = "default_incidents_fallback_path")]
    pub incidents_fallback_path: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            trends_stream_path: default_trends_stream_path(),
            trends_fallback_path: default_trends_fallback_path(),
            incidents_stream_path: default_incidents_stream_path(),
            incidents_fallback_path: default_incidents_fallback_path(),
        }
    }
}

fn default_base_url() -> String {
    Endpoints::default().base_url
}

fn default_trends_stream_path() -> String {
    Endpoints::default().trends_stream
}

fn default_trends_fallback_path() -> String {
    Endpoints::default().trends_fallback
}

fn default_incidents_stream_path() -> String {
    Endpoints::default().incidents_stream
}

fn default_incidents_fallback_path() -> String {
    Endpoints::default().incidents_fallback
}

/// Feed timing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Connect timeout for every request, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Whole-request timeout for the one-shot fallback, in seconds.
    #[serde(default = "default_fallback_timeout")]
    pub fallback_timeout_seconds: u64,

    /// Longest silence tolerated on a stream, in seconds. 0 disables.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: default_connect_timeout(),
            fallback_timeout_seconds: default_fallback_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_fallback_timeout() -> u64 {
    300 // upstream search can take minutes
}

fn default_idle_timeout() -> u64 {
    120
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.horizonscan.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref base_url) = args.base_url {
            self.endpoints.base_url = base_url.clone();
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if let Some(idle) = args.idle_timeout {
            self.feed.idle_timeout_seconds = idle;
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Check values the CLI cannot check for a file-provided config.
    pub fn validate(&self) -> Result<()> {
        let url = &self.endpoints.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("Base URL must start with 'http://' or 'https://': {}", url);
        }
        if self.feed.connect_timeout_seconds == 0 || self.feed.fallback_timeout_seconds == 0 {
            bail!("Connect and fallback timeouts must be at least 1 second");
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            base_url: self.endpoints.base_url.clone(),
            trends_stream: self.endpoints.trends_stream_path.clone(),
            trends_fallback: self.endpoints.trends_fallback_path.clone(),
            incidents_stream: self.endpoints.incidents_stream_path.clone(),
            incidents_fallback: self.endpoints.incidents_fallback_path.clone(),
        }
    }

    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings::from_idle_seconds(self.feed.idle_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.connect_timeout_seconds)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.fallback_timeout_seconds)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.output, "horizon_scan_report.md");
        assert_eq!(config.feed.idle_timeout_seconds, 120);
        assert_eq!(
            config.endpoints().stream_url(crate::models::SourceKind::Trends),
            "http://localhost:8080/getHealthTrendsStream"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "weekly_scan.md"
verbose = true

[endpoints]
base_url = "https://scan.example.org"

[feed]
idle_timeout_seconds = 0
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "weekly_scan.md");
        assert!(config.general.verbose);
        assert_eq!(config.endpoints.base_url, "https://scan.example.org");
        assert_eq!(config.endpoints.trends_fallback_path, "/getHealthTrends");
        assert_eq!(config.feed.connect_timeout_seconds, 10);
        assert_eq!(config.channel_settings().idle_timeout, None);
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = Config::default();
        config.endpoints.base_url = "localhost:8080".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        let mut file = std::fs::File::create(dir.path().join(CONFIG_FILE)).unwrap();
        writeln!(file, "[feed]\nfallback_timeout_seconds = 45").unwrap();

        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.fallback_timeout(), Duration::from_secs(45));
        assert_eq!(config.feed.idle_timeout_seconds, 120);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[feed\nbroken").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[endpoints]"));
        assert!(toml_str.contains("[feed]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.feed.fallback_timeout_seconds, 300);
    }
}
