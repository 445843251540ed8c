//! Configuration management
//!
//! This module handles loading configuration from TOML files. Every section
//! and field has a default, so an empty or missing file is a valid setup.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::CapabilityTier;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Access point settings
    #[serde(default)]
    pub hotspot: HotspotConfig,

    /// Captive portal HTTP server settings
    #[serde(default)]
    pub portal: PortalConfig,

    /// Network change monitoring settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Login audit storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Capability tier selection: detected at startup or pinned in config
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TierSetting {
    #[default]
    Auto,
    Managed,
    LegacyManual,
    Unsupported,
}

impl TierSetting {
    /// The pinned tier, or None when it has to be detected
    pub fn pinned(&self) -> Option<CapabilityTier> {
        match self {
            Self::Auto => None,
            Self::Managed => Some(CapabilityTier::Managed),
            Self::LegacyManual => Some(CapabilityTier::LegacyManual),
            Self::Unsupported => Some(CapabilityTier::Unsupported),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HotspotConfig {
    /// Requested network name
    #[serde(default = "default_ssid")]
    pub ssid: String,

    /// Requested WPA passphrase
    #[serde(default = "default_passphrase")]
    pub passphrase: String,

    #[serde(default)]
    pub tier: TierSetting,

    /// Seconds to wait for the platform's first start callback
    #[serde(default = "default_start_timeout")]
    pub start_timeout: u64,

    /// NetworkManager connection profile used for the access point
    #[serde(default = "default_connection_name")]
    pub connection_name: String,

    /// Wireless device to host the access point on (platform picks if unset)
    #[serde(default)]
    pub interface: Option<String>,
}

impl HotspotConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout)
    }
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            ssid: default_ssid(),
            passphrase: default_passphrase(),
            tier: TierSetting::default(),
            start_timeout: default_start_timeout(),
            connection_name: default_connection_name(),
            interface: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    /// Address the portal listens on
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Fixed portal port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Secret the primary login form is checked against
    #[serde(default = "default_reference_secret")]
    pub reference_secret: String,

    /// Directory to load pages from instead of the embedded ones
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl PortalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            reference_secret: default_reference_secret(),
            assets_dir: None,
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    /// Seconds between network state polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Interface names matching this pattern are treated as the access point
    #[serde(default = "default_ap_interface_pattern")]
    pub ap_interface_pattern: String,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval.max(1))
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            ap_interface_pattern: default_ap_interface_pattern(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// SQLite file for the login audit trail
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("hotspot-gate")
                .join("attempts.db")
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_ssid() -> String {
    "MyDeviceHotspot".to_string()
}

fn default_passphrase() -> String {
    "password123".to_string()
}

fn default_start_timeout() -> u64 {
    30
}

fn default_connection_name() -> String {
    "Hotspot".to_string()
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_reference_secret() -> String {
    "password123".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2
}

fn default_ap_interface_pattern() -> String {
    "ap|hotspot".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the given file, the first standard location
    /// that exists, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let config_paths = vec![
            PathBuf::from("hotspot-gate.toml"),
            PathBuf::from("/etc/hotspot-gate/config.toml"),
            dirs::home_dir()
                .map(|h| h.join(".config/hotspot-gate/config.toml"))
                .unwrap_or_default(),
        ];

        for path in &config_paths {
            if path.is_file() {
                return Self::from_file(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
