//! Run configuration
//!
//! Loaded from TOML; every field has a default, so an empty file is valid.
//! Command line flags are applied on top by the binary.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use autotq_core::RetryPolicy;
use autotq_core::constants::{self, DEFAULT_REQUIRED_FILES, KNOWN_USB_IDS, SERIAL_KEYWORDS};
use autotq_transport::PortFilter;
use autotq_types::TransferSpeed;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the audio files
    pub audio_dir: PathBuf,

    pub speed: TransferSpeed,

    /// Files every device must end up with, sent in this order
    pub required_files: Vec<String>,

    /// Ask the device for its file list and skip files it already has
    pub skip_existing: bool,

    pub device: DeviceSettings,
    pub bulk: BulkSettings,
    pub discovery: DiscoverySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("audio"),
            speed: TransferSpeed::default(),
            required_files: DEFAULT_REQUIRED_FILES.iter().map(|f| f.to_string()).collect(),
            skip_existing: false,
            device: DeviceSettings::default(),
            bulk: BulkSettings::default(),
            discovery: DiscoverySettings::default(),
        }
    }
}

impl Config {
    /// Read and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.required_files.is_empty() {
            return Err(Error::Config("required_files is empty".into()));
        }

        let mut seen = HashSet::new();
        for name in &self.required_files {
            if name.trim().is_empty() {
                return Err(Error::Config("required_files contains an empty name".into()));
            }
            if name.contains('/') || name.contains('\\') {
                return Err(Error::Config(format!(
                    "required file '{}' must be a bare file name",
                    name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(Error::Config(format!("required file '{}' listed twice", name)));
            }
        }

        self.speed.profile().validate()?;
        self.device.validate()?;

        if self.discovery.usb_ids.is_empty() && self.discovery.keywords.is_empty() {
            return Err(Error::Config("discovery has neither usb_ids nor keywords".into()));
        }

        Ok(())
    }
}

/// Per-device connection and exchange settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSettings {
    pub baud_rate: u32,
    pub stabilize_ms: u64,
    pub response_timeout_ms: u64,
    pub max_lines_per_call: usize,
    pub open_attempts: usize,
    pub command_attempts: usize,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            baud_rate: constants::BAUD_RATE,
            stabilize_ms: constants::STABILIZE_MS,
            response_timeout_ms: constants::RESPONSE_TIMEOUT_MS,
            max_lines_per_call: constants::MAX_LINES_PER_CALL,
            open_attempts: constants::OPEN_ATTEMPTS,
            command_attempts: constants::COMMAND_ATTEMPTS,
        }
    }
}

impl DeviceSettings {
    pub fn stabilize(&self) -> Duration {
        Duration::from_millis(self.stabilize_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn open_policy(&self) -> RetryPolicy {
        RetryPolicy::port_open().with_max_attempts(self.open_attempts)
    }

    pub fn command_policy(&self) -> RetryPolicy {
        RetryPolicy::command().with_max_attempts(self.command_attempts)
    }

    fn validate(&self) -> Result<()> {
        let zero = [
            ("baud_rate", self.baud_rate == 0),
            ("response_timeout_ms", self.response_timeout_ms == 0),
            ("max_lines_per_call", self.max_lines_per_call == 0),
            ("open_attempts", self.open_attempts == 0),
            ("command_attempts", self.command_attempts == 0),
        ];

        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(Error::Config(format!("device.{} must be non-zero", field))),
            None => Ok(()),
        }
    }
}

/// Orchestrator timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulkSettings {
    pub stagger_ms: u64,
    pub rescan_delay_ms: u64,
    pub empty_scan_delay_ms: u64,

    /// Extra passes over failed files before a device is reported
    pub file_retries: usize,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            stagger_ms: constants::bulk::STAGGER_MS,
            rescan_delay_ms: constants::bulk::RESCAN_DELAY_MS,
            empty_scan_delay_ms: constants::bulk::EMPTY_SCAN_DELAY_MS,
            file_retries: constants::bulk::FILE_RETRIES,
        }
    }
}

impl BulkSettings {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn rescan_delay(&self) -> Duration {
        Duration::from_millis(self.rescan_delay_ms)
    }

    pub fn empty_scan_delay(&self) -> Duration {
        Duration::from_millis(self.empty_scan_delay_ms)
    }
}

/// Port classification rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverySettings {
    /// `[vid, pid]` pairs of target boards
    pub usb_ids: Vec<(u16, u16)>,
    pub keywords: Vec<String>,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            usb_ids: KNOWN_USB_IDS.to_vec(),
            keywords: SERIAL_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl DiscoverySettings {
    pub fn filter(&self) -> PortFilter {
        PortFilter {
            usb_ids: self.usb_ids.clone(),
            keywords: self.keywords.clone(),
        }
    }
}
