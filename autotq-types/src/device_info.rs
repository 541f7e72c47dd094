//! Device identity structures

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reply body of `get_status`
///
/// Firmware revisions disagree on field names, so both spellings are
/// accepted. Every field is optional; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(default, alias = "mac")]
    pub mac_address: Option<String>,

    #[serde(default, rename = "fw_version", alias = "version")]
    pub firmware_version: Option<String>,

    #[serde(default)]
    pub hw_version: Option<String>,

    /// Battery state of charge in percent
    #[serde(default)]
    pub battery_soc: Option<f64>,
}

/// Device information
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Serial port the device is attached to
    pub port: String,

    /// WiFi MAC address, the device's identity on the line
    pub mac_address: String,

    /// Firmware version
    pub firmware_version: Option<String>,

    /// Hardware revision
    pub hw_version: Option<String>,

    /// Battery state of charge in percent
    pub battery_soc: Option<f64>,
}

impl DeviceInfo {
    pub fn new(port: impl Into<String>, mac_address: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            mac_address: mac_address.into(),
            firmware_version: None,
            hw_version: None,
            battery_soc: None,
        }
    }

    /// Fill the optional fields from a status reply
    pub fn with_status(mut self, status: &DeviceStatus) -> Self {
        self.firmware_version = status.firmware_version.clone();
        self.hw_version = status.hw_version.clone();
        self.battery_soc = status.battery_soc;
        self
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device[{} MAC: {}, FW: {}",
            self.port,
            self.mac_address,
            self.firmware_version.as_deref().unwrap_or("unknown")
        )?;
        if let Some(hw) = &self.hw_version {
            write!(f, ", HW: {}", hw)?;
        }
        if let Some(soc) = self.battery_soc {
            write!(f, ", battery: {:.0}%", soc)?;
        }
        write!(f, "]")
    }
}
