//! Serial port discovery
//!
//! Enumerates the serial ports the OS knows about and decides which of them
//! look like AutoTQ boards. Only [`Signature::Target`] ports are handed to
//! the bulk orchestrator; the others are listed for diagnostics.

use std::cmp::Ordering;
use std::fmt;

use tokio_serial::{SerialPortInfo, SerialPortType};
use tracing::debug;

use autotq_core::constants::{KNOWN_USB_IDS, SERIAL_KEYWORDS};

use crate::error::{Error, Result};

/// How closely a port matches an AutoTQ board
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signature {
    /// Known VID:PID or an ESP32 description
    Target,

    /// Looks like a USB serial adapter
    Generic,

    /// USB device with nothing recognizable
    Unknown,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Target => "target",
            Self::Generic => "serial",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// A serial port found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub signature: Signature,
}

impl PortCandidate {
    /// Port given explicitly by the operator, treated as a target
    pub fn manual(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            signature: Signature::Target,
        }
    }

    pub fn is_target(&self) -> bool {
        self.signature == Signature::Target
    }

    /// Human readable description (product, manufacturer)
    pub fn description(&self) -> String {
        match (&self.product, &self.manufacturer) {
            (Some(product), Some(manufacturer)) => format!("{} ({})", product, manufacturer),
            (Some(product), None) => product.clone(),
            (None, Some(manufacturer)) => manufacturer.clone(),
            (None, None) => "n/a".to_string(),
        }
    }
}

impl fmt::Display for PortCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.port_name, self.description())?;
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, " [VID:PID={:04X}:{:04X}]", vid, pid)?;
        }
        write!(f, " <{}>", self.signature)
    }
}

/// Rules deciding which ports count as AutoTQ boards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortFilter {
    pub usb_ids: Vec<(u16, u16)>,
    pub keywords: Vec<String>,
}

impl Default for PortFilter {
    fn default() -> Self {
        Self {
            usb_ids: KNOWN_USB_IDS.to_vec(),
            keywords: SERIAL_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl PortFilter {
    /// Classify a USB port
    ///
    /// Non-USB ports (built-in UARTs, Bluetooth, PCI) never carry AutoTQ
    /// boards and return `None`.
    pub fn classify(
        &self,
        vid: Option<u16>,
        pid: Option<u16>,
        manufacturer: Option<&str>,
        product: Option<&str>,
    ) -> Option<Signature> {
        let (vid, pid) = (vid?, pid?);
        let text = format!(
            "{} {}",
            product.unwrap_or_default(),
            manufacturer.unwrap_or_default()
        )
        .to_lowercase();

        if self.usb_ids.contains(&(vid, pid)) || text.contains("esp32") {
            Some(Signature::Target)
        } else if self.keywords.iter().any(|k| text.contains(&k.to_lowercase())) {
            Some(Signature::Generic)
        } else {
            Some(Signature::Unknown)
        }
    }

    /// Build a candidate from an OS port entry
    pub fn candidate(&self, info: &SerialPortInfo) -> Option<PortCandidate> {
        let SerialPortType::UsbPort(usb) = &info.port_type else {
            debug!("Skipping non-USB port {}", info.port_name);
            return None;
        };

        let signature = self.classify(
            Some(usb.vid),
            Some(usb.pid),
            usb.manufacturer.as_deref(),
            usb.product.as_deref(),
        )?;

        Some(PortCandidate {
            port_name: info.port_name.clone(),
            vid: Some(usb.vid),
            pid: Some(usb.pid),
            manufacturer: usb.manufacturer.clone(),
            product: usb.product.clone(),
            signature,
        })
    }

    /// Classify and order a set of OS port entries
    pub fn candidates(&self, ports: &[SerialPortInfo]) -> Vec<PortCandidate> {
        let mut found: Vec<PortCandidate> =
            ports.iter().filter_map(|info| self.candidate(info)).collect();

        found.sort_by(|a, b| compare_port_names(&a.port_name, &b.port_name));
        found.dedup_by(|a, b| a.port_name == b.port_name);
        found
    }
}

/// List every USB serial port with its classification
///
/// Failing to enumerate ports at all is the only discovery error.
pub fn scan(filter: &PortFilter) -> Result<Vec<PortCandidate>> {
    let ports = tokio_serial::available_ports().map_err(|e| Error::Discovery(e.to_string()))?;

    debug!("OS reports {} serial port(s)", ports.len());

    Ok(filter.candidates(&ports))
}

/// Ports eligible for provisioning, in a stable order
pub fn discover(filter: &PortFilter) -> Result<Vec<PortCandidate>> {
    Ok(scan(filter)?
        .into_iter()
        .filter(PortCandidate::is_target)
        .collect())
}

/// Order `COM3` before `COM10` and `/dev/ttyACM2` before `/dev/ttyACM10`
pub fn compare_port_names(a: &str, b: &str) -> Ordering {
    fn split(name: &str) -> (&str, Option<u64>) {
        let digits = name
            .bytes()
            .rev()
            .take_while(u8::is_ascii_digit)
            .count();
        let (prefix, number) = name.split_at(name.len() - digits);
        (prefix, number.parse().ok())
    }

    let (prefix_a, num_a) = split(a);
    let (prefix_b, num_b) = split(b);

    prefix_a
        .cmp(prefix_b)
        .then(num_a.cmp(&num_b))
        .then_with(|| a.cmp(b))
}
