//! Transfer results
//!
//! Reports are built by the workers and folded into a [`BatchSummary`] once
//! every worker has joined.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};

/// Status of one required file on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Not attempted yet
    Pending,

    /// Sent and acknowledged by the device
    Transferred { bytes: u64, crc32: u32 },

    /// Device already had the file
    AlreadyPresent,

    /// Attempted and failed
    Failed { reason: String },

    /// Skipped because the run was interrupted
    Cancelled,
}

impl FileStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Transferred { .. } | Self::AlreadyPresent)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Transferred { bytes, crc32 } => {
                write!(f, "ok ({} bytes, CRC32 0x{:08X})", bytes, crc32)
            }
            Self::AlreadyPresent => write!(f, "already present"),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub filename: String,
    pub status: FileStatus,

    /// Number of times the file was sent
    pub attempts: u32,

    /// Time spent on the last attempt
    pub duration: Duration,
}

impl FileReport {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Pending,
            attempts: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if a retry pass should send this file again
    pub fn needs_retry(&self) -> bool {
        matches!(
            self.status,
            FileStatus::Pending | FileStatus::Failed { .. } | FileStatus::Cancelled
        )
    }
}

/// Overall result for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOutcome {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for DeviceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        };
        f.pad(label)
    }
}

/// Result for one device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub port: String,
    pub mac_address: Option<String>,
    pub firmware_version: Option<String>,
    pub files: Vec<FileReport>,

    /// Device-level failure (port unavailable, worker crash, ...)
    pub error: Option<String>,

    pub duration: Duration,
}

impl DeviceReport {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            mac_address: None,
            firmware_version: None,
            files: Vec::new(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    /// Report for a device that never got to transfer anything
    pub fn failed(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::new(port)
        }
    }

    pub fn with_files(mut self, files: Vec<FileReport>) -> Self {
        self.files = files;
        self
    }

    pub fn outcome(&self) -> DeviceOutcome {
        let succeeded = self.succeeded_count();

        if self.error.is_none() && succeeded == self.files.len() {
            DeviceOutcome::Success
        } else if succeeded > 0 {
            DeviceOutcome::Partial
        } else {
            DeviceOutcome::Failed
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == DeviceOutcome::Success
    }

    pub fn succeeded_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.files.len() - self.succeeded_count()
    }

    /// Device error first, then one line per failed or cancelled file
    pub fn failure_reasons(&self) -> Vec<String> {
        self.error
            .iter()
            .cloned()
            .chain(
                self.files
                    .iter()
                    .filter(|f| !f.is_success() && f.status != FileStatus::Pending)
                    .map(|f| format!("{}: {}", f.filename, f.status)),
            )
            .collect()
    }
}

/// Results of one batch, in dispatch order
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    pub devices: Vec<DeviceReport>,
}

impl BatchSummary {
    pub fn new(started_at: DateTime<Local>, duration: Duration, devices: Vec<DeviceReport>) -> Self {
        Self {
            started_at,
            duration,
            devices,
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn count(&self, outcome: DeviceOutcome) -> usize {
        self.devices
            .iter()
            .filter(|d| d.outcome() == outcome)
            .count()
    }

    pub fn success_count(&self) -> usize {
        self.count(DeviceOutcome::Success)
    }

    /// True when every device succeeded; an empty batch is not a success
    pub fn all_succeeded(&self) -> bool {
        !self.devices.is_empty() && self.devices.iter().all(DeviceReport::is_success)
    }

    /// Total files sent or found present across devices
    pub fn files_succeeded(&self) -> usize {
        self.devices.iter().map(DeviceReport::succeeded_count).sum()
    }

    pub fn files_failed(&self) -> usize {
        self.devices.iter().map(DeviceReport::failed_count).sum()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Batch started {} took {:.1}s",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.duration.as_secs_f64()
        )?;
        writeln!(
            f,
            "Devices: {} | success: {} | partial: {} | failed: {}",
            self.device_count(),
            self.success_count(),
            self.count(DeviceOutcome::Partial),
            self.count(DeviceOutcome::Failed)
        )?;
        writeln!(
            f,
            "Files: {} ok | {} failed",
            self.files_succeeded(),
            self.files_failed()
        )?;

        for device in &self.devices {
            writeln!(
                f,
                "  {:<14} {:<18} {:<8} {}/{} files  {:.1}s",
                device.port,
                device.mac_address.as_deref().unwrap_or("-"),
                device.outcome(),
                device.succeeded_count(),
                device.files.len(),
                device.duration.as_secs_f64()
            )?;
            for reason in device.failure_reasons() {
                writeln!(f, "      - {}", reason)?;
            }
        }

        Ok(())
    }
}
