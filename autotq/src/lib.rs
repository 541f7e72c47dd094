//! # autotq
//!
//! Provisioning toolkit for AutoTQ devices on the manufacturing line.
//!
//! ## Features
//!
//! - Line-delimited JSON command exchange over USB serial
//! - Chunked audio file transfer with CRC32 verification
//! - Parallel provisioning of every attached device
//! - Async/await API using Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use autotq::{Device, SpeedProfile, TransferJob};
//!
//! #[tokio::main]
//! async fn main() -> autotq::Result<()> {
//!     let mut device = Device::new("/dev/ttyACM0");
//!     device.connect().await?;
//!
//!     let info = device.device_info().await?;
//!     println!("{}", info);
//!
//!     let mut job = TransferJob::new("audio", ["inflating.wav"], SpeedProfile::default());
//!     job.run(&mut device).await?;
//!
//!     device.close().await;
//!     Ok(())
//! }
//! ```

pub mod bulk;
pub mod cancel;
pub mod config;
pub mod device;
pub mod error;
pub mod transfer;

#[cfg(test)]
pub(crate) mod fake;

// Re-exports
pub use bulk::{BulkTransfer, Connector, RunTally};
pub use cancel::CancelFlag;
pub use config::Config;
pub use device::Device;
pub use error::{Error, Result};
pub use transfer::{LocalFiles, TransferJob, check_local_files, send_file};

// Re-export types
pub use autotq_core::{Command, Request, Response, Session, SessionState};
pub use autotq_transport::{PortCandidate, Signature};
pub use autotq_types::{
    BatchSummary, DeviceInfo, DeviceOutcome, DeviceReport, DeviceStatus, FileReport, FileStatus,
    SpeedProfile, TransferSpeed,
};
