//! Type definitions for AutoTQ provisioning

pub mod device_info;
pub mod error;
pub mod report;
pub mod speed;

pub use device_info::{DeviceInfo, DeviceStatus};
pub use error::{Error, Result};
pub use report::{BatchSummary, DeviceOutcome, DeviceReport, FileReport, FileStatus};
pub use speed::{SpeedProfile, TransferSpeed};
