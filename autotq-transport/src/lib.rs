//! Transport layer for the AutoTQ serial protocol
//!
//! Provides serial communication with devices and port discovery.

pub mod discovery;
pub mod error;
pub mod serial;

pub use discovery::{PortCandidate, PortFilter, Signature};
pub use error::{Error, Result};
pub use serial::SerialTransport;

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;

/// Transport trait for different communication methods
#[async_trait]
pub trait Transport: Send {
    /// Open the link
    async fn connect(&mut self) -> Result<()>;

    /// Release the link
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send raw bytes
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive whatever bytes arrive within `timeout`
    async fn receive(&mut self, timeout: Duration) -> Result<BytesMut>;

    /// Port name, e.g. `COM7` or `/dev/ttyACM0`
    fn port_name(&self) -> &str;
}
