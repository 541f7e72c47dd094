//! Serial transport for AutoTQ devices
//!
//! The firmware talks 115200 8N1 without flow control over the ESP32-S3
//! USB-serial bridge. DTR and RTS are de-asserted right after opening;
//! toggling them resets the chip into the bootloader.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream,
    StopBits,
};
use tracing::{debug, trace, warn};

use autotq_core::constants::BAUD_RATE;

use crate::{Transport, error::*};

/// Error text that Windows and Linux use for a held or stale port handle
const BUSY_MARKERS: [&str; 6] = [
    "access is denied",
    "permission denied",
    "clearcommerror",
    "busy",
    "resource temporarily unavailable",
    "the semaphore timeout period has expired",
];

/// Serial transport for AutoTQ devices
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    stream: Option<SerialStream>,
    write_timeout: Duration,
}

impl SerialTransport {
    /// Create new serial transport at the firmware baud rate
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: BAUD_RATE,
            stream: None,
            write_timeout: Duration::from_secs(2),
        }
    }

    /// Set baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set write timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn open(&self) -> Result<SerialStream> {
        let mut stream = tokio_serial::new(&self.port_name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.write_timeout)
            .open_native_async()
            .map_err(|e| classify_open_error(&self.port_name, e))?;

        if let Err(e) = stream.write_data_terminal_ready(false) {
            debug!("{}: cannot clear DTR: {}", self.port_name, e);
        }
        if let Err(e) = stream.write_request_to_send(false) {
            debug!("{}: cannot clear RTS: {}", self.port_name, e);
        }

        Ok(stream)
    }
}

/// Map an open failure to a transient or permanent error
pub(crate) fn classify_open_error(port: &str, err: tokio_serial::Error) -> Error {
    let reason = err.to_string();

    if is_busy(&err.kind, &reason) {
        Error::PortBusy {
            port: port.to_string(),
            reason,
        }
    } else {
        Error::OpenFailed {
            port: port.to_string(),
            reason,
        }
    }
}

fn is_busy(kind: &tokio_serial::ErrorKind, reason: &str) -> bool {
    use std::io::ErrorKind as IoKind;
    use tokio_serial::ErrorKind;

    match kind {
        // Re-enumeration after a reset briefly removes the device node
        ErrorKind::NoDevice => true,
        ErrorKind::Io(IoKind::PermissionDenied | IoKind::WouldBlock | IoKind::TimedOut) => true,
        _ => {
            let reason = reason.to_lowercase();
            BUSY_MARKERS.iter().any(|marker| reason.contains(marker))
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        debug!("Opening {} at {} baud...", self.port_name, self.baud_rate);

        let stream = self.open()?;

        debug!("Opened {}", self.port_name);

        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing {}...", self.port_name);

            if let Err(e) = stream.clear(ClearBuffer::All) {
                debug!("{}: cannot clear buffers: {}", self.port_name, e);
            }
            // Dropping the stream releases the OS handle
            if let Err(e) = stream.flush().await {
                warn!("{}: flush on close failed: {}", self.port_name, e);
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        trace!("Sending {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        timeout(self.write_timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| Error::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)))??;

        Ok(())
    }

    async fn receive(&mut self, wait: Duration) -> Result<BytesMut> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let mut buf = BytesMut::with_capacity(1024);

        let n = timeout(wait, stream.read_buf(&mut buf))
            .await
            .map_err(|_| Error::ReadTimeout)?
            .map_err(Error::Io)?;

        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        trace!("Received {} bytes: {:02X?}", n, &buf[..n.min(32)]);

        Ok(buf)
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("Serial transport for {} dropped while still open", self.port_name);
        }
    }
}
