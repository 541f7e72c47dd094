//! High-level error types

use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] autotq_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] autotq_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] autotq_types::Error),

    /// Port could not be opened after all retries
    #[error("Port {port} unavailable after {attempts} attempt(s): {reason}")]
    PortUnavailable {
        port: String,
        attempts: usize,
        reason: String,
    },

    #[error("No reply to {command} within {timeout_ms} ms")]
    ResponseTimeout { command: String, timeout_ms: u64 },

    #[error("Malformed reply to {command}: {line}")]
    MalformedResponse { command: String, line: String },

    #[error("CRC mismatch for {filename}: local 0x{local:08X}, device {device}")]
    CrcMismatch {
        filename: String,
        local: u32,
        device: String,
    },

    #[error("Write failed: {0}")]
    WriteIo(#[source] autotq_transport::Error),

    #[error("Device rejected {filename}: {reply}")]
    TransferRejected { filename: String, reply: String },

    #[error("Device aborted {filename}: {reason}")]
    TransferAborted { filename: String, reason: String },

    #[error("Device not ready for {filename} within {timeout_ms} ms")]
    ReadyTimeout { filename: String, timeout_ms: u64 },

    #[error("No completion for {filename} within {timeout_ms} ms")]
    AckTimeout { filename: String, timeout_ms: u64 },

    #[error("Cannot read {}: {source}", .path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Device not connected")]
    NotConnected,

    #[error("Invalid response from device: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if a query command should be sent again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResponseTimeout { .. } | Self::MalformedResponse { .. }
        )
    }

    /// Check if the error ends the device's job rather than a single file
    pub fn is_device_fatal(&self) -> bool {
        match self {
            Self::PortUnavailable { .. } | Self::NotConnected | Self::Cancelled => true,
            Self::Transport(e) => matches!(
                e,
                autotq_transport::Error::NotConnected | autotq_transport::Error::ConnectionClosed
            ),
            Self::WriteIo(e) => matches!(e, autotq_transport::Error::ConnectionClosed),
            _ => false,
        }
    }
}
