//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    /// Port exists but is held elsewhere or has a stale handle
    #[error("Port {port} busy: {reason}")]
    PortBusy { port: String, reason: String },

    #[error("Cannot open {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Read timeout")]
    ReadTimeout,

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("Cannot enumerate serial ports: {0}")]
    Discovery(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Check if reopening the port later might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PortBusy { .. } | Self::ReadTimeout => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::PermissionDenied
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}
