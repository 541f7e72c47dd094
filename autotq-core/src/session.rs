//! Device session tracking
//!
//! A session represents one worker's claim on a serial port and tracks:
//! - Port name and baud rate
//! - Connection state
//! - Identity retrieved from the device (MAC address, firmware version)

use std::sync::Arc;

use crate::constants::BAUD_RATE;
use crate::error::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Port not open
    Disconnected,

    /// Opening the port
    Connecting,

    /// Port open and device answering
    Connected,

    /// A file transfer is running
    Transferring,

    /// Transfer job finished
    Done,

    /// Unrecoverable error on this device
    Error,
}

/// Session manager
///
/// Thread-safe and can be cloned cheaply (Arc internally), so a status
/// display can watch a worker's session.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    port: String,
    baud_rate: u32,
    state: parking_lot::RwLock<SessionState>,
    identity: parking_lot::RwLock<Identity>,
}

#[derive(Debug, Default, Clone)]
struct Identity {
    mac_address: Option<String>,
    firmware_version: Option<String>,
}

impl Session {
    /// Create a new disconnected session for `port`
    pub fn new(port: impl Into<String>) -> Self {
        Self::with_baud_rate(port, BAUD_RATE)
    }

    pub fn with_baud_rate(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                port: port.into(),
                baud_rate,
                state: parking_lot::RwLock::new(SessionState::Disconnected),
                identity: parking_lot::RwLock::new(Identity::default()),
            }),
        }
    }

    pub fn port(&self) -> &str {
        &self.inner.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.inner.baud_rate
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Check if the port is open
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Connected | SessionState::Transferring | SessionState::Done
        )
    }

    /// Start opening the port
    pub fn begin_connect(&self) -> Result<()> {
        self.transition(
            &[SessionState::Disconnected, SessionState::Error],
            SessionState::Connecting,
        )
    }

    /// Port opened and stabilized
    pub fn mark_connected(&self) -> Result<()> {
        self.transition(&[SessionState::Connecting], SessionState::Connected)
    }

    /// Start (or resume) sending files
    pub fn begin_transfer(&self) -> Result<()> {
        self.transition(
            &[
                SessionState::Connected,
                SessionState::Transferring,
                SessionState::Done,
            ],
            SessionState::Transferring,
        )
    }

    /// All files processed
    pub fn mark_done(&self) -> Result<()> {
        self.transition(
            &[SessionState::Connected, SessionState::Transferring],
            SessionState::Done,
        )
    }

    /// Record an unrecoverable error; valid from any state
    pub fn mark_error(&self) {
        *self.inner.state.write() = SessionState::Error;
    }

    /// Port released
    ///
    /// Keeps `Error` so a failed session stays distinguishable after cleanup.
    pub fn close(&self) {
        let mut state = self.inner.state.write();
        if *state != SessionState::Error {
            *state = SessionState::Disconnected;
        }
    }

    pub fn mac_address(&self) -> Option<String> {
        self.inner.identity.read().mac_address.clone()
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.inner.identity.read().firmware_version.clone()
    }

    /// Store identity fields reported by the device
    ///
    /// `None` leaves an already known value in place.
    pub fn set_identity(&self, mac_address: Option<String>, firmware_version: Option<String>) {
        let mut identity = self.inner.identity.write();
        if mac_address.is_some() {
            identity.mac_address = mac_address;
        }
        if firmware_version.is_some() {
            identity.firmware_version = firmware_version;
        }
    }

    fn transition(&self, from: &[SessionState], to: SessionState) -> Result<()> {
        let mut state = self.inner.state.write();

        if !from.contains(&*state) {
            return Err(Error::InvalidSessionState(format!(
                "{}: cannot move from {:?} to {:?}",
                self.inner.port, *state, to
            )));
        }

        *state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new() {
        let session = Session::new("/dev/ttyACM0");
        assert_eq!(session.port(), "/dev/ttyACM0");
        assert_eq!(session.baud_rate(), 115_200);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());
        assert_eq!(session.mac_address(), None);
    }

    #[test]
    fn test_session_lifecycle() {
        let session = Session::new("COM7");

        session.begin_connect().unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(!session.is_connected());

        session.mark_connected().unwrap();
        session.begin_transfer().unwrap();
        assert_eq!(session.state(), SessionState::Transferring);
        assert!(session.is_connected());

        session.mark_done().unwrap();
        assert_eq!(session.state(), SessionState::Done);

        session.close();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_retry_after_done() {
        let session = Session::new("COM7");
        session.begin_connect().unwrap();
        session.mark_connected().unwrap();
        session.mark_done().unwrap();

        // Re-running failed files resumes transferring
        session.begin_transfer().unwrap();
        assert_eq!(session.state(), SessionState::Transferring);
    }

    #[test]
    fn test_invalid_state_transitions() {
        let session = Session::new("COM7");

        // Cannot transfer without connecting
        assert!(session.begin_transfer().is_err());
        assert!(session.mark_connected().is_err());

        // Cannot connect twice
        session.begin_connect().unwrap();
        assert!(session.begin_connect().is_err());
    }

    #[test]
    fn test_error_survives_close() {
        let session = Session::new("COM7");
        session.begin_connect().unwrap();
        session.mark_error();
        session.close();

        assert_eq!(session.state(), SessionState::Error);

        // A new attempt is allowed from Error
        session.begin_connect().unwrap();
    }

    #[test]
    fn test_identity_merge() {
        let session = Session::new("COM7");
        session.set_identity(Some("AA:BB:CC:DD:EE:FF".into()), None);
        session.set_identity(None, Some("1.4.2".into()));

        assert_eq!(session.mac_address().as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(session.firmware_version().as_deref(), Some("1.4.2"));
    }

    #[test]
    fn test_session_clone() {
        let session1 = Session::new("COM7");
        let session2 = session1.clone();

        session1.begin_connect().unwrap();

        // Both share same state
        assert_eq!(session2.state(), SessionState::Connecting);
    }
}
