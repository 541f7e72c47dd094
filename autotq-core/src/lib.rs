//! # autotq-core
//!
//! Core protocol implementation for AutoTQ serial devices.
//!
//! This crate provides the low-level protocol primitives:
//! - Command names and JSON request encoding
//! - Line framing and response decoding
//! - CRC32 calculation
//! - Session state and retry schedules
//! - Protocol constants

pub mod checksum;
pub mod command;
pub mod constants;
pub mod error;
pub mod line;
pub mod retry;
pub mod session;

pub use command::{Command, Request};
pub use error::{Error, Result};
pub use line::{Line, LineBuffer, Response};
pub use retry::RetryPolicy;
pub use session::{Session, SessionState};

/// Line terminator for requests and replies
pub const LINE_TERMINATOR: u8 = b'\n';
