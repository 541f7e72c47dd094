//! Error types for autotq-core

/// Result type alias for autotq protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A line meant as a reply could not be decoded
    #[error("Malformed response: {line}")]
    MalformedResponse {
        command: Option<String>,
        line: String,
    },

    /// Unknown command name
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Invalid session state
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),
}
