//! AutoTQ serial command definitions
//!
//! Every request is a single JSON object terminated by `\n`. The device echoes
//! the `command` field in its reply, which is how replies are correlated.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Protocol commands understood by the AutoTQ firmware
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    // Device information
    WifiGetMac,
    GetStatus,
    Ping,

    // Storage
    ListFiles,
    ListMissingAudio,

    // Data transfer
    DownloadFile,
}

impl Command {
    /// All known commands
    pub const ALL: [Command; 6] = [
        Self::WifiGetMac,
        Self::GetStatus,
        Self::Ping,
        Self::ListFiles,
        Self::ListMissingAudio,
        Self::DownloadFile,
    ];

    /// Wire name of the command
    pub fn name(self) -> &'static str {
        match self {
            Self::WifiGetMac => "wifi_get_mac",
            Self::GetStatus => "get_status",
            Self::Ping => "ping",
            Self::ListFiles => "list_files",
            Self::ListMissingAudio => "list_missing_audio",
            Self::DownloadFile => "download_file",
        }
    }

    /// Check if the command starts a binary data phase
    pub fn starts_binary_transfer(self) -> bool {
        matches!(self, Self::DownloadFile)
    }

    /// Check if the command only reads device state
    pub fn is_query(self) -> bool {
        !self.starts_binary_transfer()
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|cmd| cmd.name() == s)
            .ok_or_else(|| Error::UnknownCommand(s.to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A request line sent to the device
///
/// # Examples
///
/// ```
/// use autotq_core::{Command, Request};
///
/// let request = Request::new(Command::DownloadFile)
///     .with_field("filename", "inflating.wav")
///     .with_field("size", 2048);
///
/// let line = request.encode();
/// assert!(line.ends_with(b"\n"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub command: Command,
    pub params: Map<String, Value>,
}

impl Request {
    /// Create a request with no parameters
    pub fn new(command: Command) -> Self {
        Self {
            command,
            params: Map::new(),
        }
    }

    /// Add a parameter
    ///
    /// A `command` key is ignored; the command name always wins.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "command" {
            self.params.insert(key, value.into());
        }
        self
    }

    /// The request as a JSON object
    pub fn to_json(&self) -> Value {
        let mut object = Map::with_capacity(self.params.len() + 1);
        object.insert("command".into(), Value::from(self.command.name()));
        for (key, value) in &self.params {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }

    /// Encode as a newline-terminated line
    pub fn encode(&self) -> BytesMut {
        let json = self.to_json().to_string();
        let mut buf = BytesMut::with_capacity(json.len() + 1);
        buf.put_slice(json.as_bytes());
        buf.put_u8(crate::LINE_TERMINATOR);
        buf
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_names() {
        assert_eq!(Command::WifiGetMac.name(), "wifi_get_mac");
        assert_eq!(Command::DownloadFile.to_string(), "download_file");
    }

    #[test]
    fn test_command_from_str() {
        for cmd in Command::ALL {
            assert_eq!(cmd.name().parse::<Command>().unwrap(), cmd);
        }
    }

    #[test]
    fn test_unknown_command() {
        let result = "format_flash".parse::<Command>();
        assert!(matches!(result, Err(Error::UnknownCommand(name)) if name == "format_flash"));
    }

    #[test]
    fn test_command_kinds() {
        assert!(Command::DownloadFile.starts_binary_transfer());
        assert!(Command::ListFiles.is_query());
        assert!(!Command::DownloadFile.is_query());
    }

    #[test]
    fn test_request_encode() {
        let line = Request::new(Command::GetStatus).encode();
        assert_eq!(&line[..], b"{\"command\":\"get_status\"}\n");
    }

    #[test]
    fn test_request_fields() {
        let request = Request::new(Command::DownloadFile)
            .with_field("filename", "tightenStrap.wav")
            .with_field("size", 4096)
            .with_field("chunk_size", 1024)
            .with_field("crc32", 0xDEAD_BEEFu32);

        let line = request.encode();
        let parsed: Value = serde_json::from_slice(&line[..line.len() - 1]).unwrap();

        assert_eq!(parsed["command"], "download_file");
        assert_eq!(parsed["filename"], "tightenStrap.wav");
        assert_eq!(parsed["size"], 4096);
        assert_eq!(parsed["crc32"], 0xDEAD_BEEFu64);
    }

    #[test]
    fn test_request_cannot_override_command() {
        let request = Request::new(Command::Ping).with_field("command", "list_files");
        assert_eq!(request.to_json()["command"], "ping");
    }
}
