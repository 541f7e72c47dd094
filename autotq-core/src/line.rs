//! Line framing and response decoding
//!
//! The device writes newline-terminated text. Protocol replies are JSON
//! objects; everything else is firmware logging that shares the same UART.
//!
//! ```text
//! [Audio] I2S started                          <- diagnostic, filtered
//! boot: heap free 231004                       <- plain log, ignored
//! {"command":"wifi_get_mac","mac":"AA:BB:.."}  <- response
//! ```

use std::fmt;

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tracing::warn;

use crate::{
    LINE_TERMINATOR,
    command::Command,
    constants::{MAX_LINE_LEN, NOISE_PREFIXES},
    error::{Error, Result},
};

/// Accumulates raw serial bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    /// Append received bytes
    ///
    /// A partial line longer than [`MAX_LINE_LEN`] is discarded; the device
    /// never produces one unless the link is corrupted.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);

        if self.buf.len() > MAX_LINE_LEN && !self.buf.contains(&LINE_TERMINATOR) {
            warn!("Discarding {} bytes without a line terminator", self.buf.len());
            self.buf.clear();
        }
    }

    /// Pop the next non-empty line, trimmed
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.iter().position(|&b| b == LINE_TERMINATOR) {
            let raw = self.buf.split_to(pos);
            self.buf.advance(1);

            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// A JSON reply from the device
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    body: Value,
}

impl Response {
    /// Wrap an already parsed JSON object
    pub fn from_value(body: Value) -> Result<Self> {
        if !body.is_object() {
            return Err(Error::MalformedResponse {
                command: None,
                line: body.to_string(),
            });
        }
        Ok(Self { body })
    }

    /// The echoed `command` field
    pub fn command(&self) -> Option<&str> {
        self.body.get("command").and_then(Value::as_str)
    }

    /// The `response` field (`binary_transfer_ready`, `binary_transfer_complete`, ...)
    pub fn response(&self) -> Option<&str> {
        self.body.get("response").and_then(Value::as_str)
    }

    /// Check if this reply answers `command`
    pub fn is_reply_to(&self, command: Command) -> bool {
        self.command() == Some(command.name())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    /// A string array field, e.g. `files`
    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key)?
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.body)
    }
}

/// What a received line turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// A JSON object
    Response(Response),

    /// Known verbose firmware diagnostics (`[Audio...`, `[Timing]`)
    Diagnostic(String),

    /// Any other text
    Log(String),
}

/// Classify one line of device output
pub fn classify(line: &str) -> Line {
    if is_diagnostic(line) {
        return Line::Diagnostic(line.to_string());
    }

    if line.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            if let Ok(response) = Response::from_value(value) {
                return Line::Response(response);
            }
        }
    }

    Line::Log(line.to_string())
}

/// Check if a line is firmware diagnostic output
pub fn is_diagnostic(line: &str) -> bool {
    NOISE_PREFIXES.iter().any(|prefix| line.starts_with(prefix))
}

/// Check whether a line that failed to parse was meant as a reply to `command`
///
/// Used to tell a corrupted reply apart from ordinary log output.
pub fn mentions_command(line: &str, command: Command) -> bool {
    line.contains("\"command\"") && line.contains(command.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_single_line() {
        let mut lines = LineBuffer::new();
        lines.extend(b"{\"command\":\"ping\"}\n");

        assert_eq!(lines.next_line().as_deref(), Some("{\"command\":\"ping\"}"));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.pending(), 0);
    }

    #[test]
    fn test_partial_line_waits() {
        let mut lines = LineBuffer::new();
        lines.extend(b"{\"command\":");
        assert_eq!(lines.next_line(), None);

        lines.extend(b"\"ping\"}\r\n");
        assert_eq!(lines.next_line().as_deref(), Some("{\"command\":\"ping\"}"));
    }

    #[test]
    fn test_blank_lines_skipped() {
        let mut lines = LineBuffer::new();
        lines.extend(b"\r\n\n  \nboot ok\n");

        assert_eq!(lines.next_line().as_deref(), Some("boot ok"));
        assert_eq!(lines.next_line(), None);
    }

    #[test]
    fn test_overlong_garbage_discarded() {
        let mut lines = LineBuffer::new();
        lines.extend(&vec![b'x'; MAX_LINE_LEN + 1]);

        assert_eq!(lines.pending(), 0);
    }

    #[test]
    fn test_classify_response() {
        let line = classify("{\"command\":\"wifi_get_mac\",\"mac\":\"AA:BB:CC:DD:EE:FF\"}");

        match line {
            Line::Response(response) => {
                assert!(response.is_reply_to(Command::WifiGetMac));
                assert_eq!(response.get_str("mac"), Some("AA:BB:CC:DD:EE:FF"));
            }
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_diagnostics() {
        assert!(matches!(classify("[Audio] buffer underrun"), Line::Diagnostic(_)));
        assert!(matches!(classify("[AudioMgr] ready"), Line::Diagnostic(_)));
        assert!(matches!(classify("[Timing] loop 12ms"), Line::Diagnostic(_)));
    }

    #[test]
    fn test_classify_log() {
        assert!(matches!(classify("E (1234) wifi: not started"), Line::Log(_)));
        assert!(matches!(classify("{not json"), Line::Log(_)));
        assert!(matches!(classify("[1, 2, 3]"), Line::Log(_)));
    }

    #[test]
    fn test_mentions_command() {
        assert!(mentions_command("{\"command\":\"list_files\",\"files\":[", Command::ListFiles));
        assert!(!mentions_command("{\"command\":\"get_status\"", Command::ListFiles));
        assert!(!mentions_command("list_files done", Command::ListFiles));
    }

    #[test]
    fn test_response_accessors() {
        let value = serde_json::json!({
            "command": "list_files",
            "files": ["inflating.wav", 3, "timeRemaining.wav"],
            "count": 2,
        });
        let response = Response::from_value(value).unwrap();

        assert_eq!(
            response.get_str_list("files").unwrap(),
            vec!["inflating.wav".to_string(), "timeRemaining.wav".to_string()]
        );
        assert_eq!(response.get_u64("count"), Some(2));
        assert_eq!(response.response(), None);
    }

    #[test]
    fn test_response_rejects_non_object() {
        let result = Response::from_value(serde_json::json!("ok"));
        assert!(matches!(result, Err(Error::MalformedResponse { .. })));
    }

    proptest! {
        #[test]
        fn framing_ignores_split_points(
            words in proptest::collection::vec("[a-z0-9:{}\"]{1,40}", 1..20),
            split in 1usize..64,
        ) {
            let stream: Vec<u8> = words
                .iter()
                .flat_map(|w| format!("{}\n", w).into_bytes())
                .collect();

            let mut lines = LineBuffer::new();
            let mut out = Vec::new();
            for piece in stream.chunks(split) {
                lines.extend(piece);
                while let Some(line) = lines.next_line() {
                    out.push(line);
                }
            }

            prop_assert_eq!(out, words);
        }
    }
}
