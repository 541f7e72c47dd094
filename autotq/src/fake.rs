//! Simulated AutoTQ device for tests
//!
//! Implements [`Transport`] and speaks the firmware's line protocol,
//! including the binary phase of `download_file`. The state sits behind a
//! shared handle so a test can script faults before the run and inspect
//! what the device received afterwards.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

use autotq_core::checksum::Crc32;
use autotq_core::LineBuffer;
use autotq_core::constants::replies;
use autotq_transport::{Error, Result, Transport};

#[derive(Debug)]
pub(crate) struct FakeState {
    pub mac: String,
    pub firmware: String,

    /// Files stored on the device
    pub files: Vec<String>,

    /// Files `list_missing_audio` checks for
    pub expected: Vec<String>,

    /// Fail this many opens with a busy error
    pub busy_opens: usize,

    /// Every open fails with a busy error
    pub always_busy: bool,

    /// Commands the device never answers
    pub silent_commands: HashSet<String>,

    /// Files whose `download_file` is never answered
    pub silent_downloads: HashSet<String>,

    /// Files the device refuses up front
    pub rejected: HashSet<String>,

    /// Files that get the ready signal but never a completion
    pub silent_completions: HashSet<String>,

    /// Files aborted by the device mid-stream
    pub aborted: HashSet<String>,

    /// Files whose CRC check fails on the device
    pub corrupt: HashSet<String>,

    /// Emit firmware diagnostics around replies
    pub chatty: bool,

    pub open: bool,
    pub connect_times: Vec<Instant>,
    pub requests: Vec<Value>,

    /// Completed uploads with the bytes received
    pub received: Vec<(String, Vec<u8>)>,

    inbound: LineBuffer,
    outbox: BytesMut,
    upload: Option<Upload>,
}

#[derive(Debug)]
struct Upload {
    filename: String,
    size: usize,
    expected_crc: Option<u32>,
    data: Vec<u8>,
    crc: Crc32,
    discard: bool,
}

impl FakeState {
    fn new(mac: &str) -> Self {
        Self {
            mac: mac.to_string(),
            firmware: "1.4.2".to_string(),
            files: Vec::new(),
            expected: Vec::new(),
            busy_opens: 0,
            always_busy: false,
            silent_commands: HashSet::new(),
            silent_downloads: HashSet::new(),
            rejected: HashSet::new(),
            silent_completions: HashSet::new(),
            aborted: HashSet::new(),
            corrupt: HashSet::new(),
            chatty: false,
            open: false,
            connect_times: Vec::new(),
            requests: Vec::new(),
            received: Vec::new(),
            inbound: LineBuffer::new(),
            outbox: BytesMut::new(),
            upload: None,
        }
    }

    /// Requests seen for one command name
    pub fn count(&self, command: &str) -> usize {
        self.requests
            .iter()
            .filter(|r| r["command"] == command)
            .count()
    }

    /// File names of `download_file` requests, in order
    pub fn download_requests(&self) -> Vec<String> {
        self.requests
            .iter()
            .filter(|r| r["command"] == "download_file")
            .filter_map(|r| r["filename"].as_str().map(str::to_string))
            .collect()
    }

    fn reply(&mut self, value: Value) {
        if self.chatty {
            self.outbox.extend_from_slice(b"[Audio] mixer idle\n[Timing] loop 3ms\n");
        }
        self.outbox.extend_from_slice(value.to_string().as_bytes());
        self.outbox.extend_from_slice(b"\n");
    }

    fn feed(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            if let Some(upload) = self.upload.as_mut() {
                let take = (upload.size - upload.data.len()).min(data.len());
                upload.data.extend_from_slice(&data[..take]);
                upload.crc.update(&data[..take]);
                data = &data[take..];

                if upload.data.len() == upload.size {
                    self.finish_upload();
                }
                continue;
            }

            self.inbound.extend(data);
            data = &[];
            while let Some(line) = self.inbound.next_line() {
                if let Ok(request) = serde_json::from_str::<Value>(&line) {
                    self.handle(request);
                }
            }
        }
    }

    fn handle(&mut self, request: Value) {
        self.requests.push(request.clone());

        let command = request["command"].as_str().unwrap_or_default().to_string();
        if self.silent_commands.contains(&command) {
            return;
        }

        match command.as_str() {
            "wifi_get_mac" => {
                let mac = self.mac.clone();
                self.reply(json!({ "command": "wifi_get_mac", "mac": mac }));
            }
            "get_status" => {
                let (mac, firmware) = (self.mac.clone(), self.firmware.clone());
                self.reply(json!({
                    "command": "get_status",
                    "mac_address": mac,
                    "fw_version": firmware,
                    "battery_soc": 91.5,
                }));
            }
            "ping" => self.reply(json!({ "command": "ping", "response": "pong" })),
            "list_files" => {
                let files = self.files.clone();
                self.reply(json!({ "command": "list_files", "files": files }));
            }
            "list_missing_audio" => {
                let missing: Vec<String> = self
                    .expected
                    .iter()
                    .filter(|f| !self.files.contains(f))
                    .cloned()
                    .collect();
                self.reply(json!({ "command": "list_missing_audio", "missing": missing }));
            }
            "download_file" => self.start_upload(&request),
            other => self.reply(json!({ "command": other, "error": "unknown command" })),
        }
    }

    fn start_upload(&mut self, request: &Value) {
        let filename = request["filename"].as_str().unwrap_or_default().to_string();
        let size = request["size"].as_u64().unwrap_or_default() as usize;

        if self.silent_downloads.contains(&filename) {
            return;
        }
        if self.rejected.contains(&filename) {
            self.reply(json!({
                "command": "download_file",
                "response": "error",
                "message": "storage full",
            }));
            return;
        }

        self.reply(json!({
            "command": "download_file",
            "response": replies::BINARY_TRANSFER_READY,
        }));

        let discard = self.aborted.contains(&filename);
        if discard {
            self.reply(json!({
                "response": replies::BINARY_TRANSFER_ABORTED,
                "reason": "SD write error",
            }));
        }

        // An aborting device stops reading after the first chunk
        let chunk_size = request["chunk_size"].as_u64().unwrap_or_default() as usize;
        let size = if discard { size.min(chunk_size) } else { size };

        self.upload = Some(Upload {
            filename,
            size,
            expected_crc: request["crc32"].as_u64().map(|c| c as u32),
            data: Vec::with_capacity(size),
            crc: Crc32::new(),
            discard,
        });

        if size == 0 {
            self.finish_upload();
        }
    }

    fn finish_upload(&mut self) {
        let Some(upload) = self.upload.take() else {
            return;
        };
        if upload.discard || self.silent_completions.contains(&upload.filename) {
            return;
        }

        let crc = upload.crc.value();
        let passed = upload.expected_crc == Some(crc) && !self.corrupt.contains(&upload.filename);

        self.reply(json!({
            "response": replies::BINARY_TRANSFER_COMPLETE,
            "filename": upload.filename,
            "crc_check": if passed { replies::CRC_PASSED } else { replies::CRC_FAILED },
            "crc32": crc,
        }));

        if passed {
            if !self.files.contains(&upload.filename) {
                self.files.push(upload.filename.clone());
            }
            self.received.push((upload.filename, upload.data));
        }
    }
}

/// Simulated device on a named port
pub(crate) struct FakeDevice {
    port: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeDevice {
    pub fn new(port: &str, mac: &str) -> Self {
        Self {
            port: port.to_string(),
            state: Arc::new(Mutex::new(FakeState::new(mac))),
        }
    }

    /// Shared handle for scripting and inspection
    pub fn state(&self) -> Arc<Mutex<FakeState>> {
        Arc::clone(&self.state)
    }

    /// A second transport onto the same simulated device
    pub fn reopen(&self) -> Self {
        Self {
            port: self.port.clone(),
            state: self.state(),
        }
    }

    /// Push raw device output, as if the firmware printed it unprompted
    pub fn inject(&self, text: &str) {
        self.state.lock().outbox.extend_from_slice(text.as_bytes());
    }
}

#[async_trait]
impl Transport for FakeDevice {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.connect_times.push(Instant::now());

        if state.open {
            return Err(Error::AlreadyConnected);
        }
        if state.always_busy || state.busy_opens > 0 {
            state.busy_opens = state.busy_opens.saturating_sub(1);
            return Err(Error::PortBusy {
                port: self.port.clone(),
                reason: "Access is denied.".into(),
            });
        }

        state.open = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.open = false;
        state.outbox.clear();
        state.upload = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().open
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::NotConnected);
        }
        state.feed(data);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<BytesMut> {
        {
            let mut state = self.state.lock();
            if !state.open {
                return Err(Error::NotConnected);
            }
            if !state.outbox.is_empty() {
                let len = state.outbox.len();
                return Ok(state.outbox.split_to(len));
            }
        }

        sleep(timeout).await;
        Err(Error::ReadTimeout)
    }

    fn port_name(&self) -> &str {
        &self.port
    }
}

