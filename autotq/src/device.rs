//! High-level device interface

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace, warn};

use autotq_core::constants;
use autotq_core::line::{self, Line};
use autotq_core::{Command, LineBuffer, Request, Response, Session};
use autotq_transport::{SerialTransport, Transport};
use autotq_types::{DeviceInfo, DeviceStatus};

use crate::config::DeviceSettings;
use crate::error::{Error, Result};

/// AutoTQ device on a serial port
///
/// Owns the port for its whole lifetime; one worker, one `Device`.
///
/// # Examples
///
/// ```no_run
/// use autotq::Device;
///
/// #[tokio::main]
/// async fn main() -> autotq::Result<()> {
///     let mut device = Device::new("/dev/ttyACM0");
///
///     device.connect().await?;
///
///     let mac = device.wifi_get_mac().await?;
///     println!("MAC: {}", mac);
///
///     device.close().await;
///     Ok(())
/// }
/// ```
pub struct Device {
    transport: Box<dyn Transport>,
    session: Session,
    settings: DeviceSettings,
    lines: LineBuffer,
}

impl Device {
    /// Create a device on a serial port with default settings
    pub fn new(port: impl Into<String>) -> Self {
        Self::open_serial(port, DeviceSettings::default())
    }

    /// Create a device on a serial port
    pub fn open_serial(port: impl Into<String>, settings: DeviceSettings) -> Self {
        let transport = SerialTransport::new(port).with_baud_rate(settings.baud_rate);
        Self::with_transport(Box::new(transport)).with_settings(settings)
    }

    /// Create a device over any transport
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        let session = Session::new(transport.port_name());
        Self {
            transport,
            session,
            settings: DeviceSettings::default(),
            lines: LineBuffer::new(),
        }
    }

    pub fn with_settings(mut self, settings: DeviceSettings) -> Self {
        self.session = Session::with_baud_rate(self.transport.port_name(), settings.baud_rate);
        self.settings = settings;
        self
    }

    pub fn port(&self) -> &str {
        self.transport.port_name()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.session.is_connected() && self.transport.is_connected()
    }

    /// Open the port and let the firmware settle
    ///
    /// Busy or stale-handle errors are retried on the open schedule; other
    /// open errors fail at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortUnavailable`] when the port cannot be opened.
    pub async fn connect(&mut self) -> Result<()> {
        self.session.begin_connect()?;

        info!("Connecting to {}...", self.port());

        let policy = self.settings.open_policy();
        let mut attempt = 1;

        loop {
            match self.transport.connect().await {
                Ok(()) => break,
                Err(e) => {
                    let retry = if e.is_transient() {
                        policy.delay_after(attempt)
                    } else {
                        None
                    };

                    match retry {
                        Some(delay) => {
                            warn!(
                                "Open attempt {}/{} on {} failed: {}; retrying in {:.1}s",
                                attempt,
                                policy.max_attempts(),
                                self.port(),
                                e,
                                delay.as_secs_f64()
                            );
                            sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            self.session.mark_error();
                            return Err(Error::PortUnavailable {
                                port: self.port().to_string(),
                                attempts: attempt,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        debug!("Waiting {:?} for firmware to settle", self.settings.stabilize());
        sleep(self.settings.stabilize()).await;
        self.discard_input().await;

        self.session.mark_connected()?;

        info!("Connected to {}", self.port());
        Ok(())
    }

    /// Release the port
    ///
    /// Runs on every exit path; failures are logged and swallowed.
    pub async fn close(&mut self) {
        if self.transport.is_connected() {
            debug!("Closing {}...", self.port());

            match self.transport.disconnect().await {
                // Lets the OS release the handle before the port is reused
                Ok(()) => sleep(Duration::from_millis(constants::RELEASE_DELAY_MS)).await,
                Err(e) => warn!("Failed to close {}: {}", self.port(), e),
            }
        }

        self.lines.clear();
        self.session.close();
    }

    /// Send a command and wait for its reply, once
    pub async fn send_command(&mut self, request: &Request) -> Result<Response> {
        self.send_request(request).await?;

        let wait = self.settings.response_timeout();
        let max_lines = self.settings.max_lines_per_call;
        self.wait_for(request.command, wait, max_lines, |r| {
            r.is_reply_to(request.command)
        })
        .await
    }

    /// Send a query command, retrying timeouts and garbled replies
    ///
    /// Commands that start a binary transfer are never repeated.
    pub async fn query(&mut self, request: &Request) -> Result<Response> {
        if !request.command.is_query() {
            return self.send_command(request).await;
        }

        let policy = self.settings.command_policy();
        let mut attempt = 1;

        loop {
            match self.send_command(request).await {
                Err(e) if e.is_retryable() => match policy.delay_after(attempt) {
                    Some(delay) => {
                        warn!(
                            "{} attempt {}/{} failed: {}",
                            request.command,
                            attempt,
                            policy.max_attempts(),
                            e
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
                result => return result,
            }
        }
    }

    /// Read the WiFi MAC address
    pub async fn wifi_get_mac(&mut self) -> Result<String> {
        let response = self.query(&Request::new(Command::WifiGetMac)).await?;

        response
            .get_str("mac")
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidResponse(format!("wifi_get_mac without mac: {}", response)))
    }

    /// Read firmware status
    pub async fn get_status(&mut self) -> Result<DeviceStatus> {
        let response = self.query(&Request::new(Command::GetStatus)).await?;

        serde_json::from_value(response.into_body())
            .map_err(|e| Error::InvalidResponse(format!("get_status: {}", e)))
    }

    /// Identify the device and record its identity in the session
    ///
    /// Older firmware has no MAC in `get_status`, so `wifi_get_mac` is
    /// asked as a fallback.
    pub async fn device_info(&mut self) -> Result<DeviceInfo> {
        let status = match self.get_status().await {
            Ok(status) => status,
            Err(e) => {
                debug!("get_status failed on {}: {}", self.port(), e);
                DeviceStatus::default()
            }
        };

        let mac = match status.mac_address.clone() {
            Some(mac) => mac,
            None => self.wifi_get_mac().await?,
        };

        let info = DeviceInfo::new(self.port(), mac).with_status(&status);
        self.session
            .set_identity(Some(info.mac_address.clone()), info.firmware_version.clone());

        debug!("Device info: {}", info);

        Ok(info)
    }

    /// Files stored on the device
    pub async fn list_files(&mut self) -> Result<Vec<String>> {
        let response = self.query(&Request::new(Command::ListFiles)).await?;

        response
            .get_str_list("files")
            .ok_or_else(|| Error::InvalidResponse(format!("list_files without files: {}", response)))
    }

    /// Required audio files the firmware reports as missing
    pub async fn list_missing_audio(&mut self) -> Result<Vec<String>> {
        let response = self.query(&Request::new(Command::ListMissingAudio)).await?;

        Ok(response.get_str_list("missing").unwrap_or_default())
    }

    /// Check the device answers at all
    pub async fn ping(&mut self) -> Result<Duration> {
        let start = Instant::now();
        self.query(&Request::new(Command::Ping)).await?;
        Ok(start.elapsed())
    }

    // Helper methods

    fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    /// Write one request line without waiting
    pub(crate) async fn send_request(&mut self, request: &Request) -> Result<()> {
        self.ensure_connected()?;

        debug!("Sending: {}", request);

        self.transport.send(&request.encode()).await?;
        Ok(())
    }

    /// Write raw file bytes
    pub(crate) async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        self.transport.send(data).await.map_err(Error::WriteIo)
    }

    /// Read lines until `matches` accepts a reply
    ///
    /// Diagnostics and log output are skipped. A line that names `command`
    /// but does not parse is reported as malformed.
    pub(crate) async fn wait_for<F>(
        &mut self,
        command: Command,
        wait: Duration,
        max_lines: usize,
        mut matches: F,
    ) -> Result<Response>
    where
        F: FnMut(&Response) -> bool,
    {
        let deadline = Instant::now() + wait;
        let mut seen = 0;

        loop {
            while let Some(text) = self.lines.next_line() {
                seen += 1;

                match line::classify(&text) {
                    Line::Response(response) if matches(&response) => {
                        debug!("Received: {}", response);
                        return Ok(response);
                    }
                    Line::Response(response) => debug!("Ignoring reply: {}", response),
                    Line::Diagnostic(text) => trace!("Device: {}", text),
                    Line::Log(text) if line::mentions_command(&text, command) => {
                        return Err(Error::MalformedResponse {
                            command: command.name().to_string(),
                            line: text,
                        });
                    }
                    Line::Log(text) => debug!("Device: {}", text),
                }

                if seen >= max_lines {
                    warn!("{} lines without a reply to {}", seen, command);
                    return Err(timeout_error(command, wait));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timeout_error(command, wait));
            }

            match self.transport.receive(remaining).await {
                Ok(data) => self.lines.extend(&data),
                Err(autotq_transport::Error::ReadTimeout) => {
                    return Err(timeout_error(command, wait));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Like [`Device::wait_for`], but a quiet window is not an error
    pub(crate) async fn poll<F>(
        &mut self,
        command: Command,
        window: Duration,
        matches: F,
    ) -> Result<Option<Response>>
    where
        F: FnMut(&Response) -> bool,
    {
        match self.wait_for(command, window, usize::MAX, matches).await {
            Ok(response) => Ok(Some(response)),
            Err(Error::ResponseTimeout { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Throw away boot chatter that arrived while settling
    ///
    /// Stops at the first quiet window, or after the drain limit when the
    /// firmware never stops printing.
    async fn discard_input(&mut self) {
        self.lines.clear();

        let deadline = Instant::now() + Duration::from_millis(constants::DRAIN_LIMIT_MS);
        let mut discarded = 0;

        while Instant::now() < deadline {
            match self.transport.receive(Duration::from_millis(10)).await {
                Ok(data) => discarded += data.len(),
                Err(_) => break,
            }
        }

        if discarded > 0 {
            trace!("Discarded {} bytes of boot output", discarded);
        }
    }
}

fn timeout_error(command: Command, wait: Duration) -> Error {
    Error::ResponseTimeout {
        command: command.name().to_string(),
        timeout_ms: wait.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDevice;
    use pretty_assertions::assert_eq;

    async fn connected(fake: &FakeDevice) -> Device {
        let mut device = Device::with_transport(Box::new(fake.reopen()));
        device.connect().await.unwrap();
        device
    }

    #[test]
    fn test_device_create() {
        let device = Device::new("/dev/ttyACM0");
        assert!(!device.is_connected());
        assert_eq!(device.port(), "/dev/ttyACM0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wifi_get_mac_single_exchange() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        let mut device = connected(&fake).await;

        let mac = device.wifi_get_mac().await.unwrap();

        assert_eq!(mac, "AA:BB:CC:DD:EE:FF");
        assert_eq!(fake.state().lock().count("wifi_get_mac"), 1);

        device.close().await;
        assert!(!device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_noise_is_filtered() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        let mut device = connected(&fake).await;
        fake.state().lock().chatty = true;
        fake.inject("boot: heap free 231004\n{\"command\":\"ping\",\"response\":\"pong\"}\n");

        let files = device.list_files().await.unwrap();

        assert!(files.is_empty());
        assert_eq!(fake.state().lock().count("list_files"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_retries_timeouts() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        let mut device = connected(&fake).await;
        fake.state()
            .lock()
            .silent_commands
            .insert("list_missing_audio".into());

        let result = device.list_missing_audio().await;

        assert!(matches!(result, Err(Error::ResponseTimeout { .. })));
        assert_eq!(fake.state().lock().count("list_missing_audio"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_command_does_not_retry() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        let mut device = connected(&fake).await;
        fake.state().lock().silent_commands.insert("ping".into());

        let result = device.send_command(&Request::new(Command::Ping)).await;

        assert!(matches!(result, Err(Error::ResponseTimeout { .. })));
        assert_eq!(fake.state().lock().count("ping"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_reply() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        let mut device = connected(&fake).await;
        fake.state().lock().silent_commands.insert("ping".into());
        fake.inject("{\"command\":\"ping\",\"response\":\"po\n");

        let result = device.send_command(&Request::new(Command::Ping)).await;

        assert!(matches!(result, Err(Error::MalformedResponse { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_info() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        let mut device = connected(&fake).await;

        let info = device.device_info().await.unwrap();

        assert_eq!(info.mac_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(info.firmware_version.as_deref(), Some("1.4.2"));
        assert_eq!(info.battery_soc, Some(91.5));
        assert_eq!(device.session().mac_address().as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(fake.state().lock().count("wifi_get_mac"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_info_falls_back_to_wifi_mac() {
        let fake = FakeDevice::new("COM3", "11:22:33:44:55:66");
        let mut device = connected(&fake).await;
        fake.state().lock().silent_commands.insert("get_status".into());

        let info = device.device_info().await.unwrap();

        assert_eq!(info.mac_address, "11:22:33:44:55:66");
        assert_eq!(info.firmware_version, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_busy_port() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        fake.state().lock().busy_opens = 2;

        let start = Instant::now();
        let mut device = Device::with_transport(Box::new(fake.reopen()));
        device.connect().await.unwrap();

        let times = fake.state().lock().connect_times.clone();
        assert_eq!(times.len(), 3);
        assert!(times[1] - start >= Duration::from_millis(1500));
        assert!(times[2] - times[1] >= Duration::from_millis(2000));
        assert!(device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        fake.state().lock().always_busy = true;

        let mut device = Device::with_transport(Box::new(fake.reopen()));
        let result = device.connect().await;

        assert!(matches!(
            result,
            Err(Error::PortUnavailable { attempts: 5, .. })
        ));
        assert_eq!(fake.state().lock().connect_times.len(), 5);
        assert_eq!(device.session().state(), autotq_core::SessionState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_line_limit() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        let mut device = connected(&fake).await;
        fake.inject(&"[Timing] loop 3ms\n".repeat(70));

        let start = Instant::now();
        let result = device.send_command(&Request::new(Command::WifiGetMac)).await;

        assert!(matches!(result, Err(Error::ResponseTimeout { .. })));
        assert!(start.elapsed() < device.settings().response_timeout());
        assert_eq!(fake.state().lock().count("wifi_get_mac"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_waits_for_release() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        let mut device = connected(&fake).await;

        let start = Instant::now();
        device.close().await;

        assert!(start.elapsed() >= Duration::from_millis(constants::RELEASE_DELAY_MS));
        assert!(!fake.state().lock().open);
        assert_eq!(device.session().state(), autotq_core::SessionState::Disconnected);
    }

    /// Firmware that prints diagnostics every 5 ms without pause
    struct StreamingTransport {
        open: bool,
    }

    #[async_trait::async_trait]
    impl Transport for StreamingTransport {
        async fn connect(&mut self) -> autotq_transport::Result<()> {
            self.open = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> autotq_transport::Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.open
        }

        async fn send(&mut self, _data: &[u8]) -> autotq_transport::Result<()> {
            Ok(())
        }

        async fn receive(&mut self, _timeout: Duration) -> autotq_transport::Result<bytes::BytesMut> {
            sleep(Duration::from_millis(5)).await;
            Ok(bytes::BytesMut::from(&b"[Timing] loop 3ms\n"[..]))
        }

        fn port_name(&self) -> &str {
            "COM8"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_endless_chatter() {
        let mut device = Device::with_transport(Box::new(StreamingTransport { open: false }));

        let start = Instant::now();
        tokio::time::timeout(Duration::from_secs(10), device.connect())
            .await
            .expect("connect must finish while the device keeps printing")
            .unwrap();

        let limit = device.settings().stabilize() + Duration::from_millis(constants::DRAIN_LIMIT_MS);
        assert!(start.elapsed() <= limit + Duration::from_millis(10));
        assert!(device.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_require_connection() {
        let fake = FakeDevice::new("COM3", "AA:BB:CC:DD:EE:FF");
        let mut device = Device::with_transport(Box::new(fake.reopen()));

        assert!(matches!(device.ping().await, Err(Error::NotConnected)));
    }
}
