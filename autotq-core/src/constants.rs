//! Protocol constants

/// Serial baud rate used by the AutoTQ firmware
pub const BAUD_RATE: u32 = 115_200;

/// Delay after opening the port before the first command (ms)
///
/// Opening the port can reset the ESP32; the firmware needs this long to boot.
pub const STABILIZE_MS: u64 = 2000;

/// Default wait for a command reply (ms)
pub const RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Maximum lines read while waiting for a single reply
pub const MAX_LINES_PER_CALL: usize = 64;

/// Longest line accepted from the device
pub const MAX_LINE_LEN: usize = 4096;

/// Line prefixes of verbose firmware diagnostics
pub const NOISE_PREFIXES: [&str; 2] = ["[Audio", "[Timing]"];

/// Port open attempts before giving up
pub const OPEN_ATTEMPTS: usize = 5;

/// First delay between port open attempts (ms)
pub const OPEN_RETRY_BASE_MS: u64 = 1500;

/// Added to the open retry delay after each failed attempt (ms)
pub const OPEN_RETRY_STEP_MS: u64 = 500;

/// Attempts for retryable query commands
pub const COMMAND_ATTEMPTS: usize = 3;

/// Delay between query command attempts (ms)
pub const COMMAND_RETRY_MS: u64 = 250;

/// Settle time after releasing a port (ms)
pub const RELEASE_DELAY_MS: u64 = 500;

/// Longest time spent discarding boot output after opening (ms)
pub const DRAIN_LIMIT_MS: u64 = 500;

/// File transfer timing
pub mod transfer {
    /// Logical chunk size advertised in `download_file`
    pub const CHUNK_SIZE: usize = 1024;

    /// Physical write size
    pub const WRITE_SIZE: usize = 64;

    /// Delay between physical writes (ms)
    pub const WRITE_DELAY_MS: u64 = 2;

    /// Wait for `binary_transfer_ready` (ms)
    pub const READY_TIMEOUT_MS: u64 = 10_000;

    /// Pause between the ready signal and the first data byte (ms)
    pub const PRE_DATA_DELAY_MS: u64 = 100;

    /// Poll window for abort messages between chunks (ms)
    pub const ABORT_POLL_MS: u64 = 1;

    /// Minimum device processing time after the last byte (ms)
    pub const PROCESSING_MIN_MS: u64 = 2000;

    /// Maximum device processing time after the last byte (ms)
    pub const PROCESSING_MAX_MS: u64 = 8000;

    /// Processing time per KiB of file (ms)
    pub const PROCESSING_PER_KIB_MS: u64 = 100;

    /// Extra wait on top of the processing estimate (ms)
    pub const COMPLETION_GRACE_MS: u64 = 5000;

    /// Pause after a completed file (ms)
    pub const INTER_FILE_DELAY_MS: u64 = 500;
}

/// Bulk orchestration timing
pub mod bulk {
    /// Stagger between worker port opens (ms)
    pub const STAGGER_MS: u64 = 1500;

    /// Wait before rescanning in continuous mode (ms)
    pub const RESCAN_DELAY_MS: u64 = 10_000;

    /// Wait after a scan that found nothing (ms)
    pub const EMPTY_SCAN_DELAY_MS: u64 = 5000;

    /// Retry passes over a device's failed files
    pub const FILE_RETRIES: usize = 1;
}

/// Device reply values
pub mod replies {
    pub const BINARY_TRANSFER_READY: &str = "binary_transfer_ready";
    pub const BINARY_TRANSFER_COMPLETE: &str = "binary_transfer_complete";
    pub const BINARY_TRANSFER_ABORTED: &str = "binary_transfer_aborted";

    pub const CRC_PASSED: &str = "passed";
    pub const CRC_FAILED: &str = "failed";
}

/// Audio files every device needs unless configured otherwise
pub const DEFAULT_REQUIRED_FILES: [&str; 5] = [
    "tightenStrap.wav",
    "bleedingContinues.wav",
    "pullStrapTighter.wav",
    "inflating.wav",
    "timeRemaining.wav",
];

/// USB vendor/product IDs of boards that carry AutoTQ firmware
pub const KNOWN_USB_IDS: [(u16, u16); 7] = [
    (0x303A, 0x1001), // Espressif ESP32-S3 USB-JTAG/serial
    (0x10C4, 0xEA60), // Silicon Labs CP2102/CP2109
    (0x1A86, 0x7523), // QinHeng CH340
    (0x0403, 0x6001), // FTDI FT232R
    (0x067B, 0x2303), // Prolific PL2303
    (0x2341, 0x0043), // Arduino Uno
    (0x2341, 0x0001), // Arduino Mega
];

/// Description keywords of generic USB serial adapters
pub const SERIAL_KEYWORDS: [&str; 9] = [
    "esp32",
    "esp32-s3",
    "usb serial",
    "cdc",
    "uart",
    "ch340",
    "cp210",
    "ft232",
    "silicon labs",
];
