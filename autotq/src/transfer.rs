//! Chunked audio file transfer
//!
//! One file moves through these states:
//!
//! ```text
//! Init ──download_file──> (ready) ──> Sending ──last chunk──> AwaitingAck ──> Complete
//!   │                                   │                         │
//!   └───────────────────────────────────┴─────────────────────────┴──> Failed
//! ```
//!
//! The device stores each logical chunk as it arrives, so the data is
//! written in small physical pieces with a pause between them to keep its
//! UART buffer from overflowing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, trace, warn};

use autotq_core::checksum;
use autotq_core::constants::{replies, transfer};
use autotq_core::{Command, Request, Response};
use autotq_types::{FileReport, FileStatus, SpeedProfile};

use crate::cancel::CancelFlag;
use crate::device::Device;
use crate::error::{Error, Result};

/// Where a single file transfer stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Init,
    Sending,
    AwaitingAck,
    Complete,
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A file the device acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    pub filename: String,
    pub bytes: u64,
    pub crc32: u32,

    /// CRC the device reported back, if it did
    pub device_crc32: Option<u32>,
}

/// Wait for `binary_transfer_complete` after the last byte
///
/// The device needs roughly 0.1 s per KiB to flush the file, bounded to
/// 2..8 s, plus a fixed grace period.
pub fn completion_timeout(size: usize) -> Duration {
    let estimate = (size as u64).saturating_mul(transfer::PROCESSING_PER_KIB_MS) / 1024;
    let processing = estimate.clamp(transfer::PROCESSING_MIN_MS, transfer::PROCESSING_MAX_MS);

    Duration::from_millis(processing + transfer::COMPLETION_GRACE_MS)
}

fn is_transfer_event(response: &Response) -> bool {
    matches!(
        response.response(),
        Some(replies::BINARY_TRANSFER_COMPLETE | replies::BINARY_TRANSFER_ABORTED)
    )
}

fn is_abort(response: &Response) -> bool {
    response.response() == Some(replies::BINARY_TRANSFER_ABORTED)
}

fn abort_error(filename: &str, response: &Response) -> Error {
    Error::TransferAborted {
        filename: filename.to_string(),
        reason: response.get_str("reason").unwrap_or("unknown").to_string(),
    }
}

struct Transfer<'a> {
    filename: &'a str,
    state: TransferState,
}

impl<'a> Transfer<'a> {
    fn advance(&mut self, to: TransferState) {
        trace!("{}: {} -> {}", self.filename, self.state, to);
        self.state = to;
    }
}

/// Send one file and wait for the device to confirm it
///
/// # Errors
///
/// Every error is specific to this file; the caller decides whether the
/// device is still usable (see [`Error::is_device_fatal`]).
pub async fn send_file(
    device: &mut Device,
    path: &Path,
    profile: &SpeedProfile,
) -> Result<FileTransfer> {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Config(format!("{} has no file name", path.display())))?;

    let mut transfer = Transfer {
        filename: &filename,
        state: TransferState::Init,
    };

    let result = run_transfer(device, path, profile, &mut transfer).await;
    if result.is_err() {
        transfer.advance(TransferState::Failed);
    }
    result
}

async fn run_transfer(
    device: &mut Device,
    path: &Path,
    profile: &SpeedProfile,
    transfer: &mut Transfer<'_>,
) -> Result<FileTransfer> {
    let filename = transfer.filename;

    let data = tokio::fs::read(path).await.map_err(|source| Error::LocalFile {
        path: path.to_path_buf(),
        source,
    })?;
    let crc32 = checksum::calculate(&data);

    info!(
        "Sending {} ({} bytes, {:.1} KB, CRC32 0x{:08X})",
        filename,
        data.len(),
        data.len() as f64 / 1024.0,
        crc32
    );

    let request = Request::new(Command::DownloadFile)
        .with_field("filename", filename)
        .with_field("size", data.len())
        .with_field("chunk_size", profile.chunk_size)
        .with_field("crc32", crc32);

    device.send_request(&request).await?;

    let ready_timeout = Duration::from_millis(transfer::READY_TIMEOUT_MS);
    let ready = device
        .wait_for(Command::DownloadFile, ready_timeout, usize::MAX, |r| {
            r.is_reply_to(Command::DownloadFile) || is_abort(r)
        })
        .await
        .map_err(|e| match e {
            Error::ResponseTimeout { .. } => Error::ReadyTimeout {
                filename: filename.to_string(),
                timeout_ms: transfer::READY_TIMEOUT_MS,
            },
            other => other,
        })?;

    match ready.response() {
        Some(replies::BINARY_TRANSFER_READY) => {}
        Some(replies::BINARY_TRANSFER_ABORTED) => return Err(abort_error(filename, &ready)),
        _ => {
            return Err(Error::TransferRejected {
                filename: filename.to_string(),
                reply: ready.to_string(),
            });
        }
    }

    debug!("Device ready for {}", filename);
    sleep(Duration::from_millis(transfer::PRE_DATA_DELAY_MS)).await;

    transfer.advance(TransferState::Sending);

    let started = Instant::now();
    let total_chunks = data.len().div_ceil(profile.chunk_size.max(1));
    let abort_poll = Duration::from_millis(transfer::ABORT_POLL_MS);
    let mut early_completion = None;
    let mut sent = 0;

    for (index, chunk) in data.chunks(profile.chunk_size.max(1)).enumerate() {
        for piece in chunk.chunks(profile.write_size.max(1)) {
            device.write_raw(piece).await?;
            sent += piece.len();

            trace!("{}: {}/{} bytes", filename, sent, data.len());

            if !profile.write_delay.is_zero() {
                sleep(profile.write_delay).await;
            }
        }

        debug!(
            "{}: chunk {}/{} ({}%)",
            filename,
            index + 1,
            total_chunks,
            sent * 100 / data.len()
        );

        if let Some(event) = device
            .poll(Command::DownloadFile, abort_poll, is_transfer_event)
            .await?
        {
            if is_abort(&event) {
                return Err(abort_error(filename, &event));
            }
            early_completion = Some(event);
        }
    }

    let elapsed = started.elapsed();
    if !data.is_empty() {
        debug!(
            "{}: {} bytes in {:.2}s ({:.1} KB/s)",
            filename,
            data.len(),
            elapsed.as_secs_f64(),
            data.len() as f64 / 1024.0 / elapsed.as_secs_f64().max(0.001)
        );
    }

    transfer.advance(TransferState::AwaitingAck);

    let completion = match early_completion {
        Some(completion) => completion,
        None => {
            let ack_timeout = completion_timeout(data.len());
            debug!(
                "Waiting up to {:.1}s for {} to be stored",
                ack_timeout.as_secs_f64(),
                filename
            );

            device
                .wait_for(Command::DownloadFile, ack_timeout, usize::MAX, is_transfer_event)
                .await
                .map_err(|e| match e {
                    Error::ResponseTimeout { .. } => Error::AckTimeout {
                        filename: filename.to_string(),
                        timeout_ms: ack_timeout.as_millis() as u64,
                    },
                    other => other,
                })?
        }
    };

    if is_abort(&completion) {
        return Err(abort_error(filename, &completion));
    }

    let device_crc32 = completion.get_u64("crc32").map(|crc| crc as u32);

    if completion.get_str("crc_check") == Some(replies::CRC_FAILED) {
        return Err(Error::CrcMismatch {
            filename: filename.to_string(),
            local: crc32,
            device: match device_crc32 {
                Some(crc) => format!("0x{:08X} (crc_check failed)", crc),
                None => "crc_check failed".to_string(),
            },
        });
    }
    if let Some(crc) = device_crc32.filter(|crc| *crc != crc32) {
        return Err(Error::CrcMismatch {
            filename: filename.to_string(),
            local: crc32,
            device: format!("0x{:08X}", crc),
        });
    }
    if completion.get_str("crc_check").is_none() && device_crc32.is_none() {
        debug!("{}: device reported no CRC status", filename);
    }

    transfer.advance(TransferState::Complete);

    Ok(FileTransfer {
        filename: filename.to_string(),
        bytes: data.len() as u64,
        crc32,
        device_crc32,
    })
}

/// The required file set for one device
///
/// Files are always processed in list order. Each file's outcome is kept,
/// so a later [`TransferJob::retry_failed`] only touches what failed.
#[derive(Debug)]
pub struct TransferJob {
    audio_dir: PathBuf,
    profile: SpeedProfile,
    skip_existing: bool,
    cancel: CancelFlag,
    files: Vec<FileReport>,
}

impl TransferJob {
    pub fn new<I, S>(audio_dir: impl Into<PathBuf>, required: I, profile: SpeedProfile) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            audio_dir: audio_dir.into(),
            profile,
            skip_existing: false,
            cancel: CancelFlag::new(),
            files: required.into_iter().map(FileReport::new).collect(),
        }
    }

    /// Skip files the device already lists
    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn reports(&self) -> &[FileReport] {
        &self.files
    }

    pub fn into_reports(self) -> Vec<FileReport> {
        self.files
    }

    /// Check if every file is on the device
    pub fn is_complete(&self) -> bool {
        self.files.iter().all(FileReport::is_success)
    }

    /// Transfer every required file
    ///
    /// # Errors
    ///
    /// Only errors that make the device unusable are returned; the file
    /// that hit it and all files after it are marked failed first.
    pub async fn run(&mut self, device: &mut Device) -> Result<()> {
        device.session().begin_transfer()?;

        if self.skip_existing {
            self.mark_existing(device).await;
        }

        self.process(device).await?;

        device.session().mark_done()?;
        Ok(())
    }

    /// Send again only the files that failed or were cancelled
    ///
    /// Returns how many files were retried.
    pub async fn retry_failed(&mut self, device: &mut Device) -> Result<usize> {
        let pending = self.files.iter().filter(|f| f.needs_retry()).count();
        if pending == 0 {
            return Ok(0);
        }

        info!("Retrying {} file(s) on {}", pending, device.port());

        device.session().begin_transfer()?;
        self.process(device).await?;
        device.session().mark_done()?;

        Ok(pending)
    }

    async fn mark_existing(&mut self, device: &mut Device) {
        match device.list_files().await {
            Ok(present) => {
                for report in self.files.iter_mut().filter(|f| f.needs_retry()) {
                    if present.contains(&report.filename) {
                        info!("{} already on device, skipping", report.filename);
                        report.status = FileStatus::AlreadyPresent;
                    }
                }
            }
            Err(e) => warn!("Cannot list files on {}, sending all: {}", device.port(), e),
        }
    }

    async fn process(&mut self, device: &mut Device) -> Result<()> {
        let todo: Vec<usize> = (0..self.files.len())
            .filter(|&i| self.files[i].needs_retry())
            .collect();

        for (position, &index) in todo.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Cancelled, {} file(s) not sent", todo.len() - position);
                for &rest in &todo[position..] {
                    self.files[rest].status = FileStatus::Cancelled;
                }
                return Ok(());
            }

            let path = self.audio_dir.join(&self.files[index].filename);
            let start = Instant::now();

            let result = send_file(device, &path, &self.profile).await;

            let report = &mut self.files[index];
            report.attempts += 1;
            report.duration = start.elapsed();

            match result {
                Ok(done) => {
                    info!(
                        "{} transferred in {:.1}s",
                        done.filename,
                        report.duration.as_secs_f64()
                    );
                    report.status = FileStatus::Transferred {
                        bytes: done.bytes,
                        crc32: done.crc32,
                    };
                }
                Err(e) if e.is_device_fatal() => {
                    error!("{} failed, giving up on {}: {}", report.filename, device.port(), e);
                    report.status = FileStatus::Failed {
                        reason: e.to_string(),
                    };
                    for &rest in &todo[position + 1..] {
                        self.files[rest].status = FileStatus::Failed {
                            reason: "not attempted after device error".into(),
                        };
                    }
                    device.session().mark_error();
                    return Err(e);
                }
                Err(e) => {
                    error!("{} failed: {}", report.filename, e);
                    report.status = FileStatus::Failed {
                        reason: e.to_string(),
                    };
                }
            }

            if position + 1 < todo.len() {
                sleep(Duration::from_millis(transfer::INTER_FILE_DELAY_MS)).await;
            }
        }

        Ok(())
    }
}

/// Required files split by whether they exist locally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFiles {
    /// Present files with their sizes
    pub available: Vec<(String, u64)>,
    pub missing: Vec<String>,
}

impl LocalFiles {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.available.iter().map(|(_, size)| size).sum()
    }
}

/// Check which required files exist in `dir`
pub fn check_local_files<S: AsRef<str>>(dir: &Path, required: &[S]) -> LocalFiles {
    let mut files = LocalFiles::default();

    for name in required {
        let name = name.as_ref();
        match std::fs::metadata(dir.join(name)) {
            Ok(meta) if meta.is_file() => files.available.push((name.to_string(), meta.len())),
            _ => files.missing.push(name.to_string()),
        }
    }

    files
}
