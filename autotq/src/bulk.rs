//! Parallel provisioning of every attached device
//!
//! One tokio task per device. Workers share nothing but the result list
//! and the cancel flag; each owns its port, its [`Device`] and its
//! [`TransferJob`]. Task `k` waits `k × stagger` before opening its port so
//! that a hub full of freshly plugged boards is not opened all at once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use autotq_transport::{PortCandidate, SerialTransport, Transport, discovery};
use autotq_types::{BatchSummary, DeviceReport, FileStatus};

use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::device::Device;
use crate::error::Result;
use crate::transfer::TransferJob;

/// Builds the transport for a port name
pub type Connector = Arc<dyn Fn(&str) -> Box<dyn Transport> + Send + Sync>;

/// Serial ports at the configured baud rate
pub fn serial_connector(baud_rate: u32) -> Connector {
    Arc::new(move |port: &str| -> Box<dyn Transport> {
        Box::new(SerialTransport::new(port).with_baud_rate(baud_rate))
    })
}

/// Bulk transfer orchestrator
pub struct BulkTransfer {
    config: Arc<Config>,
    connector: Connector,
    cancel: CancelFlag,
}

impl BulkTransfer {
    pub fn new(config: Config) -> Self {
        let connector = serial_connector(config.device.baud_rate);
        Self {
            config: Arc::new(config),
            connector,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ports eligible for provisioning
    ///
    /// # Errors
    ///
    /// Fails only when the OS cannot enumerate serial ports.
    pub fn discover(&self) -> Result<Vec<PortCandidate>> {
        let ports = discovery::discover(&self.config.discovery.filter())?;
        debug!("Discovered {} target port(s)", ports.len());
        Ok(ports)
    }

    /// Provision every port concurrently and wait for all of them
    ///
    /// Always returns one report per port, in the order given.
    pub async fn run_batch(&self, ports: &[PortCandidate]) -> BatchSummary {
        let started_at = Local::now();
        let start = Instant::now();

        info!(
            "Starting transfer to {} device(s), {} speed",
            ports.len(),
            self.config.speed
        );

        let results = Arc::new(Mutex::new(Vec::with_capacity(ports.len())));
        let mut handles = Vec::with_capacity(ports.len());

        for (index, candidate) in ports.iter().enumerate() {
            let port = candidate.port_name.clone();
            let worker = Worker {
                port: port.clone(),
                delay: self.config.bulk.stagger() * index as u32,
                transport: (self.connector)(&port),
                config: Arc::clone(&self.config),
                cancel: self.cancel.clone(),
            };
            let results = Arc::clone(&results);
            let span = info_span!("device", port = %port);

            let handle = tokio::spawn(
                async move {
                    let report = worker.run().await;
                    results.lock().push((index, report));
                }
                .instrument(span),
            );
            handles.push((index, port, handle));
        }

        for (index, port, handle) in handles {
            if let Err(e) = handle.await {
                error!("Worker for {} crashed: {}", port, e);
                results
                    .lock()
                    .push((index, DeviceReport::failed(port, format!("worker crashed: {}", e))));
            }
        }

        let mut reports = std::mem::take(&mut *results.lock());
        reports.sort_by_key(|(index, _)| *index);

        let summary = BatchSummary::new(
            started_at,
            start.elapsed(),
            reports.into_iter().map(|(_, report)| report).collect(),
        );

        info!(
            "Batch finished: {}/{} device(s) succeeded in {:.1}s",
            summary.success_count(),
            summary.device_count(),
            summary.duration.as_secs_f64()
        );

        summary
    }

    /// Scan, provision and repeat until cancelled
    ///
    /// `scan` supplies the ports for each round and `on_batch` sees every
    /// summary as soon as it is ready.
    ///
    /// # Errors
    ///
    /// Returns the first scan error; batches already run are lost to the
    /// caller except through `on_batch`.
    pub async fn run_continuous<S, F>(&self, mut scan: S, mut on_batch: F) -> Result<usize>
    where
        S: FnMut() -> Result<Vec<PortCandidate>>,
        F: FnMut(&BatchSummary),
    {
        let mut batches = 0;

        while !self.cancel.is_cancelled() {
            let ports = scan()?;

            if ports.is_empty() {
                info!(
                    "No devices detected, scanning again in {:.0}s",
                    self.config.bulk.empty_scan_delay().as_secs_f64()
                );
                self.cancel.sleep(self.config.bulk.empty_scan_delay()).await;
                continue;
            }

            let summary = self.run_batch(&ports).await;
            batches += 1;
            on_batch(&summary);

            if self.cancel.is_cancelled() {
                break;
            }

            info!(
                "Swap devices now; next scan in {:.0}s",
                self.config.bulk.rescan_delay().as_secs_f64()
            );
            self.cancel.sleep(self.config.bulk.rescan_delay()).await;
        }

        Ok(batches)
    }
}

/// Outcome of every batch in a run, kept as counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTally {
    batches: usize,
    failed: bool,
}

impl RunTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, summary: &BatchSummary) {
        self.batches += 1;
        self.failed |= !summary.all_succeeded();
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Process exit status for the run
    ///
    /// `0` only when at least one batch ran and every device in every
    /// batch succeeded.
    pub fn exit_status(&self) -> u8 {
        if self.batches > 0 && !self.failed { 0 } else { 1 }
    }
}

struct Worker {
    port: String,
    delay: Duration,
    transport: Box<dyn Transport>,
    config: Arc<Config>,
    cancel: CancelFlag,
}

impl Worker {
    async fn run(self) -> DeviceReport {
        let Worker {
            port,
            delay,
            transport,
            config,
            cancel,
        } = self;

        if !delay.is_zero() {
            debug!("Waiting {:.1}s before opening port", delay.as_secs_f64());
            cancel.sleep(delay).await;
        }

        let start = Instant::now();
        let mut report = DeviceReport::new(&port);

        let mut job = TransferJob::new(
            &config.audio_dir,
            config.required_files.iter().cloned(),
            config.speed.profile(),
        )
        .with_skip_existing(config.skip_existing)
        .with_cancel(cancel.clone());

        if let Err(e) = cancel.check() {
            warn!("{} before start", e);
            let mut files = job.into_reports();
            for file in &mut files {
                file.status = FileStatus::Cancelled;
            }
            report.files = files;
            report.error = Some(e.to_string());
            return report;
        }

        let mut device = Device::with_transport(transport).with_settings(config.device.clone());

        if let Err(e) = provision(&mut device, &mut job, &config, &cancel, &mut report).await {
            error!("{}", e);
            report.error = Some(e.to_string());
        }

        device.close().await;

        report.files = job.into_reports();
        report.duration = start.elapsed();

        match report.outcome() {
            autotq_types::DeviceOutcome::Success => info!(
                "Done: {}/{} file(s) in {:.1}s",
                report.succeeded_count(),
                report.files.len(),
                report.duration.as_secs_f64()
            ),
            outcome => warn!(
                "{}: {}/{} file(s) in {:.1}s",
                outcome,
                report.succeeded_count(),
                report.files.len(),
                report.duration.as_secs_f64()
            ),
        }

        report
    }
}

async fn provision(
    device: &mut Device,
    job: &mut TransferJob,
    config: &Config,
    cancel: &CancelFlag,
    report: &mut DeviceReport,
) -> Result<()> {
    device.connect().await?;

    match device.device_info().await {
        Ok(info) => {
            info!("{}", info);
            report.mac_address = Some(info.mac_address);
            report.firmware_version = info.firmware_version;
        }
        Err(e) => warn!("Cannot identify device: {}", e),
    }

    job.run(device).await?;

    for pass in 1..=config.bulk.file_retries {
        if job.is_complete() || cancel.is_cancelled() {
            break;
        }
        info!("Retry pass {}/{}", pass, config.bulk.file_retries);
        job.retry_failed(device).await?;
    }

    Ok(())
}
