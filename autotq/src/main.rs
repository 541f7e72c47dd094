//! `autotq-bulk`: load the audio set onto every attached AutoTQ device

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{ArgAction, Parser};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use autotq::{
    BulkTransfer, CancelFlag, Config, PortCandidate, RunTally, TransferSpeed, check_local_files,
};
use autotq_transport::discovery;

/// Exit status after a second interrupt
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(
    name = "autotq-bulk",
    version,
    about = "Transfer the audio set to every attached AutoTQ device in parallel"
)]
struct Cli {
    /// Do not ask for confirmation; run a single batch unless --continuous
    #[arg(long)]
    no_prompt: bool,

    /// Transfer speed profile: slow, normal, fast or ultrafast
    #[arg(long, value_name = "SPEED")]
    speed: Option<TransferSpeed>,

    /// Directory holding the audio files
    #[arg(long, value_name = "PATH")]
    audio_dir: Option<PathBuf>,

    /// Keep scanning for new devices until interrupted
    #[arg(long)]
    continuous: bool,

    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Required files, comma separated, in transfer order
    #[arg(long, value_name = "FILES", value_delimiter = ',')]
    files: Vec<String>,

    /// Use these ports instead of scanning
    #[arg(long, value_name = "PORTS", value_delimiter = ',')]
    ports: Vec<String>,

    /// Print every serial port with its classification and exit
    #[arg(long)]
    list_ports: bool,

    /// Skip files the device already has
    #[arg(long)]
    skip_existing: bool,

    /// Delay between worker port opens, in milliseconds
    #[arg(long, value_name = "MS")]
    stagger_ms: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Cannot start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));

    // A prompt abandoned on interrupt may still be blocked on stdin
    runtime.shutdown_background();

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(speed) = cli.speed {
        config.speed = speed;
    }
    if let Some(dir) = &cli.audio_dir {
        config.audio_dir = dir.clone();
    }
    if !cli.files.is_empty() {
        config.required_files = cli.files.iter().map(|f| f.trim().to_string()).collect();
    }
    if cli.skip_existing {
        config.skip_existing = true;
    }
    if let Some(stagger_ms) = cli.stagger_ms {
        config.bulk.stagger_ms = stagger_ms;
    }

    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = load_config(&cli)?;

    if cli.list_ports {
        let ports = discovery::scan(&config.discovery.filter())?;
        if ports.is_empty() {
            println!("No USB serial ports found");
        }
        for port in &ports {
            println!("{}", port);
        }
        return Ok(0);
    }

    if !config.audio_dir.is_dir() {
        bail!("Audio directory not found: {}", config.audio_dir.display());
    }

    let local = check_local_files(&config.audio_dir, &config.required_files);
    if local.available.is_empty() {
        bail!(
            "None of the required files are in {}",
            config.audio_dir.display()
        );
    }
    for name in &local.missing {
        warn!("Missing local file {}; it will fail on every device", name);
    }

    info!("Audio directory: {}", config.audio_dir.display());
    info!(
        "{} file(s), {:.1} KB total, {} speed",
        local.available.len(),
        local.total_bytes() as f64 / 1024.0,
        config.speed
    );

    let cancel = CancelFlag::new();
    spawn_interrupt_handler(cancel.clone());

    let fixed_ports: Vec<PortCandidate> = cli.ports.iter().map(PortCandidate::manual).collect();
    let bulk = BulkTransfer::new(config).with_cancel(cancel.clone());

    let scan = || -> autotq::Result<Vec<PortCandidate>> {
        if fixed_ports.is_empty() {
            bulk.discover()
        } else {
            Ok(fixed_ports.clone())
        }
    };

    let mut tally = RunTally::new();

    if cli.continuous {
        bulk.run_continuous(scan, |summary| {
            println!("\n{}", summary);
            tally.record(summary);
        })
        .await?;

        return Ok(tally.exit_status());
    }

    loop {
        info!("Detecting connected AutoTQ devices...");
        let ports = scan()?;

        if ports.is_empty() {
            error!("No AutoTQ devices detected");
            let retry = "Plug in devices and press Enter to retry (n to exit): ";
            if cli.no_prompt || !confirm(retry, &cancel).await? {
                break;
            }
            continue;
        }

        info!("Found {} device(s):", ports.len());
        for (i, port) in ports.iter().enumerate() {
            println!("   {}. {}", i + 1, port);
        }

        if !cli.no_prompt {
            let question = format!("Transfer audio to all {} device(s)? [Y/n]: ", ports.len());
            if !confirm(&question, &cancel).await? {
                info!("Transfer cancelled by user");
                if tally.batches() == 0 {
                    return Ok(0);
                }
                break;
            }
        }

        let summary = bulk.run_batch(&ports).await;
        println!("\n{}", summary);
        tally.record(&summary);

        if cli.no_prompt
            || cancel.is_cancelled()
            || !confirm("Transfer to another batch? [Y/n]: ", &cancel).await?
        {
            break;
        }
    }

    Ok(tally.exit_status())
}

/// First Ctrl-C lets in-flight files finish; the second exits at once
fn spawn_interrupt_handler(cancel: CancelFlag) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                return;
            }

            if cancel.cancel() {
                eprintln!("\nInterrupted again, exiting");
                std::process::exit(i32::from(EXIT_INTERRUPTED));
            }
            warn!("Interrupt received; finishing in-flight files (Ctrl-C again to abort)");
        }
    });
}

/// Ask a yes/no question; Enter means yes, an interrupt means no
async fn confirm(question: &str, cancel: &CancelFlag) -> anyhow::Result<bool> {
    if cancel.is_cancelled() {
        return Ok(false);
    }

    let question = question.to_string();
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        let mut stdout = std::io::stdout();
        write!(stdout, "\n{}", question)?;
        stdout.flush()?;

        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    });

    tokio::select! {
        answer = answer => {
            let answer = answer.context("prompt task failed")??;
            let answer = answer.trim().to_lowercase();
            Ok(matches!(answer.as_str(), "" | "y" | "yes"))
        }
        _ = cancel.cancelled() => Ok(false),
    }
}
