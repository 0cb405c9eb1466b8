//! CLI Entry Point for serial-monitor
//!
//! # Usage
//!
//! List serial ports:
//! ```bash
//! serial-monitor ports
//! ```
//!
//! Acquire 10 measurements of 500 samples from channels 1 and 3:
//! ```bash
//! serial-monitor acquire --port /dev/ttyUSB0 --samples 500 --acquisitions 10 \
//!     --board-rev rev01 --channels 1,3 --folder ./logs
//! ```
//!
//! Dry run against the simulated board:
//! ```bash
//! serial-monitor acquire --simulate --samples 5 --acquisitions 2 \
//!     --board-rev rev02 --channels 1,3 --folder /tmp
//! ```

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serial_monitor::config::Settings;
use serial_monitor::log_writer::LogWriter;
use serial_monitor::measurement::{BoardRevision, ChannelSet, LogFormat, SampleRequest};
use serial_monitor::mock::MockBoard;
use serial_monitor::ports;
use serial_monitor::repeater::{
    FailurePolicy, RepeaterState, RunConfig, RunEvent, RunStatus, SessionRepeater,
};
use serial_monitor::tracing_setup::{self, OutputFormat, TracingConfig};
use serial_monitor::transport::{LinkSettings, PortOpener, SerialPortOpener};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

/// Port name reported for `--simulate` runs without `--port`.
const SIMULATED_PORT: &str = "simulated";

#[derive(Parser)]
#[command(name = "serial-monitor")]
#[command(about = "Acquire sample matrices from a serial DAQ board", long_about = None)]
struct Cli {
    /// Configuration file (default: config/serial_monitor.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the serial ports currently visible
    Ports {
        /// Also print the device description
        #[arg(long, short)]
        verbose: bool,
    },

    /// Run a series of acquisitions and log each one
    Acquire(AcquireArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args)]
struct AcquireArgs {
    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    #[arg(long, required_unless_present = "simulate")]
    port: Option<String>,

    /// Samples per measurement (1-3000)
    #[arg(long)]
    samples: u32,

    /// Number of measurements (1-5000)
    #[arg(long)]
    acquisitions: u32,

    /// Board revision: rev01 or rev02
    #[arg(long)]
    board_rev: BoardRevision,

    /// Comma-separated channel ids, e.g. 1,3,5
    #[arg(long)]
    channels: ChannelSet,

    /// Folder for the m_NNNN.txt files (default: storage.output_dir)
    #[arg(long)]
    folder: Option<PathBuf>,

    /// Log format: text or binary
    #[arg(long)]
    format: Option<LogFormat>,

    /// What to do when a measurement fails: continue or abort
    #[arg(long)]
    on_error: Option<FailurePolicy>,

    /// Use the simulated board instead of a serial port
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Settings::load().context("loading configuration")?,
    };
    if let Some(level) = &cli.log_level {
        settings.application.log_level = level.clone();
    }

    tracing_setup::init(TracingConfig::from_settings(&settings)?.with_format(cli.log_format))?;
    debug!(?settings, "Configuration loaded");

    match cli.command {
        Commands::Ports { verbose } => list_ports(verbose),
        Commands::Acquire(args) => acquire(args, &settings).await,
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn list_ports(verbose: bool) -> Result<ExitCode> {
    if !verbose {
        let names = ports::list_port_names()?;
        if names.is_empty() {
            println!("No serial ports found");
        }
        for name in names {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let entries = ports::list_ports()?;
    if entries.is_empty() {
        println!("No serial ports found");
    }
    for entry in entries {
        match entry.description {
            Some(description) => println!("{}\t{}", entry.name, description),
            None => println!("{}", entry.name),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn acquire(args: AcquireArgs, settings: &Settings) -> Result<ExitCode> {
    let request = SampleRequest::new(args.samples, args.channels)?;
    let folder = resolve_folder(args.folder, settings)?;
    let port = args.port.unwrap_or_else(|| SIMULATED_PORT.to_string());

    let config = RunConfig::new(port, request, args.board_rev, folder, args.acquisitions)
        .with_failure_policy(args.on_error.unwrap_or(settings.acquisition.failure_policy))
        .with_format(args.format.unwrap_or(settings.storage.format))
        .with_link_settings(LinkSettings::from(&settings.serial));

    let opener: Arc<dyn PortOpener> = if args.simulate {
        info!("Using simulated board");
        Arc::new(MockBoard::new())
    } else {
        Arc::new(SerialPortOpener)
    };

    let repeater = SessionRepeater::new(config, opener)?
        .with_log_writer(LogWriter::new(settings.storage.firmware_version.clone()));

    println!(
        "Requesting {} samples from channels: {}",
        repeater.config().request.sample_count(),
        repeater.config().request.channels()
    );

    let mut run = repeater.start();

    let stopper = run.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stop requested, finishing the current measurement");
            stopper.stop();
        }
    });

    while let Some(event) = run.next_event().await {
        match event {
            RunEvent::Started { total } => info!(total, "Acquisition started"),
            RunEvent::Measurement {
                index,
                outcome: Ok(matrix),
            } => {
                println!("Measurement {index}");
                for (row_index, row) in matrix.rows().iter().enumerate() {
                    println!("{}. {:?}", row_index + 1, row);
                }
            }
            RunEvent::Measurement {
                index,
                outcome: Err(failure),
            } => {
                eprintln!(
                    "Measurement {index} failed after {} rows: {}",
                    failure.partial_rows, failure.error
                );
            }
            RunEvent::LogWritten { path, .. } => {
                println!("Logging finished: {}", Local::now().format("%H:%M:%S"));
                debug!(path = %path.display(), "Log written");
            }
            RunEvent::LogFailed { index, error } => {
                eprintln!("Measurement {index} was not logged: {error}");
            }
            RunEvent::Finished { state } => {
                println!(
                    "Run finished: {} of {} measurements succeeded",
                    state.succeeded, state.total_requested
                );
            }
            RunEvent::Aborted { state, reason } => {
                eprintln!(
                    "Run aborted at measurement {} of {}: {reason}",
                    state.current_index, state.total_requested
                );
            }
        }
    }

    let state = run.wait().await?;
    Ok(exit_code(&state))
}

/// `--folder` if given, else `storage.output_dir`.
fn resolve_folder(folder: Option<PathBuf>, settings: &Settings) -> Result<PathBuf> {
    match folder.or_else(|| settings.storage.output_dir.clone()) {
        Some(folder) => Ok(folder),
        None => bail!("no log folder given: pass --folder or set storage.output_dir"),
    }
}

/// A run succeeded if it was not aborted and logged at least one matrix.
fn run_succeeded(state: &RepeaterState) -> bool {
    state.status != RunStatus::Aborted && state.succeeded > 0
}

fn exit_code(state: &RepeaterState) -> ExitCode {
    if run_succeeded(state) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
