//! CLI entry point for thermo-daq
//!
//! Provides a command-line interface for:
//! - Recording a session from a serial thermocouple board (or the simulator)
//! - Listing the serial ports the OS can see
//!
//! # Usage
//!
//! Record from hardware:
//! ```bash
//! thermo-daq run --port /dev/ttyACM0
//! ```
//!
//! Record from the simulated board:
//! ```bash
//! thermo-daq run --simulate --log-format compact
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use thermo_daq::acquisition::SessionStatus;
use thermo_daq::config::LoggerConfig;
use thermo_daq::logging::{self, OutputFormat, TracingConfig};
use thermo_daq::presentation::{TemperatureUnit, ViewState};
use thermo_daq::session::Session;
use thermo_daq::simulator::SimulatedDevice;
use thermo_daq::store::SharedChannelStore;
use thermo_daq::transport::{list_ports, open_serial};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "thermo-daq")]
#[command(about = "Multi-channel thermocouple logger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a session until Ctrl+C
    Run {
        /// Configuration file (defaults to config/thermo.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Serial port, overrides serial.port
        #[arg(long)]
        port: Option<String>,

        /// Use the simulated board instead of a serial port
        #[arg(long)]
        simulate: bool,

        /// Show live readouts in Fahrenheit
        #[arg(long)]
        fahrenheit: bool,

        /// Diagnostic log format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        log_format: OutputFormat,
    },

    /// List available serial ports
    Ports,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            port,
            simulate,
            fahrenheit,
            log_format,
        } => {
            let mut config = match config {
                Some(path) => LoggerConfig::load_from(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?,
                None => LoggerConfig::load().context("Failed to load configuration")?,
            };
            if port.is_some() {
                config.serial.port = port;
            }
            if fahrenheit {
                config.display.unit = TemperatureUnit::Fahrenheit;
            }
            config.validate().context("Invalid configuration")?;

            logging::init(TracingConfig::from_logger_config(&config)?.with_format(log_format))?;
            record(config, simulate).await
        }
        Commands::Ports => print_ports(),
    }
}

async fn record(config: LoggerConfig, simulate: bool) -> Result<()> {
    println!("🌡️  {}", config.application.name);
    println!(
        "   {} sensors, {} s window, poll every {} ms",
        config.acquisition.sensor_count,
        config.acquisition.history_seconds,
        config.serial.poll_interval_ms
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    let mut session = if simulate {
        println!("🔧 Using simulated board");
        let interval = Duration::from_millis(config.simulation.interval_ms);
        let mut device = SimulatedDevice::new(config.acquisition.sensor_count, interval)
            .with_sentinel(config.serial.ready_sentinel.clone());
        if let Some(seed) = config.simulation.seed {
            device = device.with_seed(seed);
        }
        let (port, _device) = device.spawn();
        Session::open(&config, port)?
    } else {
        let path = config
            .serial
            .port
            .clone()
            .context("No serial port configured; pass --port or set serial.port")?;
        println!("🔌 Opening {} at {} baud", path, config.serial.baud_rate);
        let port = open_serial(&path, config.serial.baud_rate)
            .await
            .with_context(|| format!("Failed to open serial port {path}"))?;
        Session::open(&config, port)?
    };

    println!("💾 Logging to {}", session.log_path().display());
    println!("⏳ Waiting for device... Press Ctrl+C to stop");
    println!();

    let printer = tokio::spawn(print_live(
        session.store(),
        session.subscribe(),
        config.view_state(),
    ));

    let outcome = session.run(shutdown_rx.clone()).await;
    // Release the port and close the log before idling on a failure.
    let closed = session.shutdown().await;
    printer.abort();

    if let Err(e) = &outcome {
        eprintln!();
        eprintln!("❌ Acquisition stopped: {e}");
        eprintln!("   The log is closed and intact. Press Ctrl+C to exit.");
        wait_for_shutdown(shutdown_rx).await;
    }

    println!();
    let summary = session.summary();
    println!(
        "✅ Recorded {} records to {}",
        summary.records,
        summary.log_path.display()
    );
    closed?;
    Ok(())
}

/// Print one readout block per tick that accepted records.
async fn print_live(
    store: SharedChannelStore,
    mut status: watch::Receiver<SessionStatus>,
    view: ViewState,
) {
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        if current.last_tick.accepted == 0 {
            continue;
        }
        let (lines, elapsed) = {
            let store = store.read();
            (view.live_lines(&store), store.latest_timestamp())
        };
        match elapsed {
            Some(t) => println!("[{} records, t = {t:.3} s]", current.records),
            None => println!("[{} records]", current.records),
        }
        for line in lines {
            println!("  {line}");
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    println!("📋 Serial ports:");
    for port in ports {
        println!("   {:<24} {}", port.name, port.description);
    }
    Ok(())
}
