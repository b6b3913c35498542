//! Command-line front end for cold-chain temperature loggers.
//!
//! Every command connects, runs with the configured retry budget and prints
//! its result as JSON on stdout. Logs go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use coldchain_ble::domain::models::{Advertisement, CommandOutcome, SensorCommand};
use coldchain_ble::domain::settings::SettingsService;
use coldchain_ble::error::TransportError;
use coldchain_ble::infrastructure::bluetooth::btleplug_transport::BtleplugTransport;
use coldchain_ble::infrastructure::bluetooth::transport::ScanCallback;
use coldchain_ble::infrastructure::logging::init_logger;
use coldchain_ble::{Base64Codec, SensorService};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "coldchain-ble")]
#[command(about = "Talk to Blue Maestro and BT510 temperature loggers over BLE")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured number of attempts per command
    #[arg(long, global = true)]
    attempts: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for supported sensors
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Connect and report the sensor family
    Connect { address: String },
    /// Read battery level and button state
    Info { address: String },
    /// Download every stored temperature record
    Download { address: String },
    /// Flash the sensor LED
    Blink { address: String },
    /// Toggle the physical button lock
    ToggleButton { address: String },
    /// Set the logging interval
    SetInterval {
        address: String,
        /// Interval in seconds
        seconds: u32,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn scan(service: &SensorService, duration: Duration) -> anyhow::Result<()> {
    let callback: ScanCallback = Arc::new(|event: Result<Advertisement, TransportError>| {
        match event {
            Ok(adv) => println!(
                "{}\t{}\t{}",
                adv.id,
                adv.name.as_deref().unwrap_or("<unnamed>"),
                adv.rssi.map(|r| r.to_string()).unwrap_or_default()
            ),
            Err(e) => eprintln!("scan error: {}", e),
        }
    });

    service.scan_for_sensors(callback).await?;
    tokio::time::sleep(duration).await;
    service.stop_scan().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match cli.config {
        Some(path) => SettingsService::from_path(path),
        None => SettingsService::new()?,
    };
    let _log_guard = init_logger(&settings.get().log_settings)?;
    info!("Starting coldchain-ble");

    let attempts = cli.attempts.unwrap_or(settings.get().command_max_attempts);
    let transport = BtleplugTransport::new()
        .await
        .context("Bluetooth is not available")?;
    let service = SensorService::new(Arc::new(transport), Arc::new(Base64Codec))
        .with_scan_mode(settings.get().scan_mode);

    let (address, command) = match cli.command {
        Commands::Scan { duration } => {
            let secs = duration.unwrap_or(settings.get().scan_duration_secs);
            return scan(&service, Duration::from_secs(secs)).await;
        }
        Commands::Connect { address } => {
            let device = service.connect_with_retries(&address, attempts).await?;
            settings.record_connection(&address)?;
            return print_json(&serde_json::json!({
                "id": device.id,
                "name": device.name,
                "device_type": format!("{:?}", device.device_type),
            }));
        }
        Commands::Info { address } => (address, SensorCommand::GetInfo),
        Commands::Download { address } => (address, SensorCommand::DownloadLogs),
        Commands::Blink { address } => (address, SensorCommand::Blink),
        Commands::ToggleButton { address } => (address, SensorCommand::ToggleButton),
        Commands::SetInterval { address, seconds } => {
            (address, SensorCommand::UpdateLogInterval(seconds))
        }
    };

    let outcome: CommandOutcome = service
        .execute_with_retries(&address, command, attempts)
        .await
        .with_context(|| format!("{:?} on {} failed", command, address))?;
    settings.record_connection(&address)?;
    print_json(&outcome)?;

    if let Err(e) = service.disconnect(&address).await {
        tracing::warn!("Disconnect from {} failed: {}", address, e);
    }
    Ok(())
}
