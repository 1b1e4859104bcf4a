//! BLE provisioning tool for FeederNet feeders
//!
//! Scans for feeders in pairing mode and sends them WiFi credentials.

use std::time::Duration;

use clap::{Parser, Subcommand};
use data_encoding::HEXLOWER;
use feedernet_ble_controller::{Notification, ProvisionerConfig, ble};
use feedernet_proto::ble::{DEVICE_MODEL, PLACEHOLDER_TOKEN};
use feedernet_proto::{Credentials, DEFAULT_CHUNK_SIZE, Severity, decode_status, encode};

#[derive(Parser)]
#[command(name = "feedernet-ble")]
#[command(about = "BLE provisioning tool for FeederNet feeders")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for feeders in pairing mode
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Send WiFi credentials to a feeder and follow its progress
    Provision {
        /// Device name or id to connect to
        #[arg(short, long)]
        device: Option<String>,
        /// WiFi credentials file (SSID on line 1, password on line 2)
        #[arg(short, long, default_value = "wifi_credentials.txt", conflicts_with = "ssid")]
        file: String,
        /// WiFi network name, instead of a credentials file
        #[arg(long, requires = "password")]
        ssid: Option<String>,
        /// WiFi password
        #[arg(long, requires = "ssid")]
        password: Option<String>,
        /// Give up after this many seconds
        #[arg(short, long, default_value = "60")]
        timeout: u64,
        /// Payload bytes per BLE write
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Accept feeders that do not advertise write-without-response
        #[arg(long)]
        lenient: bool,
    },
    /// Show the BLE writes a set of credentials turns into
    Encode {
        #[arg(long)]
        ssid: String,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long, default_value = PLACEHOLDER_TOKEN)]
        token: String,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
    /// Explain a status string reported by a feeder
    DecodeStatus {
        text: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { duration } => {
            scan_feeders(duration).await?;
        }
        Commands::Provision {
            device,
            file,
            ssid,
            password,
            timeout,
            chunk_size,
            lenient,
        } => {
            let credentials = match (ssid, password) {
                (Some(ssid), Some(password)) => Credentials::new(ssid, password),
                _ => read_wifi_credentials(&file)?,
            };
            credentials.validate()?;

            let mut config = ProvisionerConfig::load_default()?;
            if let Some(chunk_size) = chunk_size {
                config.chunk_size = chunk_size;
            }
            if lenient {
                config.require_write_without_response = false;
            }
            provision_feeder(config, device.as_deref(), &credentials, timeout).await?;
        }
        Commands::Encode {
            ssid,
            password,
            token,
            chunk_size,
        } => {
            let chunks = encode(&ssid, &password, &token, chunk_size)?;
            println!("{} write(s):", chunks.len());
            for (i, chunk) in chunks.iter().enumerate() {
                println!(
                    "  {:>2}: {} ({} bytes)",
                    i,
                    HEXLOWER.encode(chunk.as_bytes()),
                    chunk.len()
                );
            }
        }
        Commands::DecodeStatus { text, json } => {
            let entry = decode_status(text.as_bytes()).ok_or("Empty status")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("{entry}");
            }
        }
    }

    Ok(())
}

fn read_wifi_credentials(file: &str) -> Result<Credentials, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {file}: {e}"))?;
    Ok(Credentials::from_lines(&content)?)
}

async fn scan_feeders(duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for devices ({} seconds)...", duration);

    let devices = ble::scan(Duration::from_secs(duration)).await?;

    println!("\nFound {} feeder(s):", devices.len());
    for device in devices {
        println!("  {} ({}) {}", device.display_name(), device.id, DEVICE_MODEL);
    }
    Ok(())
}

async fn provision_feeder(
    config: ProvisionerConfig,
    target: Option<&str>,
    credentials: &Credentials,
    timeout: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = ble::provision(
        config,
        target,
        credentials,
        Duration::from_secs(timeout),
        print_progress,
    )
    .await?;

    println!("Sent {} chunk(s) to {}.", outcome.chunks, outcome.device);
    match outcome.status {
        Some(status) if status.severity == Severity::Error => {
            Err(format!("Feeder reported: {}", status.label).into())
        }
        Some(status) => {
            println!("Feeder reported: {}", status.label);
            Ok(())
        }
        None => {
            println!("No status from feeder yet, it may be restarting to join WiFi.");
            Ok(())
        }
    }
}

fn print_progress(notification: &Notification) {
    match notification {
        Notification::ScanStarted => println!("Scanning for devices..."),
        Notification::PhaseChanged { phase, .. } => println!("  {}", phase.progress_label()),
        Notification::ReadyForCredentials { handle } => {
            println!("Sending credentials to {handle}...");
        }
        Notification::CredentialsSent { chunks, .. } => {
            println!("WiFi credentials sent ({chunks} chunk(s)), waiting for feeder...");
        }
        Notification::StatusUpdated { entry, .. } => println!("  {entry}"),
        Notification::AdapterUnavailable => println!("Bluetooth Unavailable"),
        Notification::ScanStopped | Notification::DevicesChanged => {}
    }
}
