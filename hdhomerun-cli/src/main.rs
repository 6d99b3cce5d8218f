//! hdhomerun: find HDHomeRun tuners, query them and run channel scans.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use hdhomerun_client::{
    discover, supported_channelmaps, ClientConfig, DeviceHandle, DiscoverQuery, ScanSession,
    ScanStep, TokioTransport, Transport,
};
use hdhomerun_protocol::DEVICE_TYPE_TUNER;
use log::{debug, info, warn};

mod logging;
mod output;

const DEFAULT_CONFIG_FILE: &str = "hdhomerun.toml";
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// hdhomerun - HDHomeRun discovery and channel scan tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file path
    #[arg(short = 'f', long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long, global = true)]
    log_retention_days: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find tuners on the local network
    Discover {
        /// Ask a single address instead of broadcasting
        #[arg(long)]
        ip: Option<Ipv4Addr>,

        /// Only report this device id (hex)
        #[arg(long, value_parser = parse_device_id)]
        id: Option<u32>,

        /// Stop after this many devices (0 for no limit)
        #[arg(long)]
        max: Option<usize>,

        /// How long to wait for replies, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show model, channel map and signal status of a tuner
    Info {
        /// `<device id>[-<tuner>]` or `<ip>[-<tuner>]`
        device: String,
    },

    /// Scan a channel map for receivable channels
    Scan {
        /// `<device id>[-<tuner>]` or `<ip>[-<tuner>]`
        device: String,

        /// Channel map to scan (defaults to the tuner's current one)
        #[arg(long)]
        channelmap: Option<String>,

        /// Re-read the program list of each locked channel
        #[arg(long)]
        detect: bool,
    },

    /// List the channel maps a scan can be run on
    Channelmaps,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    client: ClientConfig,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

fn parse_device_id(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| format!("invalid device id {:?}: {}", s, e))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > ./hdhomerun.toml > defaults
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    });
    let mut file_config = match &config_path {
        Some(path) => load_config(path).map_err(|e| {
            eprintln!("Failed to load config file {}: {}", path.display(), e);
            e
        })?,
        None => ConfigFile::default(),
    };
    file_config.client.apply_env();

    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| file_config.logging.log_dir.as_ref().map(PathBuf::from));
    let retention_days = args
        .log_retention_days
        .or(file_config.logging.retention_days)
        .unwrap_or(DEFAULT_RETENTION_DAYS);
    let _log_guard = logging::init_logging(
        log_dir.as_deref(),
        retention_days,
        args.verbose,
        file_config.logging.level.as_deref(),
    )?;

    if let Some(path) = &config_path {
        info!("Loaded config from: {}", path.display());
    }
    debug!("Client config: {:?}", file_config.client);

    let config = file_config.client;
    let transport: Arc<dyn Transport> = Arc::new(TokioTransport::new());

    match args.command {
        Command::Discover {
            ip,
            id,
            max,
            timeout_ms,
        } => {
            let mut query = DiscoverQuery::from_config(&config).device_type(DEVICE_TYPE_TUNER);
            if let Some(ip) = ip {
                query = query.target(ip);
            }
            if let Some(id) = id {
                query = query.device_id(id);
            }
            if let Some(max) = max {
                query = query.max_results(max);
            }
            if let Some(ms) = timeout_ms {
                query = query.timeout(Duration::from_millis(ms));
            }
            run_discover(transport.as_ref(), &query, args.json).await
        }
        Command::Info { device } => {
            let device = DeviceHandle::from_device_str(transport, config, &device)?;
            run_info(device, args.json).await
        }
        Command::Scan {
            device,
            channelmap,
            detect,
        } => {
            let device = DeviceHandle::from_device_str(transport, config, &device)?;
            run_scan(device, channelmap, detect, args.json).await
        }
        Command::Channelmaps => {
            let names: Vec<_> = supported_channelmaps().collect();
            if args.json {
                println!("{}", output::to_json(&names)?);
            } else {
                names.iter().for_each(|name| println!("{}", name));
            }
            Ok(())
        }
    }
}

async fn run_discover(
    transport: &dyn Transport,
    query: &DiscoverQuery,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let devices = discover(transport, query).await?;
    info!("Discovery found {} device(s)", devices.len());

    if json {
        println!("{}", output::to_json(&devices)?);
    } else if devices.is_empty() {
        println!("no devices found");
    } else {
        devices
            .iter()
            .for_each(|device| println!("{}", output::device_line(device)));
    }
    Ok(())
}

async fn run_info(mut device: DeviceHandle, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let device_id = device.get_device_id().await?;
    let ip_addr = device.get_device_ip().await?;
    let model = device.get_model_str().await?;

    // Legacy devices without a tuner channel map still answer status.
    let channelmap = match device.get_tuner_channelmap().await {
        Ok(channelmap) => Some(channelmap),
        Err(e) => {
            debug!("No channel map: {}", e);
            None
        }
    };
    let status = match device.get_tuner_status().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("Failed to read tuner status: {}", e);
            None
        }
    };
    device.close().await;

    let info = output::DeviceInfo {
        device_id: format!("{:08X}", device_id),
        ip_addr,
        tuner: device.tuner_index(),
        model,
        channelmap,
        status,
    };
    if json {
        println!("{}", output::to_json(&info)?);
    } else {
        output::info_lines(&info)
            .iter()
            .for_each(|line| println!("{}", line));
    }
    Ok(())
}

async fn run_scan(
    mut device: DeviceHandle,
    channelmap: Option<String>,
    detect: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let channelmap = match channelmap {
        Some(channelmap) => channelmap,
        None => device.get_tuner_channelmap().await?,
    };

    let mut scan = ScanSession::new(device);
    scan.init(&channelmap).await?;

    loop {
        let step = tokio::select! {
            step = scan.advance() => step?,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping scan");
                break;
            }
        };

        match step {
            ScanStep::Finished => break,
            ScanStep::NoLock => {}
            ScanStep::LockedWithData(mut result) => {
                if detect {
                    if let ScanStep::LockedWithData(detected) = scan.detect().await? {
                        result = detected;
                    }
                }
                if !json {
                    output::channel_lines(&result)
                        .iter()
                        .for_each(|line| println!("{}", line));
                }
            }
        }

        let progress = scan.progress().await;
        debug!("Scan progress: {}%", progress);
    }

    let progress = scan.progress().await;
    scan.device_mut().close().await;

    let report = output::ScanReport {
        channelmap: &channelmap,
        scan_group: scan.scan_group(),
        state: scan.state(),
        progress,
        channels: scan.results(),
    };
    if json {
        println!("{}", output::to_json(&report)?);
    } else {
        println!(
            "{} channel(s) found on {} ({}%)",
            report.channels.len(),
            report.channelmap,
            report.progress
        );
    }
    Ok(())
}
