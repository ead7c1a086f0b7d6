use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pollmvr_core::network::{self, InterfaceAddress};
use pollmvr_core::protocol::Uid;
use pollmvr_core::record::DeviceRecord;
use pollmvr_core::session::{DiscoverySession, RdmConfig, SessionConfig, SessionReport};
use pollmvr_core::transport::{SimulatedBus, SimulatedResponder};
use tracing::{error, info, warn};

/// Largest simulated bus `--simulate` accepts.
const MAX_SIMULATED: u32 = 4096;

#[derive(Parser, Debug)]
#[command(author, version, about = "ArtNet and RDM fixture discovery", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the network and/or the RDM line and print the devices found
    Discover(DiscoverArgs),
    /// List IPv4 interfaces an ArtPoll can be sent from
    Interfaces {
        /// Include link-local (169.254.x.x) addresses
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// List serial ports, marking Robe interfaces
    Ports {
        /// Open each Robe candidate and check that it answers
        #[arg(long)]
        probe: bool,
        #[arg(long)]
        json: bool,
    },
    /// Configuration file helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct DiscoverArgs {
    /// Path to a TOML session config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local IPv4 address to poll from
    #[arg(short, long)]
    interface: Option<Ipv4Addr>,

    /// Serial port of a Robe interface; enables RDM discovery
    #[arg(short, long)]
    port: Option<String>,

    /// Discovery window in seconds
    #[arg(short, long)]
    timeout: Option<f64>,

    /// Skip the ArtPoll broadcast
    #[arg(long)]
    no_artnet: bool,

    /// Run RDM discovery against N simulated responders instead of a port
    #[arg(
        long,
        value_name = "N",
        conflicts_with = "port",
        value_parser = clap::value_parser!(u32).range(1..=MAX_SIMULATED as i64)
    )]
    simulate: Option<u32>,

    /// Print the registry as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a config file with default values
    Init {
        #[arg(default_value = "pollmvr.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args.command) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Discover(args) => discover(args),
        Command::Interfaces { all, json } => {
            let interfaces = network::list_interfaces(all);
            if json {
                println!("{}", serde_json::to_string_pretty(&interfaces)?);
            } else {
                for iface in &interfaces {
                    println!("{:<24} {:<15} broadcast {}", iface.name, iface.ip, iface.broadcast);
                }
            }
            Ok(())
        }
        Command::Ports { probe, json } => {
            let ports = if probe {
                network::find_robe_interfaces(Duration::from_millis(500))?
            } else {
                network::list_serial_ports()?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&ports)?);
            } else {
                for port in &ports {
                    let marker = if port.robe { "robe" } else { "" };
                    println!("{:<20} {:<5} {}", port.name, marker, port.product.as_deref().unwrap_or("-"));
                }
            }
            Ok(())
        }
        Command::Config {
            action: ConfigAction::Init { path, force },
        } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            SessionConfig::default().save_to_file(&path)?;
            info!(path = %path.display(), "Config written");
            Ok(())
        }
    }
}

fn discover(args: DiscoverArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };
    apply_overrides(&mut config, &args);

    info!(
        timeout_secs = config.timeout_secs,
        artnet = config.artnet.enabled,
        rdm = config.rdm.is_some() || args.simulate.is_some(),
        "Starting discovery"
    );
    let session = DiscoverySession::new(config);
    let report = match args.simulate {
        Some(count) => session.run_with_transport(simulated_bus(count))?,
        None => session.run()?,
    };

    let devices = session.registry().snapshot();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else {
        print_table(&devices);
    }
    summarize(&report)
}

fn apply_overrides(config: &mut SessionConfig, args: &DiscoverArgs) {
    if let Some(secs) = args.timeout {
        config.timeout_secs = secs;
    }
    if args.no_artnet {
        config.artnet.enabled = false;
    }
    if let Some(ip) = args.interface {
        config.artnet.config.bind_ip = ip;
        match directed_broadcast(ip, &network::list_interfaces(true)) {
            Some(broadcast) => config.artnet.config.broadcast.set_ip(broadcast),
            None => warn!(%ip, "Interface not found; keeping configured broadcast address"),
        }
    }
    if let Some(port) = &args.port {
        match config.rdm.as_mut() {
            Some(rdm) => rdm.port = port.clone(),
            None => config.rdm = Some(RdmConfig::new(port.clone())),
        }
    }
}

fn directed_broadcast(ip: Ipv4Addr, interfaces: &[InterfaceAddress]) -> Option<Ipv4Addr> {
    interfaces.iter().find(|i| i.ip == ip).map(|i| i.broadcast)
}

/// Responders spread over two manufacturers, patched back to back.
fn simulated_bus(count: u32) -> SimulatedBus {
    let mut bus = SimulatedBus::new();
    for i in 0..count {
        let manufacturer = if i % 2 == 0 { 0x5253 } else { 0x7FF0 };
        let uid = Uid::from_parts(manufacturer, 0x1000_0000u32.wrapping_add(i.wrapping_mul(0x0001_0003)));
        let address = (1 + (i % 32) * 16) % 512;
        bus.add(
            SimulatedResponder::new(uid)
                .with_address(address as u16)
                .with_model(&format!("Simulated Spot {}", i + 1)),
        );
    }
    bus
}

fn print_table(devices: &[DeviceRecord]) {
    if devices.is_empty() {
        println!("No devices found");
        return;
    }
    println!(
        "{:<24} {:<7} {:<22} {:<16} {:>5} {:>4}  MODEL",
        "NAME", "SOURCE", "KEY", "LOCATION", "UNIV", "ADDR"
    );
    for d in devices {
        let location = match (&d.ip, &d.bus) {
            (Some(ip), _) => ip.to_string(),
            (None, Some(bus)) => format!("{}#{}", bus.port, bus.index),
            (None, None) => "-".to_string(),
        };
        println!(
            "{:<24} {:<7} {:<22} {:<16} {:>5} {:>4}  {}",
            d.name,
            d.source.to_string(),
            d.key.to_string(),
            location,
            d.universe.map_or("-".to_string(), |u| u.to_string()),
            d.address.map_or("-".to_string(), |a| a.to_string()),
            d.model.as_deref().unwrap_or("-"),
        );
    }
}

fn summarize(report: &SessionReport) -> Result<()> {
    if report.was_cancelled() {
        warn!("Discovery was cancelled");
    }
    let mut failures = Vec::new();
    if let Some(Err(e)) = &report.artnet {
        failures.push(format!("ArtNet: {e}"));
    }
    if let Some(Err(e)) = &report.rdm {
        failures.push(format!("RDM: {e}"));
    }
    info!(
        devices = report.devices,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Discovery finished"
    );
    if failures.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(failures.join("; "))
    }
}
