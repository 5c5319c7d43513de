//! Rotator bridge - serial-to-TCP bridge for antenna rotator controllers
//!
//! Runs in the foreground: opens the rotator controller's serial port,
//! serves authenticated TCP clients and announces itself over UDP until
//! SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! # Start the bridge with defaults (or the platform config file)
//! rotatord
//!
//! # Override device, port and secret
//! rotatord start --device /dev/ttyACM0 --port 7777 --secret hunter2
//!
//! # Stream published state as JSON lines
//! rotatord start --print-state
//!
//! # Show the effective configuration
//! rotatord config
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rotator_core::BridgeState;
use rotatord::{Bridge, BridgeConfig, DeviceOpener, TtyOpener};

/// Rotator bridge - serial-to-TCP bridge with UDP discovery
#[derive(Parser, Debug)]
#[command(name = "rotatord", version, about)]
struct Args {
    /// Configuration file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge in the foreground
    Start(StartArgs),
    /// Print the effective configuration as TOML
    Config(Overrides),
}

#[derive(clap::Args, Debug, Default)]
struct StartArgs {
    #[command(flatten)]
    overrides: Overrides,

    /// Print every published state snapshot as a JSON line on stdout
    #[arg(long)]
    print_state: bool,
}

/// Settings that override the file and environment.
#[derive(clap::Args, Debug, Default)]
struct Overrides {
    /// Serial device path
    #[arg(short, long)]
    device: Option<String>,

    /// TCP port for client connections
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared secret clients must present
    #[arg(long)]
    secret: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut BridgeConfig) {
        if let Some(device) = self.device {
            config.device_path = device;
        }
        if let Some(port) = self.port {
            config.tcp_port = port;
        }
        if let Some(secret) = self.secret {
            config.secret = secret;
        }
    }
}

/// Defaults, then file, then environment, then flags.
fn resolve_config(path: Option<PathBuf>, overrides: Overrides) -> Result<BridgeConfig> {
    let mut config =
        BridgeConfig::load(path.as_deref()).context("Failed to load configuration")?;
    config
        .apply_env()
        .context("Invalid environment override")?;
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Start(StartArgs::default())) {
        Command::Start(start) => {
            let config = resolve_config(args.config, start.overrides)?;
            run_bridge(config, start.print_state)
        }
        Command::Config(overrides) => {
            let config = resolve_config(args.config, overrides)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_bridge(config: BridgeConfig, print_state: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rotatord=info".parse()?)
                .add_directive("rotator_core=info".parse()?)
                .add_directive("rotator_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        config = ?config,
        "Rotator bridge starting"
    );

    let opener: Arc<dyn DeviceOpener> =
        Arc::new(TtyOpener::new(config.device_path.clone(), config.baud_rate));
    let bridge = Bridge::start(&config, opener)
        .await
        .context("Failed to start bridge")?;

    let printer = print_state.then(|| tokio::spawn(print_states(bridge.subscribe_state())));

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    info!("Shutdown signal received");

    bridge.shutdown().await;
    if let Some(printer) = printer {
        // Ends once the publisher's final snapshot has been printed
        let _ = printer.await;
    }

    info!("Rotator bridge stopped");
    Ok(())
}

/// Writes each published snapshot as one JSON line until the publisher stops.
async fn print_states(mut states: watch::Receiver<BridgeState>) {
    loop {
        let state = states.borrow_and_update().clone();
        match serde_json::to_string(&state) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "Failed to serialize state"),
        }
        if states.changed().await.is_err() {
            break;
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
