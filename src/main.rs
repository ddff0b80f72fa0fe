//! ShuttleMIDI
//!
//! Sends MIDI control changes from a Contour ShuttleXpress to a selectable
//! MIDI output port.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use hidapi::HidApi;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shuttle_midi::cli::{self, ConsoleCommand};
use shuttle_midi::config::AppConfig;
use shuttle_midi::session::Session;
use shuttle_midi::shuttle::{self, ShuttleDevice};
use shuttle_midi::sink::{self, MidiSinkProvider};

/// How often a session whose reader died is noticed and torn down
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// ShuttleMIDI - ShuttleXpress to MIDI control changes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output port to use for this run instead of the configured one
    #[arg(short, long)]
    port: Option<String>,

    /// List available MIDI output ports
    #[arg(long)]
    list_ports: bool,

    /// List connected ShuttleXpress devices
    #[arg(long)]
    list_devices: bool,

    /// Run without the interactive console
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    if args.list_ports {
        list_ports_formatted(None);
        return Ok(());
    }

    let api = HidApi::new().context("Failed to initialize HID")?;

    if args.list_devices {
        list_devices_formatted(&api);
        return Ok(());
    }

    info!("Starting ShuttleMIDI...");

    let (mut config, created) = AppConfig::load_or_create(&args.config).await?;
    if created {
        info!("Wrote default configuration to {}", args.config);
    } else {
        info!("Configuration loaded from {}", args.config);
    }

    let device = match ShuttleDevice::open(&api) {
        Ok(device) => device,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        },
    };

    let provider = Arc::new(MidiSinkProvider::new(config.midi.channel));
    let mut session = Session::new(Box::new(device), provider, config.session_settings());

    let port = args
        .port
        .clone()
        .unwrap_or_else(|| config.midi.output_port.clone());
    if let Err(e) = session.start(&port).await {
        warn!("No output active ({}), use 'select <port>' to pick one", e);
    }

    let (console_tx, console_rx) = mpsc::channel::<ConsoleCommand>(8);
    if args.headless {
        drop(console_tx);
    } else {
        println!("{}", cli::HELP.dimmed());
        std::thread::spawn(move || {
            if let Err(e) = cli::run_console(console_tx) {
                error!("Console failed: {}", e);
            }
        });
    }

    run_app(&mut session, &mut config, &args.config, console_rx, shutdown_signal()).await;

    info!("Shutting down...");
    if let Some(e) = session.stop().await {
        warn!("Session ended with: {}", e);
    }
    info!("ShuttleMIDI shutdown complete");
    Ok(())
}

async fn run_app(
    session: &mut Session,
    config: &mut AppConfig,
    config_path: &str,
    mut console_rx: mpsc::Receiver<ConsoleCommand>,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    let mut reap = tokio::time::interval(REAP_INTERVAL);

    loop {
        tokio::select! {
            Some(command) = console_rx.recv() => {
                match command {
                    ConsoleCommand::ListPorts => list_ports_formatted(session.active_sink()),
                    ConsoleCommand::Select(name) => select_port(session, config, config_path, name).await,
                    ConsoleCommand::Stop => {
                        if session.active_sink().is_none() {
                            println!("{}", "Already idle".dimmed());
                        } else if let Some(e) = session.stop().await {
                            warn!("Session ended with: {}", e);
                        }
                    },
                    ConsoleCommand::Status => print_status(session),
                    ConsoleCommand::Help => println!("{}", cli::HELP),
                    ConsoleCommand::Quit => break,
                }
            }

            _ = reap.tick() => {
                if let Some(e) = session.reap().await {
                    error!("{}", e);
                    warn!("Output stopped, use 'select <port>' to resume");
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }
}

async fn select_port(session: &mut Session, config: &mut AppConfig, config_path: &str, name: String) {
    config.midi.output_port = name.clone();
    if let Err(e) = config.save(config_path).await {
        warn!("Failed to persist selection: {:#}", e);
    }

    match session.start(&name).await {
        Ok(()) => println!("{} {}", "Now sending to".green(), name.bright_white()),
        Err(e) => println!("{} {}", "Output idle:".red(), e),
    }
}

fn print_status(session: &Session) {
    match session.active_sink() {
        Some(name) => {
            let reader = if session.is_reading() {
                "reading".green()
            } else {
                "stopped".red()
            };
            println!("  Output: {}  Device: {}", name.bright_white(), reader);
        },
        None if session.has_device() => println!("  Output: {}", "idle".yellow()),
        None => println!("  {}", "ShuttleXpress lost, restart required".red()),
    }
}

fn list_ports_formatted(active: Option<&str>) {
    println!("\n{}", "=== Available MIDI Output Ports ===".bold().cyan());

    match sink::list_output_ports() {
        Ok(ports) if ports.is_empty() => println!("  {}", "No output ports found".dimmed()),
        Ok(ports) => {
            let mut marked = false;
            for name in ports {
                let is_active = !marked && active.is_some_and(|a| sink::port_matches(&name, a));
                if is_active {
                    marked = true;
                    println!("  {} {}", "[ACTIVE]".green(), name.bright_white());
                } else {
                    println!("           {}", name);
                }
            }
        },
        Err(e) => println!("  {}", e.to_string().red()),
    }
    println!();
}

fn list_devices_formatted(api: &HidApi) {
    println!("\n{}", "=== Connected ShuttleXpress Devices ===".bold().cyan());

    let devices = shuttle::list_devices(api);
    if devices.is_empty() {
        println!("  {}", "No ShuttleXpress found".dimmed());
    }
    for device in devices {
        println!(
            "  {} {} (serial {})",
            device.product.as_deref().unwrap_or("ShuttleXpress").green(),
            device.path,
            device.serial.as_deref().unwrap_or("-")
        );
    }
    println!();
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
