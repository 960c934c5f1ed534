//! Binary entrypoint for the meshgate CLI.
//!
//! Commands:
//! - `start [--port <path>] [--bind <addr>]` - serve the HTTP API, connecting to a device if one is configured
//! - `init` - write a starter `config.toml`
//! - `smoke-test --port <path> [-b <baud>] [--timeout <s>]` - probe the device link and print a JSON summary
//!
//! See the library crate docs for module-level details: `meshgate::`.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::Path;

use meshgate::api::{router, AppState};
use meshgate::config::Config;
use meshgate::connection::ConnectionManager;
use meshgate::meshtastic::{DeviceSettings, MeshtasticDevice};

#[derive(Parser)]
#[command(name = "meshgate")]
#[command(about = "HTTP bridge for a serial-attached Meshtastic radio")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP bridge
    Start {
        /// Meshtastic device port (e.g., /dev/ttyUSB0); "none" disables the device
        #[arg(short, long)]
        port: Option<String>,

        /// Listen address (e.g., 0.0.0.0:8000)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Run a serial smoke test: collect node & channel info
    SmokeTest {
        /// Device serial port
        #[arg(short, long)]
        port: String,
        /// Baud rate
        #[arg(short = 'b', long, default_value_t = 115200)]
        baud: u32,
        /// Seconds to wait before giving up
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port, bind } => {
            let (mut config, from_file) = load_config(&cli.config).await?;
            config.apply_env();
            // CLI overrides environment
            if let Some(port) = port {
                config.meshtastic.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            init_logging(Some(&config), cli.verbose);
            info!("Starting meshgate v{}", env!("CARGO_PKG_VERSION"));
            if !from_file {
                info!("No config file at {}; using defaults", cli.config);
            }

            let connection = ConnectionManager::initialize(&config.meshtastic).await;
            let app = router(AppState::new(connection));

            let listener = tokio::net::TcpListener::bind(&config.server.bind)
                .await
                .with_context(|| format!("Failed to bind {}", config.server.bind))?;
            info!("Listening on http://{}", config.server.bind);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            info!("Shutdown complete");
        }
        Commands::Init => {
            init_logging(None, cli.verbose);
            if Path::new(&cli.config).exists() {
                error!("{} already exists; not overwriting", cli.config);
                std::process::exit(1);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::SmokeTest {
            port,
            baud,
            timeout,
        } => {
            let (config, _) = load_config(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            let mut settings = DeviceSettings::from(&config.meshtastic);
            settings.baud_rate = baud;
            settings.connect_timeout = std::time::Duration::from_secs(timeout);
            settings.heartbeat_interval = None;

            info!("Starting smoke test on {} @ {} baud", port, baud);
            let payload = match MeshtasticDevice::open(&port, settings).await {
                Ok(device) => {
                    info!("Handshake complete on {}", device.port_name());
                    match device.summary() {
                        Ok(summary) => serde_json::json!({ "status": "ok", "device": summary }),
                        Err(e) => serde_json::json!({ "status": "failed", "error": e.to_string() }),
                    }
                }
                Err(e) => serde_json::json!({ "status": "failed", "error": e.to_string() }),
            };
            println!("{}", payload);
            std::process::exit(if payload["status"] == "ok" { 0 } else { 1 });
        }
    }

    Ok(())
}

/// Load the config file when present; a missing file yields defaults.
async fn load_config(path: &str) -> Result<(Config, bool)> {
    if Path::new(path).exists() {
        Ok((Config::load(path).await?, true))
    } else {
        Ok((Config::default(), false))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from config; CLI verbosity overrides
    let configured = config
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    builder.parse_env("MESHGATE_LOG");

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Foreground runs also echo to the console
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
