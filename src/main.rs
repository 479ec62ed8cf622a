//! Sensorlink CLI - relay server, dashboard and one-shot device commands.
//!
//! This is the main binary entry point. See the `sensorlink` library for the
//! core functionality.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mimalloc::MiMalloc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use sensorlink::channel::{driver, ChannelEvent, ReconnectingChannel};
use sensorlink::constants::{CONNECT_TIMEOUT, SIMULATE_INTERVAL};
use sensorlink::env::Environment;
use sensorlink::relay::simulator::Simulator;
use sensorlink::transport::ws::WsTransport;
use sensorlink::{dashboard, Command, CommandOutcome, Config, RelayServer, ServoAngle, Tag};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "sensorlink")]
#[command(version)]
#[command(about = "Telemetry dashboard and command channel for IoT sensor boards")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server.
    Serve {
        /// Listen address.
        #[arg(long)]
        bind: Option<String>,
        /// Broadcast synthetic readings.
        #[arg(long)]
        simulate: bool,
        /// Seconds between synthetic readings.
        #[arg(long, default_value_t = SIMULATE_INTERVAL.as_secs())]
        interval: u64,
    },
    /// Open the live dashboard.
    Watch {
        /// Relay base URL.
        #[arg(long)]
        url: Option<String>,
        /// Base URL of the historical data API.
        #[arg(long)]
        history_url: Option<String>,
    },
    /// Switch the LED.
    Led {
        /// Desired state.
        state: LedState,
        /// Relay base URL.
        #[arg(long)]
        url: Option<String>,
    },
    /// Move the servo, or put it in auto mode.
    Servo {
        /// Angle 0-180, or `auto`.
        angle: ServoAngle,
        /// Relay base URL.
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LedState {
    On,
    Off,
}

/// Where log output goes.
enum LogTarget {
    Stderr,
    File(PathBuf),
}

fn init_logging(target: LogTarget) -> Result<()> {
    let filter = Environment::current().default_log_filter();
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter));
    builder.format_timestamp_secs();

    if let LogTarget::File(path) = target {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn log_file_path() -> Result<PathBuf> {
    match std::env::var("SENSORLINK_LOG_FILE") {
        Ok(path) => Ok(PathBuf::from(path)),
        Err(_) => Ok(Config::config_dir()?.join("sensorlink.log")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let target = match cli.command {
        Commands::Watch { .. } => LogTarget::File(log_file_path()?),
        _ => LogTarget::Stderr,
    };
    init_logging(target)?;

    let mut config = Config::load()?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;

    match cli.command {
        Commands::Serve {
            bind,
            simulate,
            interval,
        } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            runtime.block_on(serve(&config, simulate.then_some(Duration::from_secs(interval))))?;
        }
        Commands::Watch { url, history_url } => {
            if let Some(url) = url {
                config.server_url = url;
            }
            if history_url.is_some() {
                config.history_url = history_url;
            }
            dashboard::run(&config, &runtime)?;
        }
        Commands::Led { state, url } => {
            if let Some(url) = url {
                config.server_url = url;
            }
            let command = Command::Led {
                on: matches!(state, LedState::On),
            };
            report(command, runtime.block_on(send_once(&config, command))?);
        }
        Commands::Servo { angle, url } => {
            if !angle.is_manual() && !angle.is_auto() {
                bail!("Servo angle must be 0-180 or `auto`, got {}", angle.0);
            }
            if let Some(url) = url {
                config.server_url = url;
            }
            let command = Command::Servo { angle };
            report(command, runtime.block_on(send_once(&config, command))?);
        }
    }

    Ok(())
}

fn report(command: Command, outcome: CommandOutcome) {
    println!("{command}: {outcome}");
    if !outcome.is_confirmed() {
        std::process::exit(1);
    }
}

/// Run the relay until Ctrl-C.
async fn serve(config: &Config, simulate: Option<Duration>) -> Result<()> {
    let mut server = RelayServer::bind(config.relay_config()).await?;
    server.on_command(|command| log::info!("Device command: {command}"));

    let shutdown = CancellationToken::new();
    if let Some(interval) = simulate {
        tokio::spawn(Simulator::default().run(server.handle(), interval, shutdown.child_token()));
    }

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested");
            on_signal.cancel();
        }
    });

    println!(
        "Relay listening on ws://{}{}",
        server.handle().local_addr(),
        config.endpoint_path
    );
    server.run(shutdown).await
}

/// Connect, send one command, and wait for its outcome.
async fn send_once(config: &Config, command: Command) -> Result<CommandOutcome> {
    let channel = ReconnectingChannel::new(config.channel_config(), Box::new(WsTransport::new()));

    let (open_tx, mut open_rx) = watch::channel(false);
    channel.subscribe(Tag::Connected, move |event| {
        if let ChannelEvent::Connected(open) = event {
            open_tx.send_replace(*open);
        }
    });
    let driver = driver::spawn(channel.clone());

    let opened = matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, open_rx.wait_for(|open| *open)).await,
        Ok(Ok(_))
    );
    if !opened {
        channel.disconnect();
        driver.abort();
        bail!(
            "Could not connect to {} within {}s",
            channel.endpoint(),
            CONNECT_TIMEOUT.as_secs()
        );
    }

    let outcome = channel.send_command(command, config.ack_timeout()).await;

    channel.disconnect();
    // The driver exits once no timers remain.
    if tokio::time::timeout(Duration::from_secs(1), driver).await.is_err() {
        log::debug!("Channel driver still running at exit");
    }
    Ok(outcome)
}
