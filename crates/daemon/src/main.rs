//! Device-side streaming daemon.
//!
//! `serve` runs the slave role: broadcast discovery beacons, listen for
//! commands and drive acquisition sessions. `discover` and `command` are
//! the master-role counterparts for enumerating devices and driving them
//! remotely.

mod config;
mod session;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use netconfig::{discover, local_ipv4_addrs, Beacon, MasterLink, NetConfigServer};
use stream_types::{DeviceIdentity, NetConfigMessage, StreamSettings};

use crate::config::DaemonConfig;
use crate::session::{DaemonEvent, Session};

#[derive(Parser)]
#[command(name = "streamd", about = "Digitizer streaming daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the device daemon.
    Serve {
        /// Path to the daemon configuration file.
        #[arg(long, default_value = "/etc/streamd/config.toml")]
        config: PathBuf,
        /// Override the command channel port from the config file.
        #[arg(long)]
        config_port: Option<u16>,
        /// Override the beacon broadcast port from the config file.
        #[arg(long)]
        broadcast_port: Option<u16>,
    },
    /// Listen for device beacons and print what answers.
    Discover {
        /// UDP port to listen on.
        #[arg(long, default_value_t = config::DEFAULT_BROADCAST_PORT)]
        port: u16,
        /// How long to listen, in seconds.
        #[arg(long, default_value_t = 3)]
        window: u64,
    },
    /// Send one command to a device's control channel.
    Command {
        /// Device control address, e.g. 10.0.0.5:8901.
        addr: SocketAddr,
        #[command(subcommand)]
        action: Action,
    },
}

#[derive(Subcommand)]
enum Action {
    /// Start streaming, optionally overriding settings with a JSON object.
    Start {
        #[arg(long)]
        settings: Option<String>,
    },
    /// Stop the active session.
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Serve {
            config,
            config_port,
            broadcast_port,
        } => serve(&config, config_port, broadcast_port).await,
        Command::Discover { port, window } => run_discover(port, window).await,
        Command::Command { addr, action } => run_command(addr, action).await,
    }
}

async fn serve(
    config_path: &std::path::Path,
    config_port: Option<u16>,
    broadcast_port: Option<u16>,
) -> anyhow::Result<()> {
    let mut cfg = DaemonConfig::load(config_path)?;
    if let Some(port) = config_port {
        cfg.config_port = port;
    }
    if let Some(port) = broadcast_port {
        cfg.broadcast_port = port;
    }
    info!(board = cfg.board.as_str(), "daemon starting");

    let identity = DeviceIdentity {
        model: cfg.board,
        addrs: local_ipv4_addrs(),
    };
    let beacon = Beacon::start_broadcast(identity, cfg.broadcast_port)
        .await
        .context("starting discovery beacon")?;

    let (events_tx, events_rx) = flume::unbounded::<DaemonEvent>();
    let (ctl_tx, ctl_rx) = flume::unbounded::<NetConfigMessage>();
    let server = NetConfigServer::bind(
        SocketAddr::from(([0, 0, 0, 0], cfg.config_port)),
        ctl_tx,
    )
    .await
    .context("binding control server")?;

    // Funnel control messages into the one event stream the supervisor
    // selects on.
    let forward = {
        let events_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Ok(msg) = ctl_rx.recv_async().await {
                if events_tx.send_async(DaemonEvent::Control(msg)).await.is_err() {
                    break;
                }
            }
        })
    };

    let mut defaults = cfg.stream.clone();
    let mut active: Option<Session> = None;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;

    loop {
        tokio::select! {
            event = events_rx.recv_async() => {
                let Ok(event) = event else { break };
                match event {
                    DaemonEvent::Control(NetConfigMessage::GetNewSetting(settings)) => {
                        settings.merge_into(&mut defaults);
                        info!("session defaults updated");
                    }
                    DaemonEvent::Control(NetConfigMessage::StartStreaming(settings)) => {
                        if let Some(session) = active.take() {
                            info!("restarting active session");
                            stop_session(session, true);
                        }
                        let mut stream = defaults.clone();
                        settings.merge_into(&mut stream);
                        match Session::start(&cfg, &stream, events_tx.clone()) {
                            Ok(session) => active = Some(session),
                            Err(e) => error!(error = %e, "session start failed"),
                        }
                    }
                    DaemonEvent::Control(NetConfigMessage::StopStreaming) => {
                        match active.take() {
                            Some(session) => stop_session(session, true),
                            None => warn!("stop command with no active session"),
                        }
                    }
                    DaemonEvent::SinkStopped(reason) => {
                        info!(?reason, "sink ended the session");
                        if let Some(session) = active.take() {
                            stop_session(session, true);
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
        }
    }

    if let Some(session) = active.take() {
        stop_session(session, true);
    }
    beacon.stop();
    server.stop();
    forward.abort();
    info!("daemon stopped");
    Ok(())
}

/// Session teardown joins the data-plane threads; keep it off the
/// reactor.
fn stop_session(session: Session, graceful: bool) {
    let result = tokio::task::block_in_place(|| session.stop(graceful));
    if let Err(e) = result {
        error!(error = %e, "session ended with an error");
    }
}

async fn run_discover(port: u16, window: u64) -> anyhow::Result<()> {
    let bind = SocketAddr::from(([0, 0, 0, 0], port));
    let devices = discover(bind, Duration::from_secs(window)).await?;
    if devices.is_empty() {
        println!("no devices answered within {window}s");
        return Ok(());
    }
    for device in devices {
        let addrs: Vec<String> = device
            .identity
            .addrs
            .iter()
            .map(|a| a.to_string())
            .collect();
        println!(
            "{} at {} [{}]",
            device.identity.model.as_str(),
            device.from.ip(),
            addrs.join(", ")
        );
    }
    Ok(())
}

async fn run_command(addr: SocketAddr, action: Action) -> anyhow::Result<()> {
    let msg = match action {
        Action::Start { settings } => {
            let settings: StreamSettings = match settings {
                Some(text) => serde_json::from_str(&text).context("parsing --settings")?,
                None => StreamSettings::default(),
            };
            NetConfigMessage::StartStreaming(settings)
        }
        Action::Stop => NetConfigMessage::StopStreaming,
    };
    let mut link = MasterLink::connect(addr).await?;
    link.send(&msg).await?;
    println!("sent {:?} to {addr}", msg.kind());
    Ok(())
}
