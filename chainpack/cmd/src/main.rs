//! ChainPack echo daemon binary.
//!
//! Accepts ChainPack RPC connections and answers every request by echoing
//! its params back as the result. Can also dial out to configured peers
//! with automatic reconnect, which makes two daemons ping each other into
//! a cheap soak test.

use chainpack_rpc::{
    connect_tcp, listen_tcp, run_connection, ConnectionConfig, ConnectionEvent, DriverConfig,
    RpcMessage, RpcType,
};
use chainpack_wire::RpcValue;
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::EchoConfig;
use logging::EchoLogFormatter;

// Component logging macros are defined in logging.rs and available via #[macro_export]

/// ChainPack RPC echo daemon
#[derive(Parser, Debug)]
#[command(name = "chainpack-echod", version, about = "ChainPack RPC echo daemon")]
struct Args {
    /// Listen address, e.g. 0.0.0.0:3755
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Connect to address, e.g. 127.0.0.1:3755 (repeatable)
    #[arg(long)]
    connect: Vec<SocketAddr>,

    /// Idle interval, e.g. 30s
    #[arg(long, default_value = "30s")]
    idle_interval: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing with the custom console formatter
    let env_filter = EnvFilter::new("info")
        .add_directive(format!("chainpack={}", args.log_level).parse()?)
        .add_directive(format!("chainpack_rpc={}", args.log_level).parse()?)
        .add_directive(format!("chainpack_wire={}", args.log_level).parse()?);

    let formatter = EchoLogFormatter::new("chainpack-echod".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true) // Enable ANSI colors
        .event_format(formatter)
        .init();

    info!("Starting ChainPack Echo Daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from file
    let echo_config = EchoConfig::load_from_file(&args.config)?;

    // CLI arguments win over the config file
    let listen_addr = match args.listen {
        Some(addr) => Some(addr),
        None => match &echo_config.listen {
            Some(addr) => Some(addr.parse()?),
            None => None,
        },
    };

    let mut connect_addrs = args.connect.clone();
    if connect_addrs.is_empty() {
        for peer in &echo_config.connect {
            connect_addrs.push(peer.parse()?);
        }
    }

    let cli_idle: Duration = args.idle_interval.into();
    let idle_interval = if cli_idle == Duration::from_secs(30) {
        // Default value
        Duration::from_secs(echo_config.idle_interval)
    } else {
        cli_idle
    };

    let conn_config = ConnectionConfig {
        idle_interval,
        driver: DriverConfig {
            max_queue_bytes: echo_config.max_queue_bytes,
            max_packet_bytes: echo_config.max_packet_bytes,
        },
        ..ConnectionConfig::default()
    };

    // Check that at least one mode is specified
    if listen_addr.is_none() && connect_addrs.is_empty() {
        anyhow::bail!("Must specify either --listen or --connect (or both)");
    }

    // Start listener if specified
    if let Some(listen_addr) = listen_addr {
        let listener = listen_tcp(listen_addr).await?;
        component_info!("listener", "Listening on {}", listen_addr);

        let config_accept = conn_config.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        component_info!("listener", "Accepted connection from {}", peer_addr);

                        let config_conn = config_accept.clone();
                        tokio::spawn(serve_echo(config_conn, stream, peer_addr));
                    }
                    Err(e) => {
                        component_error!("listener", "Accept error: {}; stopping listener", e);
                        break;
                    }
                }
            }
        });
    }

    // Start outbound connectors if specified
    if !connect_addrs.is_empty() {
        info!("Will connect to {} peers", connect_addrs.len());

        for addr in connect_addrs {
            let config_connect = conn_config.clone();
            tokio::spawn(run_connector(config_connect, addr));
        }
    }

    info!("Echo daemon started. Waiting for connections...");

    // Set up signal handling
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGINT handler: {}", e))?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM signal, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT signal, initiating graceful shutdown");
        }
    }

    info!("Echo daemon shutdown complete");
    Ok(())
}

/// Dials `addr` and serves the connection, reconnecting with exponential
/// backoff when the peer is unreachable.
async fn run_connector(config: ConnectionConfig, addr: SocketAddr) {
    let mut backoff = Duration::from_secs(1);

    loop {
        component_info!("connector", "Attempting to connect to {}", addr);

        match connect_tcp(addr).await {
            Ok(stream) => {
                component_info!("connector", "Connected to {}", addr);
                backoff = Duration::from_secs(1); // Reset backoff on success

                serve_echo(config.clone(), stream, addr).await;

                // Brief pause before reconnecting
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => {
                component_warn!(
                    "connector",
                    "Failed to connect to {}: {}; retrying in {:?}",
                    addr,
                    e,
                    backoff
                );

                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }
    }
}

/// Serves one established connection until it closes.
async fn serve_echo(config: ConnectionConfig, stream: TcpStream, peer_addr: SocketAddr) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let conn = tokio::spawn(run_connection(config, stream, cmd_rx, event_tx));

    while let Some(event) = event_rx.recv().await {
        match event {
            ConnectionEvent::Message(value) => {
                if let Some(reply) = answer(value, peer_addr) {
                    if cmd_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            ConnectionEvent::Idle => {
                component_debug!("echo", "No traffic from {}, sending keepalive", peer_addr);
                let ping = RpcMessage::new_notify("ping", None);
                if cmd_tx.send(ping).await.is_err() {
                    break;
                }
            }
            ConnectionEvent::Closed(Some(reason)) => {
                component_warn!("echo", "Connection to {} failed: {}", peer_addr, reason);
                break;
            }
            ConnectionEvent::Closed(None) => {
                component_info!("echo", "Connection to {} closed", peer_addr);
                break;
            }
        }
    }

    let _ = conn.await;
}

/// Builds the reply to one inbound value, if it warrants one.
fn answer(value: RpcValue, peer_addr: SocketAddr) -> Option<RpcMessage> {
    let msg = match RpcMessage::from_value(value) {
        Ok(msg) => msg,
        Err(value) => {
            component_warn!(
                "echo",
                "Ignoring non-message value from {}: {}",
                peer_addr,
                value
            );
            return None;
        }
    };

    match msg.rpc_type() {
        RpcType::Request => {
            let id = msg.id()?;
            let params = msg.params().cloned().unwrap_or_else(|| RpcValue::from(()));
            component_debug!(
                "echo",
                "Echoing request {} ({}) from {}",
                id,
                msg.method().unwrap_or("?"),
                peer_addr
            );
            Some(RpcMessage::new_response(id, params))
        }
        RpcType::Response => {
            component_info!("echo", "Response from {}: {}", peer_addr, msg);
            None
        }
        RpcType::Notify => {
            component_info!("echo", "Notify from {}: {}", peer_addr, msg);
            None
        }
        RpcType::Undefined => {
            component_warn!("echo", "Message from {} has no rpc type, ignoring", peer_addr);
            None
        }
    }
}
