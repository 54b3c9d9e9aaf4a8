//! Readiness loop binding one TCP stream to one RPC driver.
//!
//! [`run_connection`] owns the socket for its whole life and talks to the
//! rest of the process over channels:
//!
//! ```text
//!           commands (RpcMessage)                  events
//! caller ────────────────────────> run_connection ───────> caller
//!                                        │
//!                                  TcpStream readiness
//!                                  try_read / try_write
//! ```
//!
//! The loop asks for write readiness only while the driver has queued
//! bytes, drains reads until `WouldBlock`, and stops pulling commands
//! while the send queue is at capacity so backpressure reaches the
//! command channel instead of growing the queue.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};

use chainpack_wire::RpcValue;

use crate::driver::{DriverConfig, RpcDriver};
use crate::error::DriverError;
use crate::message::RpcMessage;
use crate::transport::TcpTransport;

/// Tunables for one connection task.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Silence on the inbound side longer than this emits
    /// [`ConnectionEvent::Idle`].
    pub idle_interval: Duration,
    /// Size of the scratch buffer handed to `try_read`.
    pub read_chunk: usize,
    /// Framing driver settings.
    pub driver: DriverConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(30),
            read_chunk: 64 * 1024,
            driver: DriverConfig::default(),
        }
    }
}

/// What a connection reports back to its owner.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A complete inbound value arrived.
    Message(RpcValue),
    /// Nothing was received for a full idle interval.
    Idle,
    /// The connection ended; `Some` carries the failure, `None` means a
    /// clean shutdown from either side.
    Closed(Option<String>),
}

/// Runs one connection until the peer hangs up, the command sender is
/// dropped, or the stream fails.
///
/// Inbound values and lifecycle changes are reported on `event_tx`;
/// messages sent to `cmd_rx` are framed and written out. A
/// [`ConnectionEvent::Closed`] is always the last event emitted.
pub async fn run_connection(
    config: ConnectionConfig,
    stream: TcpStream,
    mut cmd_rx: mpsc::Receiver<RpcMessage>,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
) -> Result<()> {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let stream = Arc::new(stream);
    let transport = TcpTransport::new(stream.clone());
    let message_tx = event_tx.clone();
    let mut driver = RpcDriver::new(transport, config.driver.clone(), move |value| {
        message_tx.send(ConnectionEvent::Message(value)).ok();
    });
    info!(peer = %peer, "connection up");

    let mut read_buf = vec![0u8; config.read_chunk];
    let mut last_activity = Instant::now();

    loop {
        let mut interest = Interest::READABLE;
        if driver.has_pending_writes() {
            interest = interest | Interest::WRITABLE;
        }

        tokio::select! {
            biased;

            ready = stream.ready(interest) => {
                let ready = match ready {
                    Ok(ready) => ready,
                    Err(err) => {
                        return Err(fail(&mut driver, &event_tx, &peer, DriverError::Transport(err)));
                    }
                };
                if ready.is_readable() {
                    loop {
                        match stream.try_read(&mut read_buf) {
                            Ok(0) => {
                                debug!(peer = %peer, "peer closed connection");
                                driver.close();
                                let _ = event_tx.send(ConnectionEvent::Closed(None));
                                return Ok(());
                            }
                            Ok(n) => {
                                last_activity = Instant::now();
                                if let Err(err) = driver.bytes_read(&read_buf[..n]) {
                                    return Err(fail(&mut driver, &event_tx, &peer, err));
                                }
                            }
                            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                            Err(err) => {
                                return Err(fail(&mut driver, &event_tx, &peer, DriverError::Transport(err)));
                            }
                        }
                    }
                }
                if ready.is_writable() && driver.has_pending_writes() {
                    if let Err(err) = driver.flush() {
                        return Err(fail(&mut driver, &event_tx, &peer, err));
                    }
                }
            }

            cmd = cmd_rx.recv(), if driver.queued_bytes() < config.driver.max_queue_bytes => {
                match cmd {
                    Some(message) => {
                        if let Err(err) = driver.send_message(&message) {
                            if err.is_recoverable() {
                                warn!(peer = %peer, error = %err, "dropping outbound message");
                            } else {
                                return Err(fail(&mut driver, &event_tx, &peer, err));
                            }
                        }
                    }
                    None => {
                        debug!(peer = %peer, "command channel closed, shutting down");
                        driver.close();
                        let _ = event_tx.send(ConnectionEvent::Closed(None));
                        return Ok(());
                    }
                }
            }

            _ = time::sleep_until(last_activity + config.idle_interval) => {
                trace!(peer = %peer, "connection idle");
                let _ = event_tx.send(ConnectionEvent::Idle);
                last_activity = Instant::now();
            }
        }
    }
}

fn fail(
    driver: &mut RpcDriver<TcpTransport>,
    event_tx: &mpsc::UnboundedSender<ConnectionEvent>,
    peer: &str,
    err: DriverError,
) -> anyhow::Error {
    driver.close();
    error!(peer = %peer, error = %err, "connection failed");
    let _ = event_tx.send(ConnectionEvent::Closed(Some(err.to_string())));
    err.into()
}
