//! TCP connections, packet framing, and request/response messages over ChainPack.
//!
//! This crate turns the `chainpack-wire` value codec into an RPC layer:
//! packed values travel in length-prefixed packets over a byte stream, and
//! a thin message shape on top of IMap values carries requests, responses,
//! and notifications between peers.
//!
//! ## Features
//!
//! - **Packet framing**: length plus protocol version ahead of every value
//! - **Driver core**: framing state machine with no socket of its own
//! - **Message layer**: request/response/notify classification and builders
//! - **Connection loop**: one task per stream with readiness-driven I/O,
//!   send backpressure, and idle reporting
//!
//! ## Example
//!
//! ```rust,no_run
//! use chainpack_rpc::{
//!     connect_tcp, run_connection, ConnectionConfig, ConnectionEvent, RpcMessage,
//! };
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let addr = "127.0.0.1:3755".parse()?;
//! let stream = connect_tcp(addr).await?;
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(16);
//! let (event_tx, mut event_rx) = mpsc::unbounded_channel();
//! tokio::spawn(run_connection(
//!     ConnectionConfig::default(),
//!     stream,
//!     cmd_rx,
//!     event_tx,
//! ));
//!
//! cmd_tx
//!     .send(RpcMessage::new_request(1, "echo", Some("hello".into())))
//!     .await?;
//!
//! while let Some(event) = event_rx.recv().await {
//!     match event {
//!         ConnectionEvent::Message(value) => println!("got {}", value),
//!         ConnectionEvent::Idle => println!("peer is quiet"),
//!         ConnectionEvent::Closed(reason) => {
//!             println!("closed: {:?}", reason);
//!             break;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod driver;
pub mod error;
pub mod message;
pub mod transport;

// Re-export main types
pub use connection::{run_connection, ConnectionConfig, ConnectionEvent};
pub use driver::{
    DriverConfig, RpcDriver, DEFAULT_MAX_PACKET_BYTES, DEFAULT_MAX_QUEUE_BYTES, PROTOCOL_VERSION,
};
pub use error::DriverError;
pub use message::{ErrorCode, RpcError, RpcMessage, RpcType};
pub use transport::{connect_tcp, listen_tcp, TcpTransport, Transport};
