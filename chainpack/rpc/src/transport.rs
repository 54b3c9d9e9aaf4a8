//! TCP transport for ChainPack connections.
//!
//! The framing driver is transport-agnostic: it pushes packet bytes through
//! the [`Transport`] trait and never blocks on the network. The TCP
//! implementation here pairs with the readiness loop in
//! [`connection`](crate::connection).

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

/// Byte sink the framing driver writes packets through.
///
/// Implementations must be non-blocking: accept as many bytes as currently
/// fit and return [`io::ErrorKind::WouldBlock`] when the peer cannot take
/// more. The driver keeps its own queue and retries on the next flush.
pub trait Transport {
    /// Attempts to write `buf`, returning how many bytes were accepted.
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// [`Transport`] over a shared tokio TCP stream.
///
/// The stream is shared with the read side of the connection loop, so
/// writes go through [`TcpStream::try_write`] rather than exclusive async
/// writes.
pub struct TcpTransport {
    stream: Arc<TcpStream>,
}

impl TcpTransport {
    /// Wraps a connected stream.
    pub fn new(stream: Arc<TcpStream>) -> Self {
        Self { stream }
    }

    /// Peer address of the underlying stream.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl Transport for TcpTransport {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.try_write(buf)
    }
}

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Connect to a TCP address
pub async fn connect_tcp(addr: SocketAddr) -> tokio::io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_tcp_listen_connect() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let stream = connect_tcp(bound_addr).await.unwrap();
        let transport = TcpTransport::new(Arc::new(stream));

        assert!(transport.peer_addr().is_ok());
    }
}
