//! Stream framing driver for ChainPack RPC packets.
//!
//! One packet on the wire is:
//!
//! ```text
//! +---------------+------------------+---------------------+
//! | total length  | protocol version | packed value        |
//! | uint varint   | uint varint      | total length - ver  |
//! +---------------+------------------+---------------------+
//! ```
//!
//! where the length counts the version field plus the packed value.
//!
//! The driver never touches a socket itself. Its owner feeds inbound bytes
//! through [`RpcDriver::bytes_read`] and hands it a [`Transport`] for the
//! outbound direction, which keeps the framing logic testable without a
//! network and lets one readiness loop own the stream. Outbound values wait
//! in a bounded queue of packed bodies; [`RpcDriver::flush`] drains it as
//! far as the transport allows and picks up mid-packet after `WouldBlock`.
//!
//! The packet header is small enough that it is written in a single call
//! and is never resumed partway: a transport that splits it leaves the
//! stream unframeable, so that case fails the connection.

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use chainpack_wire::{pack, unpack_exact, varint, RpcValue, UnpackError};

use crate::error::DriverError;
use crate::message::{RpcError, RpcMessage, RpcType};
use crate::transport::Transport;

/// Protocol revision this driver speaks.
pub const PROTOCOL_VERSION: u64 = 1;

/// Default cap on packed bytes waiting in the send queue.
pub const DEFAULT_MAX_QUEUE_BYTES: usize = 4 * 1024 * 1024;

/// Default cap on the advertised length of one inbound packet.
pub const DEFAULT_MAX_PACKET_BYTES: usize = 16 * 1024 * 1024;

/// Tunables for one driver instance.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Packed bytes the send queue may hold before rejecting new values.
    pub max_queue_bytes: usize,
    /// Largest inbound packet length accepted.
    pub max_packet_bytes: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_queue_bytes: DEFAULT_MAX_QUEUE_BYTES,
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
        }
    }
}

/// Frames outbound values into packets and reassembles inbound packets.
///
/// Decoded inbound values are delivered to the callback given at
/// construction, one call per packet, in arrival order.
pub struct RpcDriver<T: Transport> {
    transport: T,
    config: DriverConfig,
    send_queue: VecDeque<Bytes>,
    queued_bytes: usize,
    head_header_sent: bool,
    head_written: usize,
    recv_buf: BytesMut,
    on_message: Box<dyn FnMut(RpcValue) + Send>,
    next_request_id: u64,
}

impl<T: Transport> RpcDriver<T> {
    /// Creates a driver over `transport` delivering inbound values to
    /// `on_message`.
    pub fn new(
        transport: T,
        config: DriverConfig,
        on_message: impl FnMut(RpcValue) + Send + 'static,
    ) -> Self {
        Self {
            transport,
            config,
            send_queue: VecDeque::new(),
            queued_bytes: 0,
            head_header_sent: false,
            head_written: 0,
            recv_buf: BytesMut::new(),
            on_message: Box::new(on_message),
            next_request_id: 1,
        }
    }

    /// Queues a packed value for sending and flushes as far as the
    /// transport allows.
    pub fn send_value(&mut self, value: &RpcValue) -> Result<(), DriverError> {
        let body = pack(value);
        if self.queued_bytes + body.len() > self.config.max_queue_bytes {
            return Err(DriverError::QueueFull);
        }
        self.queued_bytes += body.len();
        self.send_queue.push_back(body);
        self.flush()
    }

    /// Sends an RPC message, rejecting shapes no peer could classify.
    pub fn send_message(&mut self, message: &RpcMessage) -> Result<(), DriverError> {
        if message.rpc_type() == RpcType::Undefined {
            return Err(DriverError::UndefinedMessage);
        }
        self.send_value(message.as_value())
    }

    /// Sends a request for `method`, returning the id assigned to it.
    pub fn send_request(
        &mut self,
        method: &str,
        params: Option<RpcValue>,
    ) -> Result<u64, DriverError> {
        let id = self.next_request_id();
        let msg = RpcMessage::new_request(id, method, params);
        self.send_message(&msg)?;
        Ok(id)
    }

    /// Sends a successful response to request `id`.
    pub fn send_response(
        &mut self,
        id: u64,
        result: impl Into<RpcValue>,
    ) -> Result<(), DriverError> {
        self.send_message(&RpcMessage::new_response(id, result))
    }

    /// Sends an error response to request `id`.
    pub fn send_error(&mut self, id: u64, error: RpcError) -> Result<(), DriverError> {
        self.send_message(&RpcMessage::new_error(id, error))
    }

    /// Sends a notify for `method`.
    pub fn send_notify(
        &mut self,
        method: &str,
        params: Option<RpcValue>,
    ) -> Result<(), DriverError> {
        self.send_message(&RpcMessage::new_notify(method, params))
    }

    /// Hands out the next request id. Ids start at 1 and never repeat
    /// within one driver.
    pub fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Writes queued packets until done or the transport stops taking
    /// bytes.
    ///
    /// `WouldBlock` is not an error: the driver remembers its position
    /// within the current packet and resumes on the next call.
    pub fn flush(&mut self) -> Result<(), DriverError> {
        loop {
            let Some(chunk) = self.send_queue.front() else {
                return Ok(());
            };
            if !self.head_header_sent {
                let mut version = BytesMut::with_capacity(2);
                varint::put_uint(&mut version, PROTOCOL_VERSION);
                let mut header = BytesMut::with_capacity(10 + version.len());
                varint::put_uint(&mut header, (version.len() + chunk.len()) as u64);
                header.extend_from_slice(&version);
                match self.transport.write_bytes(&header) {
                    Ok(0) => return Err(DriverError::Stalled),
                    Ok(n) if n == header.len() => self.head_header_sent = true,
                    Ok(_) => return Err(DriverError::HeaderWrite),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(err) => return Err(DriverError::Transport(err)),
                }
            }
            while self.head_written < chunk.len() {
                match self.transport.write_bytes(&chunk[self.head_written..]) {
                    Ok(0) => return Err(DriverError::Stalled),
                    Ok(n) => self.head_written += n,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(err) => return Err(DriverError::Transport(err)),
                }
            }
            let finished = chunk.len();
            self.send_queue.pop_front();
            self.queued_bytes -= finished;
            self.head_header_sent = false;
            self.head_written = 0;
            trace!(bytes = finished, "flushed outbound packet");
        }
    }

    /// Feeds inbound stream bytes, invoking the callback once per complete
    /// packet.
    ///
    /// Partial packets are buffered until the rest arrives. The protocol
    /// version is checked as soon as its bytes are in, ahead of the body,
    /// so an incompatible peer fails fast instead of after a large upload.
    pub fn bytes_read(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        self.recv_buf.extend_from_slice(bytes);
        loop {
            let (value, consumed) = {
                let mut input: &[u8] = self.recv_buf.as_ref();
                let available = input.len();
                let frame_len = match varint::get_uint(&mut input) {
                    Ok(len) => len,
                    Err(UnpackError::Incomplete) => return Ok(()),
                    Err(err) => return Err(DriverError::Malformed(err)),
                };
                if frame_len == 0 {
                    return Err(DriverError::Malformed(UnpackError::Malformed(
                        "zero length packet",
                    )));
                }
                let frame_len = usize::try_from(frame_len).map_err(|_| {
                    DriverError::Malformed(UnpackError::Malformed("packet length overflows usize"))
                })?;
                if frame_len > self.config.max_packet_bytes {
                    return Err(DriverError::FrameTooLarge(frame_len));
                }
                let after_len = input.len();
                let version = match varint::get_uint(&mut input) {
                    Ok(version) => version,
                    Err(UnpackError::Incomplete) => return Ok(()),
                    Err(err) => return Err(DriverError::Malformed(err)),
                };
                if version != PROTOCOL_VERSION {
                    return Err(DriverError::ProtocolVersionMismatch(version));
                }
                let version_len = after_len - input.len();
                if frame_len < version_len {
                    return Err(DriverError::Malformed(UnpackError::Malformed(
                        "packet length shorter than version field",
                    )));
                }
                let body_len = frame_len - version_len;
                if input.len() < body_len {
                    return Ok(());
                }
                let value = unpack_exact(&input[..body_len]).map_err(DriverError::Malformed)?;
                (value, available - after_len + frame_len)
            };
            self.recv_buf.advance(consumed);
            trace!(bytes = consumed, "deframed inbound value");
            (self.on_message)(value);
        }
    }

    /// Drops all queued outbound packets and buffered inbound bytes.
    ///
    /// Called when the connection dies; the driver must not retain half a
    /// packet that would corrupt a future stream.
    pub fn close(&mut self) {
        let dropped = self.send_queue.len();
        self.send_queue.clear();
        self.queued_bytes = 0;
        self.head_header_sent = false;
        self.head_written = 0;
        self.recv_buf.clear();
        if dropped > 0 {
            debug!(packets = dropped, "discarded queued packets on close");
        }
    }

    /// Whether any outbound bytes are still waiting on the transport.
    pub fn has_pending_writes(&self) -> bool {
        !self.send_queue.is_empty()
    }

    /// Packed bytes currently queued for sending.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ErrorCode;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    enum WriteStep {
        Accept(usize),
        WouldBlock,
        Closed,
    }

    /// Transport double driven by a script of write outcomes; once the
    /// script runs out it accepts everything.
    struct ScriptTransport {
        wrote: Arc<Mutex<Vec<u8>>>,
        script: VecDeque<WriteStep>,
    }

    impl ScriptTransport {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            Self::scripted(Vec::new())
        }

        fn scripted(steps: Vec<WriteStep>) -> (Self, Arc<Mutex<Vec<u8>>>) {
            let wrote = Arc::new(Mutex::new(Vec::new()));
            let transport = Self {
                wrote: wrote.clone(),
                script: steps.into(),
            };
            (transport, wrote)
        }
    }

    impl Transport for ScriptTransport {
        fn write_bytes(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                None => {
                    self.wrote.lock().unwrap().extend_from_slice(buf);
                    Ok(buf.len())
                }
                Some(WriteStep::Accept(n)) => {
                    let n = n.min(buf.len());
                    self.wrote.lock().unwrap().extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Some(WriteStep::WouldBlock) => {
                    Err(io::Error::new(io::ErrorKind::WouldBlock, "no room"))
                }
                Some(WriteStep::Closed) => Ok(0),
            }
        }
    }

    fn collecting_driver(
        transport: ScriptTransport,
        config: DriverConfig,
    ) -> (RpcDriver<ScriptTransport>, Arc<Mutex<Vec<RpcValue>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let driver = RpcDriver::new(transport, config, move |value| {
            sink.lock().unwrap().push(value);
        });
        (driver, seen)
    }

    #[test]
    fn test_send_value_frames_packet() {
        let (transport, wrote) = ScriptTransport::new();
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());

        driver.send_value(&RpcValue::from(2u64)).unwrap();

        // Length 2 covers the version byte plus the one-byte body.
        assert_eq!(*wrote.lock().unwrap(), [0x02, 0x01, 0x02]);
        assert!(!driver.has_pending_writes());
        assert_eq!(driver.queued_bytes(), 0);
    }

    #[test]
    fn test_round_trip_between_drivers() {
        let (transport, wrote) = ScriptTransport::new();
        let (mut sender, _) = collecting_driver(transport, DriverConfig::default());
        let (receiver_transport, _) = ScriptTransport::new();
        let (mut receiver, seen) = collecting_driver(receiver_transport, DriverConfig::default());

        sender
            .send_value(&RpcValue::from(vec![
                RpcValue::from("hello"),
                RpcValue::from(-7i64),
            ]))
            .unwrap();
        receiver.bytes_read(&wrote.lock().unwrap()).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            RpcValue::from(vec![RpcValue::from("hello"), RpcValue::from(-7i64)]),
        );
    }

    #[test]
    fn test_bytes_arrive_one_at_a_time() {
        let (transport, wrote) = ScriptTransport::new();
        let (mut sender, _) = collecting_driver(transport, DriverConfig::default());
        sender.send_value(&RpcValue::from("dripfeed")).unwrap();

        let (receiver_transport, _) = ScriptTransport::new();
        let (mut receiver, seen) = collecting_driver(receiver_transport, DriverConfig::default());
        for byte in wrote.lock().unwrap().iter() {
            receiver.bytes_read(&[*byte]).unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], RpcValue::from("dripfeed"));
    }

    #[test]
    fn test_multiple_packets_in_one_read() {
        let (transport, wrote) = ScriptTransport::new();
        let (mut sender, _) = collecting_driver(transport, DriverConfig::default());
        sender.send_value(&RpcValue::from(1u64)).unwrap();
        sender.send_value(&RpcValue::from(2u64)).unwrap();
        sender.send_value(&RpcValue::from(3u64)).unwrap();

        let (receiver_transport, _) = ScriptTransport::new();
        let (mut receiver, seen) = collecting_driver(receiver_transport, DriverConfig::default());
        receiver.bytes_read(&wrote.lock().unwrap()).unwrap();

        let seen = seen.lock().unwrap();
        let values: Vec<_> = seen.iter().map(|v| v.as_uint().unwrap()).collect();
        assert_eq!(values, [1, 2, 3]);
    }

    #[test]
    fn test_version_mismatch_checked_before_body() {
        let (transport, _) = ScriptTransport::new();
        let (mut driver, seen) = collecting_driver(transport, DriverConfig::default());

        // Length says three more bytes follow, but the version field alone
        // is enough to fail: the body never needs to arrive.
        let err = driver.bytes_read(&[0x03, 0x02]).unwrap_err();
        match err {
            DriverError::ProtocolVersionMismatch(version) => assert_eq!(version, 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_length_packet_rejected() {
        let (transport, _) = ScriptTransport::new();
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());
        assert!(matches!(
            driver.bytes_read(&[0x00]),
            Err(DriverError::Malformed(_)),
        ));
    }

    #[test]
    fn test_empty_body_packet_rejected() {
        let (transport, _) = ScriptTransport::new();
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());
        // Length 1 leaves no room for a packed value after the version.
        assert!(matches!(
            driver.bytes_read(&[0x01, 0x01]),
            Err(DriverError::Malformed(_)),
        ));
    }

    #[test]
    fn test_oversized_packet_rejected_by_length_alone() {
        let (transport, _) = ScriptTransport::new();
        let config = DriverConfig {
            max_packet_bytes: 16,
            ..DriverConfig::default()
        };
        let (mut driver, _) = collecting_driver(transport, config);

        // Advertises a 1000-byte packet; body bytes never arrive.
        let err = driver.bytes_read(&[0x83, 0xE8]).unwrap_err();
        match err {
            DriverError::FrameTooLarge(len) => assert_eq!(len, 1000),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_body_is_fatal() {
        let (transport, _) = ScriptTransport::new();
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());
        // Body is a bare container terminator.
        assert!(matches!(
            driver.bytes_read(&[0x02, 0x01, 0x80]),
            Err(DriverError::Malformed(_)),
        ));
    }

    #[test]
    fn test_would_block_keeps_packet_queued() {
        let (transport, wrote) = ScriptTransport::scripted(vec![WriteStep::WouldBlock]);
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());

        driver.send_value(&RpcValue::from(9u64)).unwrap();
        assert!(driver.has_pending_writes());
        assert!(wrote.lock().unwrap().is_empty());

        // Script exhausted: the next flush drains everything.
        driver.flush().unwrap();
        assert!(!driver.has_pending_writes());
        assert_eq!(*wrote.lock().unwrap(), [0x02, 0x01, 0x09]);
    }

    #[test]
    fn test_partial_body_write_resumes() {
        // Header accepted whole, then three body bytes, then a stall.
        let (transport, wrote) = ScriptTransport::scripted(vec![
            WriteStep::Accept(2),
            WriteStep::Accept(3),
            WriteStep::WouldBlock,
        ]);
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());

        driver.send_value(&RpcValue::from("abcdef")).unwrap();
        assert!(driver.has_pending_writes());

        driver.flush().unwrap();
        assert!(!driver.has_pending_writes());
        assert_eq!(
            *wrote.lock().unwrap(),
            [0x09, 0x01, 0x8C, 0x06, b'a', b'b', b'c', b'd', b'e', b'f'],
        );
    }

    #[test]
    fn test_split_header_is_fatal() {
        let (transport, _) = ScriptTransport::scripted(vec![WriteStep::Accept(1)]);
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());
        assert!(matches!(
            driver.send_value(&RpcValue::from(1u64)),
            Err(DriverError::HeaderWrite),
        ));
    }

    #[test]
    fn test_zero_byte_accept_is_stalled() {
        let (transport, _) = ScriptTransport::scripted(vec![WriteStep::Closed]);
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());
        assert!(matches!(
            driver.send_value(&RpcValue::from(1u64)),
            Err(DriverError::Stalled),
        ));
    }

    #[test]
    fn test_queue_full_rejects_new_values() {
        let steps = (0..8).map(|_| WriteStep::WouldBlock).collect();
        let (transport, _) = ScriptTransport::scripted(steps);
        let config = DriverConfig {
            max_queue_bytes: 4,
            ..DriverConfig::default()
        };
        let (mut driver, _) = collecting_driver(transport, config);

        for _ in 0..4 {
            driver.send_value(&RpcValue::from(1u64)).unwrap();
        }
        assert_eq!(driver.queued_bytes(), 4);
        let err = driver.send_value(&RpcValue::from(1u64)).unwrap_err();
        assert!(matches!(err, DriverError::QueueFull));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_close_discards_both_directions() {
        let (transport, _) = ScriptTransport::scripted(vec![WriteStep::WouldBlock]);
        let (mut driver, seen) = collecting_driver(transport, DriverConfig::default());

        driver.send_value(&RpcValue::from(5u64)).unwrap();
        driver.bytes_read(&[0x05, 0x01]).unwrap();
        driver.close();
        assert!(!driver.has_pending_writes());
        assert_eq!(driver.queued_bytes(), 0);

        // A fresh packet parses cleanly after the stale half-packet is gone.
        driver.bytes_read(&[0x02, 0x01, 0x07]).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].as_uint(), Some(7));
    }

    #[test]
    fn test_send_request_assigns_sequential_ids() {
        let (transport, wrote) = ScriptTransport::new();
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());

        let first = driver.send_request("status", None).unwrap();
        let second = driver
            .send_request("echo", Some(RpcValue::from("x")))
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);

        let (receiver_transport, _) = ScriptTransport::new();
        let (mut receiver, seen) = collecting_driver(receiver_transport, DriverConfig::default());
        receiver.bytes_read(&wrote.lock().unwrap()).unwrap();
        let seen = seen.lock().unwrap();
        let ids: Vec<_> = seen
            .iter()
            .map(|v| RpcMessage::from_value(v.clone()).unwrap().id().unwrap())
            .collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn test_send_message_round_trip() {
        let (transport, wrote) = ScriptTransport::new();
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());

        driver.send_response(4, RpcValue::from(true)).unwrap();
        driver
            .send_error(5, RpcError::new(ErrorCode::MethodNotFound, "nope"))
            .unwrap();
        driver.send_notify("chng", Some(RpcValue::from(1u64))).unwrap();

        let (receiver_transport, _) = ScriptTransport::new();
        let (mut receiver, seen) = collecting_driver(receiver_transport, DriverConfig::default());
        receiver.bytes_read(&wrote.lock().unwrap()).unwrap();

        let seen = seen.lock().unwrap();
        let types: Vec<_> = seen
            .iter()
            .map(|v| RpcMessage::from_value(v.clone()).unwrap().rpc_type())
            .collect();
        assert_eq!(
            types,
            [RpcType::Response, RpcType::Response, RpcType::Notify],
        );
    }

    #[test]
    fn test_undefined_message_never_sent() {
        let (transport, wrote) = ScriptTransport::new();
        let (mut driver, _) = collecting_driver(transport, DriverConfig::default());
        assert!(matches!(
            driver.send_message(&RpcMessage::new()),
            Err(DriverError::UndefinedMessage),
        ));
        assert!(wrote.lock().unwrap().is_empty());
    }
}
