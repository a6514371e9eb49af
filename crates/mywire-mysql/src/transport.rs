//! Packet framing over a plain or TLS-upgraded stream.
//!
//! Every logical payload travels as one or more packets with a 3-byte
//! length and a sequence byte. The sequence starts at zero for each command
//! and must match on every packet received; a mismatch means the stream can
//! no longer be trusted.

#![allow(clippy::cast_possible_truncation)]

use crate::config::{SslMode, TlsConfig};
use crate::net::NetStream;
use crate::protocol::writer::frame_payload;
use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};
use crate::tls;
use mywire_core::error::ProtocolError;
use mywire_core::{Error, Result};
use std::io::{self, Read, Write};
use std::time::Duration;

enum Socket {
    Plain(Box<dyn NetStream>),
    #[cfg(feature = "tls")]
    Tls(Box<tls::TlsStream<Box<dyn NetStream>>>),
}

impl Socket {
    fn stream(&mut self) -> &mut dyn NetStream {
        match self {
            Socket::Plain(s) => s.as_mut(),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.get_mut().as_mut(),
        }
    }

    #[cfg(feature = "tls")]
    fn encrypted(stream: tls::TlsStream<Box<dyn NetStream>>) -> Self {
        Socket::Tls(Box::new(stream))
    }

    #[cfg(not(feature = "tls"))]
    fn encrypted(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Socket::Tls(s) => s.flush(),
        }
    }
}

/// Largest `max_allowed_packet` a MySQL server accepts (1 GiB).
pub const DEFAULT_MAX_RESPONSE_PACKET: usize = 1 << 30;

/// Frames and unframes packets for one connection.
pub struct PacketTransport {
    socket: Socket,
    sequence_id: u8,
    max_allowed_packet: usize,
    max_response_packet: usize,
}

impl std::fmt::Debug for PacketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketTransport")
            .field("tls", &self.is_tls())
            .field("sequence_id", &self.sequence_id)
            .field("max_allowed_packet", &self.max_allowed_packet)
            .field("max_response_packet", &self.max_response_packet)
            .finish()
    }
}

impl PacketTransport {
    pub fn new(stream: Box<dyn NetStream>, max_allowed_packet: usize) -> Self {
        Self {
            socket: Socket::Plain(stream),
            sequence_id: 0,
            max_allowed_packet,
            max_response_packet: DEFAULT_MAX_RESPONSE_PACKET,
        }
    }

    /// Cap on a reassembled payload read from the server.
    #[must_use]
    pub fn with_max_response_packet(mut self, limit: usize) -> Self {
        self.max_response_packet = limit;
        self
    }

    pub fn is_tls(&self) -> bool {
        match self.socket {
            Socket::Plain(_) => false,
            #[cfg(feature = "tls")]
            Socket::Tls(_) => true,
        }
    }

    /// Whether secrets may be sent in clear: TLS, or a host-local stream.
    pub fn is_secure(&self) -> bool {
        match &self.socket {
            Socket::Plain(s) => s.is_local(),
            #[cfg(feature = "tls")]
            Socket::Tls(_) => true,
        }
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Start a new command: the next packet sent carries sequence 0.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    pub fn max_allowed_packet(&self) -> usize {
        self.max_allowed_packet
    }

    pub fn set_timeouts(
        &mut self,
        read: Option<Duration>,
        write: Option<Duration>,
    ) -> Result<()> {
        let stream = self.socket.stream();
        stream.set_read_timeout(read)?;
        stream.set_write_timeout(write)?;
        Ok(())
    }

    /// Upgrade the stream to TLS in place; framing and sequence continue.
    pub fn upgrade_tls(
        self,
        tls_config: &TlsConfig,
        server_name: &str,
        ssl_mode: SslMode,
    ) -> Result<Self> {
        let Socket::Plain(stream) = self.socket else {
            return Err(Error::protocol("TLS upgrade requested twice"));
        };
        let encrypted = tls::connect(stream, tls_config, server_name, ssl_mode)?;
        Ok(Self {
            socket: Socket::encrypted(encrypted),
            sequence_id: self.sequence_id,
            max_allowed_packet: self.max_allowed_packet,
            max_response_packet: self.max_response_packet,
        })
    }

    /// Read one logical payload, reassembling split packets.
    ///
    /// A payload growing past `max_response_packet` is a protocol error;
    /// nothing beyond the limit is buffered.
    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header_buf = [0u8; PacketHeader::SIZE];
            self.socket.read_exact(&mut header_buf).map_err(read_error)?;
            let header = PacketHeader::from_bytes(&header_buf);

            if header.sequence_id != self.sequence_id {
                return Err(Error::Protocol(ProtocolError {
                    message: format!(
                        "packet sequence out of sync: expected {}, got {}",
                        self.sequence_id, header.sequence_id
                    ),
                    raw_data: Some(header_buf.to_vec()),
                    source: None,
                }));
            }
            self.sequence_id = self.sequence_id.wrapping_add(1);

            let len = header.payload_length as usize;
            let start = payload.len();
            if start + len > self.max_response_packet {
                return Err(Error::protocol(format!(
                    "server packet exceeds {} bytes",
                    self.max_response_packet
                )));
            }
            payload.resize(start + len, 0);
            self.socket
                .read_exact(&mut payload[start..])
                .map_err(read_error)?;

            tracing::trace!(seq = header.sequence_id, len, "packet received");
            if len < MAX_PACKET_SIZE {
                return Ok(payload);
            }
        }
    }

    /// Frame and send one logical payload.
    ///
    /// Payloads over `max_allowed_packet` are refused before anything is
    /// written, leaving the connection usable.
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_allowed_packet {
            return Err(Error::usage(format!(
                "packet of {} bytes exceeds max_allowed_packet ({})",
                payload.len(),
                self.max_allowed_packet
            )));
        }
        let first_seq = self.sequence_id;
        let framed = frame_payload(payload, &mut self.sequence_id);
        self.socket.write_all(&framed)?;
        self.socket.flush()?;
        tracing::trace!(seq = first_seq, len = payload.len(), "packet sent");
        Ok(())
    }
}

fn read_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        return Error::BadConnection(mywire_core::ConnectionError {
            kind: mywire_core::ConnectionErrorKind::Disconnected,
            message: "server closed the connection".to_string(),
            source: Some(Box::new(e)),
        });
    }
    Error::from(e)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory stream: reads from a script, records writes.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MemoryStream {
        pub input: Arc<Mutex<io::Cursor<Vec<u8>>>>,
        pub output: Arc<Mutex<Vec<u8>>>,
    }

    impl MemoryStream {
        pub(crate) fn with_input(bytes: Vec<u8>) -> Self {
            Self {
                input: Arc::new(Mutex::new(io::Cursor::new(bytes))),
                output: Arc::default(),
            }
        }

        pub(crate) fn written(&self) -> Vec<u8> {
            self.output.lock().unwrap().clone()
        }
    }

    impl Read for MemoryStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.lock().unwrap().read(buf)
        }
    }

    impl Write for MemoryStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl NetStream for MemoryStream {
        fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }

        fn set_write_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn packet(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = PacketHeader {
            payload_length: payload.len() as u32,
            sequence_id: seq,
        }
        .to_bytes()
        .to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_read_single_packet() {
        let stream = MemoryStream::with_input(packet(0, b"\x00\x01\x02"));
        let mut transport = PacketTransport::new(Box::new(stream), 1024);
        assert_eq!(transport.read_packet().unwrap(), vec![0, 1, 2]);
        assert_eq!(transport.sequence_id(), 1);
    }

    #[test]
    fn test_reassemble_split_payload() {
        let mut input = packet(0, &vec![7u8; MAX_PACKET_SIZE]);
        input.extend(packet(1, b"tail"));
        let mut transport = PacketTransport::new(Box::new(MemoryStream::with_input(input)), 1024);
        let payload = transport.read_packet().unwrap();
        assert_eq!(payload.len(), MAX_PACKET_SIZE + 4);
        assert_eq!(&payload[MAX_PACKET_SIZE..], b"tail");
    }

    #[test]
    fn test_reassemble_exact_maximum() {
        let mut input = packet(0, &vec![7u8; MAX_PACKET_SIZE]);
        input.extend(packet(1, &[]));
        let mut transport = PacketTransport::new(Box::new(MemoryStream::with_input(input)), 1024);
        assert_eq!(transport.read_packet().unwrap().len(), MAX_PACKET_SIZE);
        assert_eq!(transport.sequence_id(), 2);
    }

    #[test]
    fn test_sequence_mismatch_is_protocol_error() {
        let stream = MemoryStream::with_input(packet(5, b"x"));
        let mut transport = PacketTransport::new(Box::new(stream), 1024);
        let err = transport.read_packet().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("packet sequence out of sync"));
    }

    #[test]
    fn test_eof_is_bad_connection() {
        let stream = MemoryStream::with_input(vec![1, 0]);
        let mut transport = PacketTransport::new(Box::new(stream), 1024);
        assert!(transport.read_packet().unwrap_err().is_bad_connection());
    }

    #[test]
    fn test_write_payload_frames_and_advances() {
        let stream = MemoryStream::default();
        let mut transport = PacketTransport::new(Box::new(stream.clone()), 1024);
        transport.write_payload(b"\x0e").unwrap();
        assert_eq!(stream.written(), vec![1, 0, 0, 0, 0x0e]);
        assert_eq!(transport.sequence_id(), 1);

        transport.reset_sequence();
        transport.write_payload(b"ab").unwrap();
        assert_eq!(&stream.written()[5..], &[2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn test_oversized_payload_refused_before_write() {
        let stream = MemoryStream::default();
        let mut transport = PacketTransport::new(Box::new(stream.clone()), 8);
        let err = transport.write_payload(&[0u8; 9]).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert!(!err.is_fatal());
        assert!(stream.written().is_empty());
        assert_eq!(transport.sequence_id(), 0);
    }

    #[test]
    fn test_response_over_limit_is_protocol_error() {
        // Header alone: the limit is checked before the body is buffered
        let stream = MemoryStream::with_input(vec![0xFF, 0xFF, 0xFF, 0]);
        let mut transport =
            PacketTransport::new(Box::new(stream), 1024).with_max_response_packet(1024);
        let err = transport.read_packet().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.is_fatal());

        // Split payload crossing the limit on its second part
        let mut input = packet(0, &vec![7u8; MAX_PACKET_SIZE]);
        input.extend(packet(1, b"tail"));
        let mut transport = PacketTransport::new(Box::new(MemoryStream::with_input(input)), 1024)
            .with_max_response_packet(MAX_PACKET_SIZE + 2);
        let err = transport.read_packet().unwrap_err();
        assert!(err.to_string().contains("server packet exceeds"));
    }
}
