//! `LOAD DATA LOCAL INFILE` responses.
//!
//! The server names the content it wants in a 0xFB packet. Names starting
//! with `Reader::` address a registered reader factory; anything else must
//! be a registered file path, matched exactly. Whatever happens locally, the
//! exchange is always completed with an empty packet and the server's reply
//! is consumed, so the connection stays in sync.

use crate::protocol::{OkPacket, PacketReader};
use crate::registry;
use crate::transport::PacketTransport;
use mywire_core::error::LocalInfileError;
use mywire_core::{Error, Result};
use std::fs::File;
use std::io::{self, Read};

/// Reserved prefix selecting the reader registry.
pub const READER_PREFIX: &str = "Reader::";

const CHUNK_SIZE: usize = 64 * 1024;

/// Open the content source the server asked for.
fn open_source(name: &str) -> std::result::Result<Box<dyn Read + Send>, LocalInfileError> {
    if let Some(reader_name) = name.strip_prefix(READER_PREFIX) {
        let factory = registry::lookup_reader(reader_name)
            .ok_or_else(|| LocalInfileError::reader_not_registered(reader_name))?;
        return factory().map_err(|e| LocalInfileError::read_failed(name, e));
    }

    if !registry::is_local_file_registered(name) {
        return Err(LocalInfileError::file_not_registered(name));
    }
    let file = File::open(name).map_err(|e| LocalInfileError::read_failed(name, e))?;
    Ok(Box::new(file))
}

/// Send `source` in chunks no larger than `chunk_size`.
fn send_content(
    transport: &mut PacketTransport,
    name: &str,
    source: &mut dyn Read,
    chunk_size: usize,
) -> Result<u64> {
    let mut buf = vec![0u8; chunk_size];
    let mut sent = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => return Ok(sent),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::LocalInfile(LocalInfileError::read_failed(name, e))),
        };
        transport.write_payload(&buf[..n])?;
        sent += n as u64;
    }
}

/// Answer a LOCAL INFILE request (the 0xFB packet payload) and return the
/// server's final OK.
///
/// A local failure is reported after the server's reply has been read; a
/// server error reported in reply to a successful upload is returned as is.
pub fn handle_request(transport: &mut PacketTransport, request: &[u8]) -> Result<OkPacket> {
    let name = String::from_utf8_lossy(request.get(1..).unwrap_or_default()).into_owned();
    tracing::debug!(name = %name, "server requested local infile");

    // A chunk must stay below MAX_PACKET_SIZE so it never gets an empty
    // continuation packet, which the server would read as end of content.
    let chunk_size = CHUNK_SIZE.min(transport.max_allowed_packet()).max(1);

    let local = match open_source(&name) {
        Ok(mut source) => match send_content(transport, &name, source.as_mut(), chunk_size) {
            Ok(sent) => {
                tracing::trace!(name = %name, bytes = sent, "local infile content sent");
                None
            }
            Err(Error::LocalInfile(e)) => Some(e),
            Err(e) => return Err(e),
        },
        Err(e) => Some(e),
    };

    if let Some(e) = &local {
        tracing::warn!(error = %e, "local infile request refused");
    }

    transport.write_payload(&[])?;
    let reply = transport.read_packet()?;
    let mut reader = PacketReader::new(&reply);
    let outcome = match reader.peek() {
        Some(0x00) => reader
            .parse_ok_packet()
            .ok_or_else(|| Error::protocol("invalid OK packet after local infile")),
        Some(0xFF) => Err(reader
            .parse_err_packet()
            .map(Error::Server)
            .unwrap_or_else(|| Error::protocol("invalid error packet after local infile"))),
        _ => Err(Error::protocol("unexpected reply to local infile content")),
    };

    match local {
        Some(e) if !matches!(&outcome, Err(err) if err.is_fatal()) => Err(Error::LocalInfile(e)),
        _ => outcome,
    }
}
