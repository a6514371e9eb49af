//! Connection phase: greeting, optional TLS upgrade, authentication.
//!
//! ```text
//! await-greeting → (TLS upgrade) → send-auth-response → await-auth-result
//!     → {auth-switch → retry with new plugin (once)} → connected
//! ```

#![allow(clippy::cast_possible_truncation)]

use crate::auth::{self, AuthPolicy, caching_sha2, plugins};
use crate::config::{MySqlConfig, TlsSource};
use crate::protocol::{OkPacket, PacketReader, PacketWriter, capabilities};
use crate::registry;
use crate::tls;
use crate::transport::PacketTransport;
use mywire_core::error::{ConnectionError, ConnectionErrorKind};
use mywire_core::{Error, Result};

/// The server's initial handshake (protocol v10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Auth plugin data, both parts, without the trailing NUL
    pub scramble: Vec<u8>,
    pub capabilities: u32,
    /// Server default collation
    pub collation: u8,
    pub status_flags: u16,
    pub auth_plugin: String,
}

/// What the connection phase settled on.
#[derive(Debug)]
pub struct Session {
    pub transport: PacketTransport,
    pub server: ServerHandshake,
    /// Negotiated capabilities (client ∩ server)
    pub capabilities: u32,
    pub status_flags: u16,
}

/// Parse the initial handshake packet.
///
/// An ERR packet in its place (e.g. "too many connections") is returned as
/// a server error.
pub fn parse_handshake(payload: &[u8]) -> Result<ServerHandshake> {
    let truncated = || Error::protocol("truncated handshake packet");
    let mut reader = PacketReader::new(payload);

    if reader.peek() == Some(0xFF) {
        let err = reader
            .parse_err_packet()
            .ok_or_else(|| Error::protocol("invalid error packet in place of handshake"))?;
        return Err(Error::Server(err));
    }

    let protocol_version = reader.read_u8().ok_or_else(truncated)?;
    if protocol_version != 10 {
        return Err(Error::protocol(format!(
            "unsupported protocol version: {}",
            protocol_version
        )));
    }

    let server_version = reader.read_null_string();
    let connection_id = reader.read_u32_le().ok_or_else(truncated)?;
    let mut scramble = reader.read_bytes(8).ok_or_else(truncated)?.to_vec();
    reader.skip(1);

    let caps_lower = reader.read_u16_le().ok_or_else(truncated)?;
    let collation = reader.read_u8().unwrap_or(0);
    let status_flags = reader.read_u16_le().unwrap_or(0);
    let caps_upper = reader.read_u16_le().unwrap_or(0);
    let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

    let auth_data_len = usize::from(reader.read_u8().unwrap_or(0));
    reader.skip(10);

    if capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        let len2 = auth_data_len.saturating_sub(8).max(13);
        let part2 = reader
            .read_bytes(len2)
            .unwrap_or_else(|| reader.read_rest());
        let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
        scramble.extend_from_slice(part2);
    }

    let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        String::from_utf8_lossy(reader.read_null_bytes()).into_owned()
    } else {
        plugins::MYSQL_NATIVE_PASSWORD.to_string()
    };

    Ok(ServerHandshake {
        protocol_version,
        server_version,
        connection_id,
        scramble,
        capabilities,
        collation,
        status_flags,
        auth_plugin,
    })
}

/// Build the HandshakeResponse41 payload.
pub fn build_handshake_response(
    config: &MySqlConfig,
    client_caps: u32,
    collation: u8,
    plugin: &str,
    auth_response: &[u8],
) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(128 + auth_response.len());

    writer.write_u32_le(client_caps);
    writer.write_u32_le(config.max_allowed_packet.min(u32::MAX as usize) as u32);
    writer.write_u8(collation);
    writer.write_zeros(23);
    writer.write_null_string(&config.user);

    if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        writer.write_lenenc_bytes(auth_response);
    } else {
        // SECURE_CONNECTION: responses are at most 255 bytes
        writer.write_u8(auth_response.len() as u8);
        writer.write_bytes(auth_response);
    }

    if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
        writer.write_null_string(config.database.as_deref().unwrap_or_default());
    }

    if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        writer.write_null_string(plugin);
    }

    if client_caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
        let mut attrs = PacketWriter::new();
        for (key, value) in &config.attributes {
            attrs.write_lenenc_string(key);
            attrs.write_lenenc_string(value);
        }
        writer.write_lenenc_bytes(attrs.as_bytes());
    }

    writer.into_bytes()
}

/// Run the connection phase over a fresh transport.
pub fn establish(
    mut transport: PacketTransport,
    config: &MySqlConfig,
    policy: &AuthPolicy,
) -> Result<Session> {
    transport.reset_sequence();
    let server = parse_handshake(&transport.read_packet()?)?;
    tracing::debug!(
        server_version = %server.server_version,
        connection_id = server.connection_id,
        plugin = %server.auth_plugin,
        "received server handshake"
    );

    if server.capabilities & capabilities::CLIENT_PROTOCOL_41 == 0 {
        return Err(Error::connection(
            ConnectionErrorKind::Connect,
            format!(
                "server {} does not support protocol 4.1",
                server.server_version
            ),
        ));
    }

    let mut client_caps = config.capability_flags() & server.capabilities;
    let collation = config.collation_id()?;

    let use_tls = tls::validate_ssl_mode(config.ssl_mode, server.capabilities)?;
    if use_tls {
        let tls_config = match &config.tls {
            TlsSource::Inline(tls) => tls.clone(),
            TlsSource::Named(name) => registry::lookup_tls_config(name).ok_or_else(|| {
                Error::config(format!("TLS config '{name}' is not registered"))
            })?,
        };
        let request = tls::build_ssl_request_packet(
            client_caps,
            config.max_allowed_packet.min(u32::MAX as usize) as u32,
            collation,
        );
        transport.write_payload(&request)?;
        transport = transport.upgrade_tls(&tls_config, &config.host, config.ssl_mode)?;
    } else {
        client_caps &= !capabilities::CLIENT_SSL;
    }

    let plugin = auth::effective_plugin(&server.auth_plugin);
    let response = auth::initial_response(plugin, &server.scramble, policy, transport.is_secure())?;
    let payload = build_handshake_response(config, client_caps, collation, plugin, &response);
    transport.write_payload(&payload)?;

    let ok = authenticate(&mut transport, plugin, &server.scramble, policy)?;
    tracing::debug!(
        capabilities = format_args!("{client_caps:#010x}"),
        tls = transport.is_tls(),
        "authenticated"
    );

    Ok(Session {
        transport,
        status_flags: ok.status_flags,
        server,
        capabilities: client_caps,
    })
}

/// Drive the auth exchange until OK or ERR.
fn authenticate(
    transport: &mut PacketTransport,
    plugin: &'static str,
    scramble: &[u8],
    policy: &AuthPolicy,
) -> Result<OkPacket> {
    let mut plugin = plugin;
    let mut scramble = scramble.to_vec();
    let mut switched = false;

    loop {
        let packet = transport.read_packet()?;
        let mut reader = PacketReader::new(&packet);
        match reader.peek() {
            Some(0x00) => {
                return reader
                    .parse_ok_packet()
                    .ok_or_else(|| Error::protocol("invalid OK packet after authentication"));
            }
            Some(0xFF) => {
                let err = reader
                    .parse_err_packet()
                    .ok_or_else(|| Error::protocol("invalid error packet during authentication"))?;
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Authentication,
                    message: format!("authentication failed: {}", err),
                    source: Some(Box::new(err)),
                }));
            }
            Some(0xFE) => {
                if switched {
                    return Err(Error::protocol("server requested a second auth switch"));
                }
                switched = true;
                reader.skip(1);
                let name = String::from_utf8_lossy(reader.read_null_bytes()).into_owned();
                let data = reader.read_rest();
                scramble = data.strip_suffix(&[0]).unwrap_or(data).to_vec();
                plugin = auth::effective_plugin(&name);
                tracing::warn!(plugin = %name, "server requested auth switch");

                let response =
                    auth::initial_response(plugin, &scramble, policy, transport.is_secure())?;
                transport.write_payload(&response)?;
            }
            Some(caching_sha2::AUTH_MORE_DATA) => {
                reader.skip(1);
                let data = reader.read_rest();
                more_data(transport, plugin, &scramble, policy, data)?;
            }
            Some(other) => {
                return Err(Error::protocol(format!(
                    "unexpected packet 0x{other:02x} during authentication"
                )));
            }
            None => return Err(Error::protocol("empty packet during authentication")),
        }
    }
}

/// Handle an auth-more-data packet for the current plugin.
fn more_data(
    transport: &mut PacketTransport,
    plugin: &str,
    scramble: &[u8],
    policy: &AuthPolicy,
    data: &[u8],
) -> Result<()> {
    match (plugin, data.first().copied()) {
        (plugins::CACHING_SHA2_PASSWORD, Some(caching_sha2::FAST_AUTH_SUCCESS)) => {
            tracing::trace!("caching_sha2_password fast auth succeeded");
            Ok(())
        }
        (plugins::CACHING_SHA2_PASSWORD, Some(caching_sha2::PERFORM_FULL_AUTH)) => {
            let password = policy.password.as_str();
            if transport.is_secure() {
                transport.write_payload(&auth::password_with_nul(password))
            } else if let Some(key) = &policy.server_public_key {
                transport.write_payload(&auth::encrypt_password(password, scramble, key)?)
            } else if policy.allow_public_key_retrieval {
                transport.write_payload(&[caching_sha2::REQUEST_PUBLIC_KEY])?;
                let key = read_public_key(transport)?;
                transport.write_payload(&auth::encrypt_password(password, scramble, &key)?)
            } else {
                Err(auth::public_key_retrieval_disabled())
            }
        }
        // Public key sent in reply to a sha256_password request
        (plugins::SHA256_PASSWORD, Some(_)) => {
            let key = public_key_from(data)?;
            transport.write_payload(&auth::encrypt_password(&policy.password, scramble, &key)?)
        }
        _ => Err(Error::protocol(format!(
            "unexpected auth data for plugin {plugin}"
        ))),
    }
}

fn read_public_key(transport: &mut PacketTransport) -> Result<rsa::RsaPublicKey> {
    let packet = transport.read_packet()?;
    match packet.split_first() {
        Some((&caching_sha2::AUTH_MORE_DATA, pem)) => public_key_from(pem),
        _ => Err(Error::protocol("expected public key from server")),
    }
}

fn public_key_from(pem: &[u8]) -> Result<rsa::RsaPublicKey> {
    let pem = std::str::from_utf8(pem)
        .map_err(|_| Error::protocol("server public key is not valid PEM"))?;
    auth::parse_public_key(pem)
        .map_err(|e| Error::protocol(format!("server sent an unusable public key: {e}")))
}
