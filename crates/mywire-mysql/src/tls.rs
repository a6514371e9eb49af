//! TLS upgrade for MySQL connections.
//!
//! When the server offers `CLIENT_SSL`, the client answers the greeting with
//! a 32-byte SSL request (capabilities, max packet size, collation, 23 zero
//! bytes) instead of the handshake response, runs the TLS handshake on the
//! same socket, then sends the full handshake response over TLS with the
//! packet sequence carried on.
//!
//! TLS requires the `tls` feature (on by default).

use crate::config::{SslMode, TlsConfig};
use crate::protocol::{PacketWriter, capabilities};
use mywire_core::Error;
use mywire_core::error::{ConnectionError, ConnectionErrorKind};

#[cfg(feature = "tls")]
use rustls::pki_types::CertificateDer;
#[cfg(feature = "tls")]
use std::io::{BufReader, Read, Write};
#[cfg(feature = "tls")]
use std::path::Path;
#[cfg(feature = "tls")]
use std::sync::Arc;

/// An encrypted connection socket.
#[cfg(feature = "tls")]
pub type TlsStream<S> = rustls::StreamOwned<rustls::ClientConnection, S>;

/// SSL request payload sent in place of the handshake response.
pub fn build_ssl_request_packet(client_caps: u32, max_packet_size: u32, collation: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_u32_le(client_caps | capabilities::CLIENT_SSL);
    writer.write_u32_le(max_packet_size);
    writer.write_u8(collation);
    writer.write_zeros(23);
    writer.into_bytes()
}

/// Whether to upgrade. Modes that require TLS fail against a server that
/// does not offer it.
pub fn validate_ssl_mode(ssl_mode: SslMode, server_caps: u32) -> Result<bool, Error> {
    let offered = server_caps & capabilities::CLIENT_SSL != 0;
    match (ssl_mode, offered) {
        (SslMode::Disable, _) => Ok(false),
        (SslMode::Preferred, offered) => Ok(offered),
        (_, true) => Ok(true),
        (_, false) => Err(tls_error("SSL required but server does not support it")),
    }
}

/// Check that the TLS settings can satisfy the SSL mode.
pub fn validate_tls_config(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<(), Error> {
    if tls_config.client_cert_path.is_some() != tls_config.client_key_path.is_some() {
        return Err(Error::config(
            "client certificate and client key must be set together for mutual TLS",
        ));
    }
    if !cfg!(feature = "tls") && ssl_mode.is_required() {
        return Err(Error::config(
            "SSL is required but mywire-mysql was built without the 'tls' feature",
        ));
    }
    Ok(())
}

fn tls_error(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Ssl,
        message: message.into(),
        source: None,
    })
}

/// Run the client side of the TLS handshake over `stream`.
///
/// The name checked against the certificate is `tls_config.server_name`
/// when set, else `server_name`.
#[cfg(feature = "tls")]
pub fn connect<S: Read + Write>(
    stream: S,
    tls_config: &TlsConfig,
    server_name: &str,
    ssl_mode: SslMode,
) -> Result<TlsStream<S>, Error> {
    let config = client_config(tls_config, ssl_mode)?;
    let name = tls_config.server_name.as_deref().unwrap_or(server_name);
    let server_name = rustls::pki_types::ServerName::try_from(name.to_string())
        .map_err(|e| tls_error(format!("invalid server name '{name}': {e}")))?;
    let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| tls_error(format!("TLS setup failed: {e}")))?;

    let mut tls = rustls::StreamOwned::new(conn, stream);
    while tls.conn.is_handshaking() {
        tls.conn.complete_io(&mut tls.sock).map_err(|e| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Ssl,
                message: format!("TLS handshake failed: {e}"),
                source: Some(Box::new(e)),
            })
        })?;
    }
    tracing::debug!(version = ?tls.conn.protocol_version(), "TLS established");
    Ok(tls)
}

/// Without the `tls` feature no upgrade can succeed.
#[cfg(not(feature = "tls"))]
pub fn connect<S>(
    _stream: S,
    _tls_config: &TlsConfig,
    _server_name: &str,
    _ssl_mode: SslMode,
) -> Result<std::convert::Infallible, Error> {
    Err(tls_error("TLS support requires the 'tls' feature of mywire-mysql"))
}

/// `Preferred` and `danger_skip_verify` accept any certificate; every other
/// mode verifies against the configured CA bundle or the webpki roots.
#[cfg(feature = "tls")]
fn client_config(tls_config: &TlsConfig, ssl_mode: SslMode) -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(format!("TLS setup failed: {e}")))?;

    let builder = if ssl_mode == SslMode::Preferred || tls_config.danger_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
    } else {
        builder.with_root_certificates(root_store(tls_config)?)
    };

    let (Some(cert_path), Some(key_path)) =
        (&tls_config.client_cert_path, &tls_config.client_key_path)
    else {
        return Ok(builder.with_no_client_auth());
    };
    let certs = read_certs(cert_path, "client certificate")?;
    let key_file = std::fs::File::open(key_path)
        .map_err(|e| tls_error(format!("cannot open client key '{}': {e}", key_path.display())))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| tls_error(format!("cannot parse client key '{}': {e}", key_path.display())))?
        .ok_or_else(|| tls_error(format!("no private key in '{}'", key_path.display())))?;
    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| tls_error(format!("client certificate rejected: {e}")))
}

#[cfg(feature = "tls")]
fn root_store(tls_config: &TlsConfig) -> Result<rustls::RootCertStore, Error> {
    let mut roots = rustls::RootCertStore::empty();
    match &tls_config.ca_cert_path {
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        Some(path) => {
            let (added, _) = roots.add_parsable_certificates(read_certs(path, "CA bundle")?);
            if added == 0 {
                return Err(tls_error(format!("no usable CA in '{}'", path.display())));
            }
        }
    }
    Ok(roots)
}

#[cfg(feature = "tls")]
fn read_certs(path: &Path, what: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| tls_error(format!("cannot open {what} '{}': {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("cannot parse {what} '{}': {e}", path.display())))?;
    if certs.is_empty() {
        return Err(tls_error(format!("no certificates in {what} '{}'", path.display())));
    }
    Ok(certs)
}

/// Skips chain and name checks; handshake signatures are still verified.
#[cfg(feature = "tls")]
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<rustls::crypto::CryptoProvider>);

#[cfg(feature = "tls")]
impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::charset;

    #[test]
    fn test_build_ssl_request_packet() {
        let payload = build_ssl_request_packet(
            capabilities::DEFAULT_CLIENT_FLAGS,
            16 * 1024 * 1024,
            charset::UTF8MB4_GENERAL_CI,
        );
        assert_eq!(payload.len(), 32);

        let caps = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert!(caps & capabilities::CLIENT_SSL != 0);
        assert_eq!(payload[8], charset::UTF8MB4_GENERAL_CI);
        assert!(payload[9..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_validate_ssl_mode() {
        assert!(!validate_ssl_mode(SslMode::Disable, capabilities::CLIENT_SSL).unwrap());
        assert!(!validate_ssl_mode(SslMode::Preferred, 0).unwrap());
        assert!(validate_ssl_mode(SslMode::Preferred, capabilities::CLIENT_SSL).unwrap());
        assert!(validate_ssl_mode(SslMode::Required, capabilities::CLIENT_SSL).unwrap());

        for mode in [SslMode::Required, SslMode::VerifyCa, SslMode::VerifyIdentity] {
            let err = validate_ssl_mode(mode, 0).unwrap_err();
            match err {
                Error::Connection(e) => assert_eq!(e.kind, ConnectionErrorKind::Ssl),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_tls_config_client_cert() {
        let config = TlsConfig::new().client_cert("/path/to/client.pem");
        assert!(validate_tls_config(SslMode::VerifyCa, &config).is_err());

        let config = TlsConfig::new()
            .ca_cert("/path/to/ca.pem")
            .client_cert("/path/to/client.pem")
            .client_key("/path/to/client-key.pem");
        assert!(validate_tls_config(SslMode::VerifyCa, &config).is_ok());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_ca_bundle_read_only_when_verifying() {
        let config = TlsConfig::new().ca_cert("/nonexistent/mywire-ca.pem");
        let err = client_config(&config, SslMode::VerifyCa).unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert!(err.to_string().contains("cannot open CA bundle"));

        assert!(client_config(&config, SslMode::Preferred).is_ok());
        assert!(client_config(&TlsConfig::new(), SslMode::VerifyIdentity).is_ok());
    }

    #[cfg(feature = "tls")]
    #[test]
    fn test_handshake_against_closed_peer_is_ssl_error() {
        let stream = std::io::Cursor::new(Vec::new());
        let err = connect(stream, &TlsConfig::new(), "db.example.com", SslMode::Preferred)
            .unwrap_err();
        match err {
            Error::Connection(e) => {
                assert_eq!(e.kind, ConnectionErrorKind::Ssl);
                assert!(e.message.starts_with("TLS handshake failed"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
