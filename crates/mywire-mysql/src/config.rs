//! MySQL connection configuration.
//!
//! Provides connection parameters for establishing MySQL connections
//! including authentication policy, TLS, charset negotiation and protocol
//! switches. Parsing of connection strings is left to callers; this is the
//! already-structured form.

use crate::protocol::charset;
use crate::transport::DEFAULT_MAX_RESPONSE_PACKET;
use chrono::{FixedOffset, Offset, Utc};
use mywire_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default `max_allowed_packet` assumed until configured otherwise.
pub const DEFAULT_MAX_ALLOWED_PACKET: usize = 64 * 1024 * 1024;

/// Parameters at least this large are streamed with COM_STMT_SEND_LONG_DATA.
pub const DEFAULT_LONG_DATA_THRESHOLD: usize = 1024 * 1024;

/// SSL mode for MySQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SslMode {
    /// Do not use SSL
    #[default]
    Disable,
    /// Use SSL if the server offers it, without certificate verification
    Preferred,
    /// Require SSL connection
    Required,
    /// Require SSL and verify server certificate
    VerifyCa,
    /// Require SSL and verify server certificate matches hostname
    VerifyIdentity,
}

impl SslMode {
    /// Check if SSL should be attempted.
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Check if SSL is required.
    pub const fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity
        )
    }
}

/// Certificates and verification options for TLS connections.
///
/// Can be set directly on a [`MySqlConfig`] or registered process-wide by
/// name with [`crate::registry::register_tls_config`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// CA certificate bundle (PEM); webpki roots are used when unset
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate for mutual TLS (PEM)
    pub client_cert_path: Option<PathBuf>,
    /// Client private key for mutual TLS (PEM)
    pub client_key_path: Option<PathBuf>,
    /// Accept any server certificate
    pub danger_skip_verify: bool,
    /// Server name for SNI and verification; defaults to the host
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    /// Skip server certificate verification. Only for testing.
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.danger_skip_verify = skip;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Where TLS settings come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsSource {
    /// Settings carried in the configuration
    Inline(TlsConfig),
    /// Settings registered process-wide under this name
    Named(String),
}

impl Default for TlsSource {
    fn default() -> Self {
        TlsSource::Inline(TlsConfig::default())
    }
}

/// How the byte stream to the server is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Network {
    /// TCP to `host:port`
    #[default]
    Tcp,
    /// Unix domain socket at the given path
    Unix(PathBuf),
    /// A dialer registered under this name, given `host:port`
    Custom(String),
}

/// MySQL connection configuration.
#[derive(Clone)]
pub struct MySqlConfig {
    /// Transport used to reach the server
    pub network: Network,
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication
    pub password: Option<String>,
    /// Database name to connect to (optional at connect time)
    pub database: Option<String>,
    /// Collation sent in the handshake
    pub collation: String,
    /// Character sets tried with `SET NAMES` after authentication, in order
    pub charsets: Vec<String>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read deadline per packet; `None` waits forever
    pub read_timeout: Option<Duration>,
    /// Write deadline per packet; `None` waits forever
    pub write_timeout: Option<Duration>,
    /// SSL mode
    pub ssl_mode: SslMode,
    /// TLS certificates and verification
    pub tls: TlsSource,
    /// Additional connection attributes
    pub attributes: Vec<(String, String)>,
    /// Request CLIENT_LOCAL_FILES; files are still gated by the registries
    pub allow_local_infile: bool,
    /// Largest payload the client will send
    pub max_allowed_packet: usize,
    /// Largest reassembled payload accepted from the server
    pub max_response_packet: usize,
    /// Parameters at least this large use COM_STMT_SEND_LONG_DATA
    pub long_data_threshold: usize,
    /// Allow several statements in one COM_QUERY
    pub multi_statements: bool,
    /// Report matched rather than changed rows for UPDATE
    pub client_found_rows: bool,
    /// Treat "read-only transaction" errors as a dead connection
    pub reject_read_only: bool,
    /// Interpolate parameters client-side instead of preparing
    pub interpolate_params: bool,
    /// Decode temporal columns to [`mywire_core::Temporal`] instead of text
    pub parse_time: bool,
    /// Offset at which zoneless DATETIME and TIMESTAMP values are read
    pub time_zone: FixedOffset,
    /// Name result columns `table.column` instead of `column`
    pub columns_with_alias: bool,
    /// Allow the mysql_native_password plugin
    pub allow_native_passwords: bool,
    /// Allow sending the password in clear text (mysql_clear_password)
    pub allow_cleartext_passwords: bool,
    /// Allow fetching the server's RSA public key over an insecure channel
    pub allow_public_key_retrieval: bool,
    /// PEM-encoded RSA public key for caching_sha2/sha256 password auth
    pub server_public_key: Option<String>,
}

impl std::fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("network", &self.network)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("collation", &self.collation)
            .field("charsets", &self.charsets)
            .field("ssl_mode", &self.ssl_mode)
            .field("multi_statements", &self.multi_statements)
            .field("interpolate_params", &self.interpolate_params)
            .field("time_zone", &self.time_zone)
            .finish_non_exhaustive()
    }
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            database: None,
            collation: charset::DEFAULT_COLLATION.to_string(),
            charsets: Vec::new(),
            connect_timeout: Duration::from_secs(30),
            read_timeout: None,
            write_timeout: None,
            ssl_mode: SslMode::default(),
            tls: TlsSource::default(),
            attributes: Vec::new(),
            allow_local_infile: true,
            max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
            max_response_packet: DEFAULT_MAX_RESPONSE_PACKET,
            long_data_threshold: DEFAULT_LONG_DATA_THRESHOLD,
            multi_statements: false,
            client_found_rows: false,
            reject_read_only: false,
            interpolate_params: false,
            parse_time: true,
            time_zone: Utc.fix(),
            columns_with_alias: false,
            allow_native_passwords: true,
            allow_cleartext_passwords: false,
            allow_public_key_retrieval: false,
            server_public_key: None,
        }
    }
}

impl MySqlConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Connect over a unix domain socket instead of TCP.
    pub fn unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.network = Network::Unix(path.into());
        self
    }

    /// Connect through a dialer registered under `name`.
    pub fn dialer(mut self, name: impl Into<String>) -> Self {
        self.network = Network::Custom(name.into());
        self
    }

    /// Set the username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the handshake collation by name (e.g. `utf8mb4_unicode_ci`).
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = collation.into();
        self
    }

    /// Add a character set candidate for `SET NAMES`.
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charsets.push(charset.into());
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Set the SSL mode.
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Use these TLS settings.
    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = TlsSource::Inline(tls);
        self
    }

    /// Use TLS settings registered under `name`.
    pub fn tls_config_name(mut self, name: impl Into<String>) -> Self {
        self.tls = TlsSource::Named(name.into());
        self
    }

    /// Set a connection attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Enable or disable the LOCAL INFILE capability.
    ///
    /// Even when enabled, only registered files and readers are served.
    pub fn allow_local_infile(mut self, enabled: bool) -> Self {
        self.allow_local_infile = enabled;
        self
    }

    /// Set the max allowed packet size.
    pub fn max_allowed_packet(mut self, size: usize) -> Self {
        self.max_allowed_packet = size;
        self
    }

    /// Cap the size of a single payload read from the server.
    pub fn max_response_packet(mut self, size: usize) -> Self {
        self.max_response_packet = size;
        self
    }

    pub fn long_data_threshold(mut self, size: usize) -> Self {
        self.long_data_threshold = size;
        self
    }

    pub fn multi_statements(mut self, enabled: bool) -> Self {
        self.multi_statements = enabled;
        self
    }

    pub fn client_found_rows(mut self, enabled: bool) -> Self {
        self.client_found_rows = enabled;
        self
    }

    pub fn reject_read_only(mut self, enabled: bool) -> Self {
        self.reject_read_only = enabled;
        self
    }

    pub fn interpolate_params(mut self, enabled: bool) -> Self {
        self.interpolate_params = enabled;
        self
    }

    pub fn parse_time(mut self, enabled: bool) -> Self {
        self.parse_time = enabled;
        self
    }

    /// Offset used to place zoneless DATETIME and TIMESTAMP values in time.
    pub fn time_zone(mut self, offset: FixedOffset) -> Self {
        self.time_zone = offset;
        self
    }

    pub fn columns_with_alias(mut self, enabled: bool) -> Self {
        self.columns_with_alias = enabled;
        self
    }

    pub fn allow_native_passwords(mut self, enabled: bool) -> Self {
        self.allow_native_passwords = enabled;
        self
    }

    pub fn allow_cleartext_passwords(mut self, enabled: bool) -> Self {
        self.allow_cleartext_passwords = enabled;
        self
    }

    pub fn allow_public_key_retrieval(mut self, enabled: bool) -> Self {
        self.allow_public_key_retrieval = enabled;
        self
    }

    /// Set the server's RSA public key (PEM).
    pub fn server_public_key(mut self, pem: impl Into<String>) -> Self {
        self.server_public_key = Some(pem.into());
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Collation id sent in the handshake.
    pub fn collation_id(&self) -> Result<u8> {
        charset::collation_id(&self.collation)
            .ok_or_else(|| Error::config(format!("unknown collation '{}'", self.collation)))
    }

    /// Pre-flight checks, run before any network activity.
    pub fn validate(&self) -> Result<()> {
        let collation = self.collation_id()?;
        if self.max_allowed_packet == 0 {
            return Err(Error::config("max_allowed_packet must be positive"));
        }
        if self.max_response_packet == 0 {
            return Err(Error::config("max_response_packet must be positive"));
        }
        if self.long_data_threshold == 0 {
            return Err(Error::config("long_data_threshold must be positive"));
        }
        let identifier = |s: &str| {
            !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        };
        if let Some(cs) = self.charsets.iter().find(|c| !identifier(c)) {
            return Err(Error::config(format!("invalid charset name '{cs}'")));
        }
        if self.interpolate_params {
            let name = charset::collation_name(collation).unwrap_or(&self.collation);
            let cs = charset::charset_of(name);
            if charset::ESCAPE_UNSAFE_CHARSETS.contains(&cs) {
                return Err(Error::config(format!(
                    "interpolate_params cannot be used with charset '{cs}'"
                )));
            }
            let unsafe_charset = |c: &&String| {
                charset::ESCAPE_UNSAFE_CHARSETS
                    .iter()
                    .any(|u| u.eq_ignore_ascii_case(c))
            };
            if let Some(cs) = self.charsets.iter().find(unsafe_charset) {
                return Err(Error::config(format!(
                    "interpolate_params cannot be used with charset '{cs}'"
                )));
            }
        }
        if let TlsSource::Inline(tls) = &self.tls {
            if self.ssl_mode.should_try_ssl() {
                crate::tls::validate_tls_config(self.ssl_mode, tls)?;
            }
        }
        if let Some(pem) = &self.server_public_key {
            crate::auth::parse_public_key(pem)?;
        }
        Ok(())
    }

    /// Build capability flags based on configuration.
    pub fn capability_flags(&self) -> u32 {
        use crate::protocol::capabilities::{
            CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_FOUND_ROWS, CLIENT_LOCAL_FILES,
            CLIENT_MULTI_STATEMENTS, CLIENT_SSL, DEFAULT_CLIENT_FLAGS,
        };

        let mut flags = DEFAULT_CLIENT_FLAGS;

        if self.database.is_some() {
            flags |= CLIENT_CONNECT_WITH_DB;
        }

        if self.ssl_mode.should_try_ssl() {
            flags |= CLIENT_SSL;
        }

        if self.allow_local_infile {
            flags |= CLIENT_LOCAL_FILES;
        }

        if self.multi_statements {
            flags |= CLIENT_MULTI_STATEMENTS;
        }

        if self.client_found_rows {
            flags |= CLIENT_FOUND_ROWS;
        }

        if !self.attributes.is_empty() {
            flags |= CLIENT_CONNECT_ATTRS;
        }

        flags
    }

    /// Password and plugin policy for the handshake.
    pub fn auth_policy(&self) -> Result<crate::auth::AuthPolicy> {
        let server_public_key = self
            .server_public_key
            .as_deref()
            .map(crate::auth::parse_public_key)
            .transpose()?;
        Ok(crate::auth::AuthPolicy {
            password: self.password.clone().unwrap_or_default(),
            allow_native_passwords: self.allow_native_passwords,
            allow_cleartext_passwords: self.allow_cleartext_passwords,
            allow_public_key_retrieval: self.allow_public_key_retrieval,
            server_public_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = MySqlConfig::new()
            .host("db.example.com")
            .port(3307)
            .user("myuser")
            .password("secret")
            .database("testdb")
            .connect_timeout(Duration::from_secs(10))
            .ssl_mode(SslMode::Required)
            .charset("utf8mb4")
            .charset("utf8")
            .attribute("program_name", "myapp");

        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 3307);
        assert_eq!(config.user, "myuser");
        assert_eq!(config.password, Some("secret".to_string()));
        assert_eq!(config.database, Some("testdb".to_string()));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.ssl_mode, SslMode::Required);
        assert_eq!(config.charsets, vec!["utf8mb4", "utf8"]);
        assert_eq!(
            config.attributes,
            vec![("program_name".to_string(), "myapp".to_string())]
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let config = MySqlConfig::new().user("u").password("hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_network_selection() {
        assert_eq!(MySqlConfig::new().network, Network::Tcp);
        assert_eq!(
            MySqlConfig::new().unix_socket("/tmp/mysql.sock").network,
            Network::Unix(PathBuf::from("/tmp/mysql.sock"))
        );
        assert_eq!(
            MySqlConfig::new().dialer("mock").network,
            Network::Custom("mock".to_string())
        );
        assert_eq!(
            MySqlConfig::new().host("db").port(3307).socket_addr(),
            "db:3307"
        );
    }

    #[test]
    fn test_ssl_mode_properties() {
        assert!(!SslMode::Disable.should_try_ssl());
        assert!(!SslMode::Disable.is_required());

        assert!(SslMode::Preferred.should_try_ssl());
        assert!(!SslMode::Preferred.is_required());

        assert!(SslMode::Required.should_try_ssl());
        assert!(SslMode::Required.is_required());

        assert!(SslMode::VerifyIdentity.should_try_ssl());
        assert!(SslMode::VerifyIdentity.is_required());
    }

    #[test]
    fn test_ssl_mode_serde() {
        let json = serde_json::to_string(&SslMode::VerifyCa).unwrap();
        assert_eq!(json, "\"verify_ca\"");
        let mode: SslMode = serde_json::from_str("\"preferred\"").unwrap();
        assert_eq!(mode, SslMode::Preferred);
    }

    #[test]
    fn test_capability_flags() {
        use crate::protocol::capabilities::*;

        let flags = MySqlConfig::new().capability_flags();
        assert_eq!(flags & DEFAULT_CLIENT_FLAGS, DEFAULT_CLIENT_FLAGS);
        assert!(flags & CLIENT_LOCAL_FILES != 0);
        assert!(flags & CLIENT_MULTI_STATEMENTS == 0);
        assert!(flags & CLIENT_SSL == 0);

        let flags = MySqlConfig::new()
            .database("test")
            .multi_statements(true)
            .client_found_rows(true)
            .allow_local_infile(false)
            .attribute("k", "v")
            .capability_flags();
        assert!(flags & CLIENT_CONNECT_WITH_DB != 0);
        assert!(flags & CLIENT_MULTI_STATEMENTS != 0);
        assert!(flags & CLIENT_FOUND_ROWS != 0);
        assert!(flags & CLIENT_CONNECT_ATTRS != 0);
        assert!(flags & CLIENT_LOCAL_FILES == 0);
    }

    #[test]
    fn test_validate_collation() {
        assert!(MySqlConfig::new().validate().is_ok());
        let err = MySqlConfig::new().collation("klingon_ci").validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_charset_names() {
        assert!(MySqlConfig::new().charset("utf8mb4").charset("latin1").validate().is_ok());
        assert!(MySqlConfig::new().charset("utf8; DROP TABLE t").validate().is_err());
        assert!(MySqlConfig::new().charset("").validate().is_err());
    }

    #[test]
    fn test_auth_policy_from_config() {
        let policy = MySqlConfig::new()
            .password("pw")
            .allow_cleartext_passwords(true)
            .auth_policy()
            .unwrap();
        assert_eq!(policy.password, "pw");
        assert!(policy.allow_cleartext_passwords);
        assert!(policy.server_public_key.is_none());
        assert!(MySqlConfig::new().auth_policy().unwrap().password.is_empty());
    }

    #[test]
    fn test_validate_rejects_unsafe_interpolation() {
        for collation in ["big5_chinese_ci", "sjis_japanese_ci", "gbk_chinese_ci", "cp932_japanese_ci"] {
            let err = MySqlConfig::new()
                .collation(collation)
                .interpolate_params(true)
                .validate()
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{collation}");
        }
        // Same collation is fine without interpolation
        assert!(MySqlConfig::new().collation("big5_chinese_ci").validate().is_ok());

        let err = MySqlConfig::new()
            .charset("gbk")
            .interpolate_params(true)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(MySqlConfig::new().interpolate_params(true).validate().is_ok());
    }

    #[test]
    fn test_validate_tls_settings() {
        let config = MySqlConfig::new()
            .ssl_mode(SslMode::VerifyCa)
            .tls_config(TlsConfig::new().client_cert("/tmp/c.pem"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_public_key() {
        let config = MySqlConfig::new().server_public_key("not a key");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = MySqlConfig::default();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 3306);
        assert_eq!(config.ssl_mode, SslMode::Disable);
        assert_eq!(config.collation, "utf8mb4_general_ci");
        assert!(config.parse_time);
        assert!(config.allow_native_passwords);
        assert!(!config.allow_cleartext_passwords);
        assert!(!config.interpolate_params);
        assert!(!config.columns_with_alias);
        assert_eq!(config.time_zone.local_minus_utc(), 0);
        assert_eq!(config.max_response_packet, DEFAULT_MAX_RESPONSE_PACKET);
    }

    #[test]
    fn test_validate_response_limit() {
        let err = MySqlConfig::new().max_response_packet(0).validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(MySqlConfig::new().max_response_packet(4096).validate().is_ok());
    }
}
