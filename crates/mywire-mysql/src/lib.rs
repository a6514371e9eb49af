//! Client-side MySQL wire protocol engine.
//!
//! One [`MySqlConnection`] owns one socket and speaks the protocol end to
//! end:
//!
//! - Packet framing with sequence numbers, split payloads and TLS upgrade
//! - Authentication (mysql_native_password, caching_sha2_password,
//!   sha256_password, mysql_clear_password) with one auth switch
//! - Text and binary (prepared statement) protocols, multi-result chains
//! - `LOAD DATA LOCAL INFILE` from registered files and readers only
//! - A connection state machine that invalidates statements on failure
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB are split
//! - Request/response pairing via sequence numbers
//!
//! # Example
//!
//! ```rust,ignore
//! use mywire_mysql::{MySqlConfig, MySqlConnection, Value};
//!
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = MySqlConnection::open(config)?;
//! let rows = conn.query("SELECT id, name FROM users WHERE id > ?", &[Value::Int(10)])?;
//! for row in &rows {
//!     let name: String = row.get_named("name")?;
//! }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod escape;
pub mod handshake;
pub mod infile;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod resultset;
pub mod tls;
pub mod transport;
pub mod types;

pub use config::{MySqlConfig, Network, SslMode, TlsConfig, TlsSource};
pub use connection::{ConnectionState, MySqlConnection, Statement};
pub use escape::EscapeMode;
pub use net::NetStream;
pub use registry::{
    register_dialer, register_local_file, register_reader, register_tls_config,
    unregister_dialer, unregister_local_file, unregister_reader, unregister_tls_config,
};
pub use resultset::{ExecResult, ResultStream, Rows};
pub use types::{ColumnDefinition, FieldType};

pub use mywire_core::{
    ColumnInfo, Date, DateTime, Error, FromValue, Result, Row, Temporal, Time, Value,
};
