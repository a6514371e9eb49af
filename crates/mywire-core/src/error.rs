//! Error types for MySQL protocol operations.
//!
//! Errors are classified by what they mean for the connection that produced
//! them:
//!
//! - [`Error::BadConnection`]: the transport failed or a handle outlived its
//!   connection. The connection is unusable and the operation may be retried
//!   on a freshly established one.
//! - [`Error::Protocol`]: the peer violated the wire protocol. The connection
//!   is unusable; retrying is not known to be safe.
//! - [`Error::Server`]: the server rejected a command. The connection stays
//!   usable.
//! - Everything else is detected locally and never touches the connection.

use std::fmt;
use std::io;

/// The primary error type for all protocol operations.
#[derive(Debug)]
pub enum Error {
    /// Transport failure, or use of a handle whose connection is gone
    BadConnection(ConnectionError),
    /// Establishing, authenticating or configuring a connection failed
    Connection(ConnectionError),
    /// Wire-level protocol violation
    Protocol(ProtocolError),
    /// Error reported by the server for a command
    Server(ServerError),
    /// A local infile request could not be served
    LocalInfile(LocalInfileError),
    /// Value conversion errors
    Type(TypeError),
    /// Invalid configuration, detected before any network activity
    Config(ConfigError),
    /// An operation not allowed in the current state
    Usage(UsageError),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish the socket
    Connect,
    /// Connection refused by the peer
    Refused,
    /// A deadline expired
    Timeout,
    /// Connection lost during operation
    Disconnected,
    /// TLS negotiation failed or was required but unavailable
    Ssl,
    /// Authentication failed
    Authentication,
    /// No charset candidate was accepted by the server
    Charset,
    /// The connection was already closed or broken
    Closed,
    /// A statement handle from an earlier connection generation was used
    StaleHandle,
    /// The server reported a read-only transaction
    ReadOnly,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// An ERR packet sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u16,
    pub sqlstate: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub struct LocalInfileError {
    pub kind: LocalInfileErrorKind,
    pub name: String,
    pub source: Option<io::Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalInfileErrorKind {
    /// The requested path is not in the local file registry
    FileNotRegistered,
    /// The requested content source is not in the reader registry
    ReaderNotRegistered,
    /// The file or content source failed while being read
    Read,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

#[derive(Debug)]
pub struct UsageError {
    pub message: String,
}

impl Error {
    /// Transport-class failure: a new connection may safely retry the operation.
    pub fn is_bad_connection(&self) -> bool {
        matches!(self, Error::BadConnection(_))
    }

    /// Does this error leave the connection permanently unusable?
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::BadConnection(_) | Error::Protocol(_))
    }

    /// Is this an authentication failure?
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Authentication,
                ..
            })
        )
    }

    /// The server error behind this error, if any.
    ///
    /// Authentication failures carry the server's ERR packet as their source.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Error::Server(e) => Some(e),
            Error::Connection(c) | Error::BadConnection(c) => c
                .source
                .as_deref()
                .and_then(|s| s.downcast_ref::<ServerError>()),
            _ => None,
        }
    }

    /// MySQL error number, if the server reported one.
    pub fn server_code(&self) -> Option<u16> {
        self.server_error().map(|e| e.code)
    }

    /// SQLSTATE, if the server reported one (e.g. "42S02").
    pub fn sqlstate(&self) -> Option<&str> {
        self.server_error().and_then(|e| e.sqlstate.as_deref())
    }

    pub fn bad_connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::BadConnection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            raw_data: None,
            source: None,
        })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
        })
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(UsageError {
            message: message.into(),
        })
    }
}

impl ServerError {
    /// ER_DUP_ENTRY
    pub fn is_duplicate_key(&self) -> bool {
        self.code == 1062
    }

    /// ER_ROW_IS_REFERENCED_2 / ER_NO_REFERENCED_ROW_2
    pub fn is_foreign_key_violation(&self) -> bool {
        self.code == 1451 || self.code == 1452
    }

    /// ER_CANT_EXECUTE_IN_READ_ONLY_TRANSACTION
    pub fn is_read_only(&self) -> bool {
        self.code == 1792
    }
}

impl LocalInfileError {
    pub fn file_not_registered(name: impl Into<String>) -> Self {
        Self {
            kind: LocalInfileErrorKind::FileNotRegistered,
            name: name.into(),
            source: None,
        }
    }

    pub fn reader_not_registered(name: impl Into<String>) -> Self {
        Self {
            kind: LocalInfileErrorKind::ReaderNotRegistered,
            name: name.into(),
            source: None,
        }
    }

    pub fn read_failed(name: impl Into<String>, source: io::Error) -> Self {
        Self {
            kind: LocalInfileErrorKind::Read,
            name: name.into(),
            source: Some(source),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadConnection(e) => write!(f, "Bad connection: {}", e.message),
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Server(e) => write!(f, "{}", e),
            Error::LocalInfile(e) => write!(f, "{}", e),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Usage(e) => write!(f, "{}", e.message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BadConnection(e) | Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Server(e) => Some(e),
            Error::LocalInfile(e) => e
                .source
                .as_ref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ConnectionError {}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "Error {} ({}): {}", self.code, state, self.message),
            None => write!(f, "Error {}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ServerError {}

impl fmt::Display for LocalInfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LocalInfileErrorKind::FileNotRegistered => {
                write!(f, "local file '{}' is not registered", self.name)
            }
            LocalInfileErrorKind::ReaderNotRegistered => {
                write!(f, "Reader '{}' is not registered", self.name)
            }
            LocalInfileErrorKind::Read => match &self.source {
                Some(source) => write!(f, "reading '{}' failed: {}", self.name, source),
                None => write!(f, "reading '{}' failed", self.name),
            },
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Socket-level failures always break the connection.
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectionErrorKind::Timeout,
            _ => ConnectionErrorKind::Disconnected,
        };
        Error::BadConnection(ConnectionError {
            kind,
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<LocalInfileError> for Error {
    fn from(err: LocalInfileError) -> Self {
        Error::LocalInfile(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
