//! Byte streams to the server.
//!
//! [`NetStream`] is the transport seam: TCP and unix sockets implement it,
//! and any registered dialer may return its own implementation (an SSH
//! tunnel, an in-memory test server, ...).

use crate::config::{MySqlConfig, Network};
use crate::registry;
use mywire_core::Error;
use mywire_core::error::{ConnectionError, ConnectionErrorKind};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// A blocking, bidirectional byte stream with per-operation deadlines.
pub trait NetStream: Read + Write + Send + std::fmt::Debug {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Whether the stream never leaves the host, so secrets may cross it in clear.
    fn is_local(&self) -> bool {
        false
    }
}

impl NetStream for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }
}

#[cfg(unix)]
impl NetStream for std::os::unix::net::UnixStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }

    fn is_local(&self) -> bool {
        true
    }
}

/// Open the stream described by `config.network`.
pub fn dial(config: &MySqlConfig) -> Result<Box<dyn NetStream>, Error> {
    let addr = config.socket_addr();
    let stream: Box<dyn NetStream> = match &config.network {
        Network::Tcp => Box::new(dial_tcp(&addr, config.connect_timeout)?),
        #[cfg(unix)]
        Network::Unix(path) => {
            let stream = std::os::unix::net::UnixStream::connect(path)
                .map_err(|e| connect_error(&path.display().to_string(), e))?;
            Box::new(stream)
        }
        #[cfg(not(unix))]
        Network::Unix(path) => {
            return Err(Error::config(format!(
                "unix sockets are not available on this platform ({})",
                path.display()
            )));
        }
        Network::Custom(name) => {
            let dialer = registry::lookup_dialer(name)
                .ok_or_else(|| Error::config(format!("dialer '{name}' is not registered")))?;
            dialer(&addr, config.connect_timeout).map_err(|e| connect_error(&addr, e))?
        }
    };
    tracing::debug!(network = ?config.network, addr = %addr, "stream opened");
    Ok(stream)
}

fn dial_tcp(addr: &str, timeout: Duration) -> Result<TcpStream, Error> {
    let mut last_err = None;
    let addrs = addr.to_socket_addrs().map_err(|e| connect_error(addr, e))?;
    for socket_addr in addrs {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    let err = last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
    });
    Err(connect_error(addr, err))
}

fn connect_error(addr: &str, e: io::Error) -> Error {
    let kind = match e.kind() {
        io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectionErrorKind::Timeout,
        _ => ConnectionErrorKind::Connect,
    };
    Error::Connection(ConnectionError {
        kind,
        message: format!("Failed to connect to {}: {}", addr, e),
        source: Some(Box::new(e)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unregistered_dialer_is_config_error() {
        let config = MySqlConfig::new().dialer("net-tests-missing");
        let err = dial(&config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_refused_tcp_connection() {
        // Bind then drop to find a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = MySqlConfig::new()
            .host("127.0.0.1")
            .port(port)
            .connect_timeout(Duration::from_secs(2));
        let err = dial(&config).unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn test_custom_dialer_failure_maps_kind() {
        registry::register_dialer("net-tests-refuse", |_addr, _timeout| {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "nope"))
        });
        let err = dial(&MySqlConfig::new().dialer("net-tests-refuse")).unwrap_err();
        match err {
            Error::Connection(e) => assert_eq!(e.kind, ConnectionErrorKind::Refused),
            other => panic!("unexpected {other:?}"),
        }
        registry::unregister_dialer("net-tests-refuse");
    }
}
