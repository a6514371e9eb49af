//! MySQL connection: command execution and the connection state machine.
//!
//! ```text
//! New → Handshaking → Idle ⇄ Busy
//!                       ↓      ↓
//!                     Broken → Closed
//! ```
//!
//! A connection runs one command at a time. It is `Busy` from the moment a
//! command is written until its whole response has been read; a streamed
//! response holds the connection's `&mut` borrow, so no other command can
//! be issued while rows are pending. Any transport or framing failure marks
//! the connection `Broken` for good and moves it to a new generation, which
//! invalidates every [`Statement`] prepared on it.

#![allow(clippy::cast_possible_truncation)]

use crate::auth::AuthPolicy;
use crate::config::MySqlConfig;
use crate::escape::{self, EscapeMode};
use crate::handshake;
use crate::infile;
use crate::net;
use crate::protocol::{
    Command, MAX_COLUMNS, MAX_PACKET_SIZE, OkPacket, PacketReader, PacketType,
    build_send_long_data_packet, build_stmt_close_packet, build_stmt_execute_packet,
    build_stmt_prepare_packet, build_stmt_reset_packet, capabilities, charset,
    parse_stmt_prepare_ok, server_status,
};
use crate::resultset::{
    ExecResult, ResultHeader, ResultStream, RowFormat, RowPacket, Rows, read_column_definitions,
};
use crate::transport::PacketTransport;
use crate::types::{ColumnDefinition, DecodeOptions};
use chrono::{FixedOffset, TimeZone};
use mywire_core::error::{ConnectionError, ConnectionErrorKind};
use mywire_core::temporal::DateTime;
use mywire_core::{Error, Result, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide, so a handle from one connection never validates on another.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Connection state in the MySQL protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Stream open, nothing exchanged yet
    New,
    /// Greeting, TLS upgrade and authentication in progress
    Handshaking,
    /// Ready for a command
    Idle,
    /// A command's response is still on the wire
    Busy,
    /// A transport or protocol failure left the stream unusable
    Broken,
    /// Closed by the caller or by the engine
    Closed,
}

/// A server-side prepared statement.
///
/// Valid only on the connection generation that prepared it.
#[derive(Debug, Clone)]
pub struct Statement {
    id: u32,
    params: Vec<ColumnDefinition>,
    columns: Vec<ColumnDefinition>,
    generation: u64,
}

impl Statement {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Parameter type hints reported by the server.
    pub fn params(&self) -> &[ColumnDefinition] {
        &self.params
    }

    /// Result columns reported at prepare time.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A connection to a MySQL server.
pub struct MySqlConnection {
    transport: Option<PacketTransport>,
    state: ConnectionState,
    generation: u64,
    config: MySqlConfig,
    capabilities: u32,
    status_flags: u16,
    server_version: String,
    connection_id: u32,
    charset: Option<String>,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("connection_id", &self.connection_id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

fn closed_error() -> Error {
    Error::bad_connection(ConnectionErrorKind::Closed, "connection is closed")
}

fn com_query(sql: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(1 + sql.len());
    payload.push(Command::Query as u8);
    payload.extend_from_slice(sql);
    payload
}

impl MySqlConnection {
    /// Establish a new connection.
    ///
    /// 1. Validate the configuration (nothing touches the network on failure)
    /// 2. Dial
    /// 3. Handshake: greeting, optional TLS upgrade, authentication
    /// 4. Try each configured charset with `SET NAMES`
    #[allow(clippy::result_large_err)]
    pub fn open(config: MySqlConfig) -> Result<Self> {
        config.validate()?;
        let policy = config.auth_policy()?;

        let stream = net::dial(&config)?;
        let mut transport = PacketTransport::new(stream, config.max_allowed_packet)
            .with_max_response_packet(config.max_response_packet);
        transport.set_timeouts(Some(config.connect_timeout), Some(config.connect_timeout))?;

        let mut conn = Self {
            transport: Some(transport),
            state: ConnectionState::New,
            generation: next_generation(),
            config,
            capabilities: 0,
            status_flags: 0,
            server_version: String::new(),
            connection_id: 0,
            charset: None,
        };

        conn.handshake(&policy)?;
        conn.negotiate_charset()?;
        tracing::debug!(
            connection_id = conn.connection_id,
            server_version = %conn.server_version,
            generation = conn.generation,
            "connection established"
        );
        Ok(conn)
    }

    fn handshake(&mut self, policy: &AuthPolicy) -> Result<()> {
        self.state = ConnectionState::Handshaking;
        let transport = self.transport.take().ok_or_else(closed_error)?;
        let session = handshake::establish(transport, &self.config, policy).inspect_err(|_| {
            self.state = ConnectionState::Closed;
        })?;

        self.capabilities = session.capabilities;
        self.status_flags = session.status_flags;
        self.server_version = session.server.server_version;
        self.connection_id = session.server.connection_id;

        let mut transport = session.transport;
        let timeouts = transport.set_timeouts(self.config.read_timeout, self.config.write_timeout);
        self.transport = Some(transport);
        self.state = ConnectionState::Idle;
        self.track(timeouts)
    }

    /// Try each charset candidate in order until the server accepts one.
    fn negotiate_charset(&mut self) -> Result<()> {
        if self.config.charsets.is_empty() {
            return Ok(());
        }
        let candidates = self.config.charsets.clone();
        let collation_charset = charset::charset_of(&self.config.collation).to_string();

        for candidate in &candidates {
            let sql = if candidate.eq_ignore_ascii_case(&collation_charset) {
                format!("SET NAMES {} COLLATE {}", candidate, self.config.collation)
            } else {
                format!("SET NAMES {}", candidate)
            };
            match self.execute(&sql, &[]) {
                Ok(_) => {
                    tracing::debug!(charset = %candidate, "charset negotiated");
                    self.charset = Some(candidate.clone());
                    return Ok(());
                }
                Err(e @ Error::Server(_)) => {
                    tracing::warn!(charset = %candidate, error = %e, "charset rejected by server");
                }
                Err(e) => return Err(e),
            }
        }

        self.shutdown();
        Err(Error::connection(
            ConnectionErrorKind::Charset,
            format!("server accepted none of the charsets {:?}", candidates),
        ))
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Can a command be issued right now?
    pub fn is_usable(&self) -> bool {
        self.state == ConnectionState::Idle
    }

    /// Changes whenever the connection breaks; statements carry the value
    /// current when they were prepared.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Negotiated capability flags.
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    /// Status flags from the most recent OK or EOF packet.
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    /// The charset accepted during negotiation, if candidates were configured.
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
    }

    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(PacketTransport::is_tls)
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Offset at which zoneless DATETIME and TIMESTAMP values are read.
    pub fn time_zone(&self) -> FixedOffset {
        self.config.time_zone
    }

    /// Place a DATETIME read from this connection at the configured offset.
    pub fn zoned(&self, value: &DateTime) -> Result<chrono::DateTime<FixedOffset>> {
        value.to_offset(self.config.time_zone)
    }

    /// Parameter for an instant: its wall-clock reading at the configured
    /// offset.
    pub fn instant_param<Tz: TimeZone>(&self, instant: &chrono::DateTime<Tz>) -> Result<Value> {
        DateTime::at_offset(instant, self.config.time_zone).map(Value::from)
    }

    /// Literal escaping mode the server currently expects.
    pub fn escape_mode(&self) -> EscapeMode {
        EscapeMode::from_status(self.status_flags)
    }

    /// Escape `s` for use inside a quoted string literal.
    pub fn escape_string(&self, s: &str) -> String {
        escape::escape_str(s, self.escape_mode())
    }

    // ==================== State machine ====================

    fn transport(&mut self) -> Result<&mut PacketTransport> {
        self.transport.as_mut().ok_or_else(closed_error)
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state {
            ConnectionState::Idle => Ok(()),
            ConnectionState::Busy => Err(Error::usage(
                "a previous command's response has not been fully read",
            )),
            ConnectionState::Broken => Err(Error::bad_connection(
                ConnectionErrorKind::Disconnected,
                "connection is broken",
            )),
            ConnectionState::New | ConnectionState::Handshaking | ConnectionState::Closed => {
                Err(closed_error())
            }
        }
    }

    /// Classify a failure and apply its effect on the connection.
    ///
    /// Fatal errors break the connection; with `reject_read_only` a
    /// read-only server error closes it and becomes a bad-connection error.
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            self.mark_broken(&err);
            return err;
        }
        if self.config.reject_read_only {
            if let Some(server) = err.server_error().filter(|e| e.is_read_only()) {
                let server = server.clone();
                tracing::debug!(code = server.code, "server is read-only, closing connection");
                self.shutdown();
                return Error::BadConnection(ConnectionError {
                    kind: ConnectionErrorKind::ReadOnly,
                    message: format!("connection is read-only: {}", server.message),
                    source: Some(Box::new(server)),
                });
            }
        }
        err
    }

    fn track<T>(&mut self, res: Result<T>) -> Result<T> {
        res.map_err(|e| self.fail(e))
    }

    fn mark_broken(&mut self, err: &Error) {
        if matches!(
            self.state,
            ConnectionState::Broken | ConnectionState::Closed
        ) {
            return;
        }
        tracing::debug!(error = %err, generation = self.generation, "connection broken");
        self.state = ConnectionState::Broken;
        self.generation = next_generation();
        self.transport = None;
    }

    /// Best-effort COM_QUIT, then drop the stream.
    fn shutdown(&mut self) {
        if self.state == ConnectionState::Idle {
            if let Some(transport) = self.transport.as_mut() {
                transport.reset_sequence();
                let _ = transport.write_payload(&[Command::Quit as u8]);
            }
        }
        self.transport = None;
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            self.generation = next_generation();
        }
    }

    /// Send one command packet (sequence restarts at zero) and enter `Busy`.
    fn send_command(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_idle()?;
        let res = self.write_fresh(payload);
        self.track(res)?;
        self.state = ConnectionState::Busy;
        Ok(())
    }

    /// Send a packet that opens a command with no response.
    fn send_no_reply(&mut self, payload: &[u8]) -> Result<()> {
        self.ensure_idle()?;
        let res = self.write_fresh(payload);
        self.track(res)
    }

    fn write_fresh(&mut self, payload: &[u8]) -> Result<()> {
        let transport = self.transport()?;
        transport.reset_sequence();
        transport.write_payload(payload)
    }

    pub(crate) fn finish_command(&mut self) {
        if self.state == ConnectionState::Busy {
            self.state = ConnectionState::Idle;
        }
    }

    pub(crate) fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            parse_time: self.config.parse_time,
        }
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    // ==================== Response reading ====================

    pub(crate) fn read_result_header(&mut self) -> Result<ResultHeader> {
        let res = self.read_result_header_inner();
        self.track(res)
    }

    fn read_result_header_inner(&mut self) -> Result<ResultHeader> {
        let packet = self.transport()?.read_packet()?;
        let Some(&first) = packet.first() else {
            return Err(Error::protocol("empty response packet"));
        };

        match PacketType::from_first_byte(first, packet.len()) {
            PacketType::Ok => {
                let ok = PacketReader::new(&packet)
                    .parse_ok_packet()
                    .ok_or_else(|| Error::protocol("invalid OK packet"))?;
                self.status_flags = ok.status_flags;
                Ok(ResultHeader::Ok(ok))
            }
            PacketType::Error => Err(server_error(&packet)),
            PacketType::LocalInfile => {
                if self.capabilities & capabilities::CLIENT_LOCAL_FILES == 0 {
                    return Err(Error::protocol(
                        "LOCAL INFILE request without negotiated CLIENT_LOCAL_FILES",
                    ));
                }
                let ok = infile::handle_request(self.transport()?, &packet)?;
                self.status_flags = ok.status_flags;
                Ok(ResultHeader::Ok(ok))
            }
            PacketType::Eof => Err(Error::protocol("unexpected EOF packet in place of a result")),
            PacketType::Data => {
                let count = PacketReader::new(&packet)
                    .read_lenenc_int()
                    .and_then(|n| usize::try_from(n).ok())
                    .filter(|n| (1..=MAX_COLUMNS).contains(n))
                    .ok_or_else(|| Error::protocol("invalid column count"))?;
                let deprecate_eof = self.deprecate_eof();
                let columns = read_column_definitions(self.transport()?, count, deprecate_eof)?;
                Ok(ResultHeader::Columns(columns))
            }
        }
    }

    pub(crate) fn read_row_packet(&mut self) -> Result<RowPacket> {
        let res = self.read_row_packet_inner();
        self.track(res)
    }

    fn read_row_packet_inner(&mut self) -> Result<RowPacket> {
        let deprecate_eof = self.deprecate_eof();
        let packet = self.transport()?.read_packet()?;
        match PacketType::in_row_stream(&packet, deprecate_eof) {
            PacketType::Error => Err(server_error(&packet)),
            PacketType::Eof => {
                let mut reader = PacketReader::new(&packet);
                let result = if deprecate_eof {
                    reader
                        .parse_ok_packet()
                        .map(|ok| ExecResult::from(&ok))
                } else {
                    reader.parse_eof_packet().map(|eof| ExecResult {
                        warnings: eof.warnings,
                        status_flags: eof.status_flags,
                        ..ExecResult::default()
                    })
                }
                .ok_or_else(|| Error::protocol("invalid row stream terminator"))?;
                self.status_flags = result.status_flags;
                Ok(RowPacket::End(result))
            }
            _ => Ok(RowPacket::Row(packet)),
        }
    }

    /// Read a single OK/ERR reply.
    fn read_ok(&mut self) -> Result<OkPacket> {
        let packet = self.transport()?.read_packet()?;
        match packet.first() {
            Some(0x00) => {
                let ok = PacketReader::new(&packet)
                    .parse_ok_packet()
                    .ok_or_else(|| Error::protocol("invalid OK packet"))?;
                self.status_flags = ok.status_flags;
                Ok(ok)
            }
            Some(0xFF) => Err(server_error(&packet)),
            _ => Err(Error::protocol("expected OK or ERR packet")),
        }
    }

    /// Send a command answered by a single OK/ERR.
    fn simple_command(&mut self, payload: &[u8]) -> Result<OkPacket> {
        self.send_command(payload)?;
        let res = self.read_ok();
        self.finish_command();
        self.track(res)
    }

    // ==================== Text protocol ====================

    /// Run `sql` and stream its response.
    #[allow(clippy::result_large_err)]
    pub fn query_iter(&mut self, sql: &str) -> Result<ResultStream<'_>> {
        tracing::trace!(len = sql.len(), "COM_QUERY");
        self.send_command(&com_query(sql.as_bytes()))?;
        ResultStream::start(self, RowFormat::Text)
    }

    /// Run `sql` with `params` and hand the streamed response to `consume`.
    ///
    /// Without parameters the text is sent as is. With parameters, either
    /// they are interpolated client-side (`interpolate_params`) or the
    /// statement is prepared, executed and closed.
    fn run<T>(
        &mut self,
        sql: &str,
        params: &[Value],
        consume: impl FnOnce(ResultStream<'_>) -> Result<T>,
    ) -> Result<T> {
        if params.is_empty() {
            let stream = self.query_iter(sql)?;
            return consume(stream);
        }

        if self.config.interpolate_params {
            let query = escape::interpolate(sql, params, self.escape_mode())?;
            self.send_command(&com_query(&query))?;
            let stream = ResultStream::start(self, RowFormat::Text)?;
            return consume(stream);
        }

        let stmt = self.prepare(sql)?;
        let out = match self.execute_iter(&stmt, params) {
            Ok(stream) => consume(stream),
            Err(e) => Err(e),
        };
        let closed = self.close_statement(stmt);
        let out = out?;
        closed?;
        Ok(out)
    }

    /// Run `sql` and return the first result that carries a result set
    /// (or the last result when none does).
    #[allow(clippy::result_large_err)]
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Rows> {
        let results = self.run(sql, params, |stream| stream.collect_all())?;
        Ok(pick_rows(results))
    }

    /// Run `sql` and return every result of the response.
    #[allow(clippy::result_large_err)]
    pub fn query_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Rows>> {
        self.run(sql, params, |stream| stream.collect_all())
    }

    /// Run `sql`, discarding any rows. Returns the last result's counters.
    #[allow(clippy::result_large_err)]
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult> {
        self.run(sql, params, |stream| stream.finish_all())
    }

    /// Check that the server is alive.
    #[allow(clippy::result_large_err)]
    pub fn ping(&mut self) -> Result<()> {
        self.simple_command(&[Command::Ping as u8]).map(|_| ())
    }

    /// Close the connection with COM_QUIT (best effort).
    #[allow(clippy::result_large_err)]
    pub fn close(mut self) -> Result<()> {
        tracing::debug!(connection_id = self.connection_id, "closing connection");
        self.shutdown();
        Ok(())
    }

    // ==================== Binary protocol ====================

    /// Prepare a statement on the server.
    #[allow(clippy::result_large_err)]
    pub fn prepare(&mut self, sql: &str) -> Result<Statement> {
        self.send_command(&build_stmt_prepare_packet(sql))?;
        let res = self.read_prepare_response();
        self.finish_command();
        let (id, params, columns) = self.track(res)?;
        tracing::trace!(statement_id = id, params = params.len(), "statement prepared");
        Ok(Statement {
            id,
            params,
            columns,
            generation: self.generation,
        })
    }

    #[allow(clippy::type_complexity)]
    fn read_prepare_response(&mut self) -> Result<(u32, Vec<ColumnDefinition>, Vec<ColumnDefinition>)> {
        let packet = self.transport()?.read_packet()?;
        if packet.first() == Some(&0xFF) {
            return Err(server_error(&packet));
        }
        let ok = parse_stmt_prepare_ok(&packet)
            .ok_or_else(|| Error::protocol("invalid COM_STMT_PREPARE response"))?;
        let deprecate_eof = self.deprecate_eof();
        let transport = self.transport()?;
        let params = read_column_definitions(transport, usize::from(ok.num_params), deprecate_eof)?;
        let columns =
            read_column_definitions(transport, usize::from(ok.num_columns), deprecate_eof)?;
        Ok((ok.statement_id, params, columns))
    }

    /// Is `stmt` usable on this connection right now?
    fn check_statement(&self, stmt: &Statement) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(closed_error());
        }
        if stmt.generation != self.generation {
            return Err(Error::bad_connection(
                ConnectionErrorKind::StaleHandle,
                format!(
                    "statement {} belongs to connection generation {}, current is {}",
                    stmt.id, stmt.generation, self.generation
                ),
            ));
        }
        self.ensure_idle()
    }

    /// Stream parameters over the long-data threshold with COM_STMT_SEND_LONG_DATA.
    fn send_long_data(&mut self, stmt: &Statement, params: &[Value]) -> Result<Vec<bool>> {
        let threshold = self.config.long_data_threshold;
        // 7 bytes of command header precede each chunk
        let chunk_size = self
            .config
            .max_allowed_packet
            .saturating_sub(7)
            .clamp(1, MAX_PACKET_SIZE - 8);

        let mut sent = vec![false; params.len()];
        for (index, param) in params.iter().enumerate() {
            let data = match param {
                Value::Bytes(b) if b.len() > threshold => b.as_slice(),
                Value::Text(s) if s.len() > threshold => s.as_bytes(),
                _ => continue,
            };
            tracing::trace!(statement_id = stmt.id, index, len = data.len(), "sending long data");
            for chunk in data.chunks(chunk_size) {
                self.send_no_reply(&build_send_long_data_packet(stmt.id, index as u16, chunk))?;
            }
            sent[index] = true;
        }
        Ok(sent)
    }

    /// Execute a prepared statement and stream its response.
    #[allow(clippy::result_large_err)]
    pub fn execute_iter(&mut self, stmt: &Statement, params: &[Value]) -> Result<ResultStream<'_>> {
        self.check_statement(stmt)?;
        if params.len() != stmt.param_count() {
            return Err(Error::usage(format!(
                "statement expects {} parameters, got {}",
                stmt.param_count(),
                params.len()
            )));
        }
        let sent = self.send_long_data(stmt, params)?;
        self.send_command(&build_stmt_execute_packet(stmt.id, params, &sent))?;
        ResultStream::start(self, RowFormat::Binary)
    }

    /// Execute a prepared statement and read its first result set.
    ///
    /// The rows are fully buffered, so any number of these may be held at
    /// once, even for the same statement.
    #[allow(clippy::result_large_err)]
    pub fn query_prepared(&mut self, stmt: &Statement, params: &[Value]) -> Result<Rows> {
        let results = self.execute_iter(stmt, params)?.collect_all()?;
        Ok(pick_rows(results))
    }

    /// Execute a prepared statement, discarding rows.
    #[allow(clippy::result_large_err)]
    pub fn execute_prepared(&mut self, stmt: &Statement, params: &[Value]) -> Result<ExecResult> {
        self.execute_iter(stmt, params)?.finish_all()
    }

    /// Discard long data and cursor state of a statement.
    #[allow(clippy::result_large_err)]
    pub fn reset_statement(&mut self, stmt: &Statement) -> Result<()> {
        self.check_statement(stmt)?;
        self.simple_command(&build_stmt_reset_packet(stmt.id))
            .map(|_| ())
    }

    /// Deallocate a statement on the server. There is no reply.
    #[allow(clippy::result_large_err)]
    pub fn close_statement(&mut self, stmt: Statement) -> Result<()> {
        self.check_statement(&stmt)?;
        self.send_no_reply(&build_stmt_close_packet(stmt.id))
    }
}

fn server_error(packet: &[u8]) -> Error {
    PacketReader::new(packet)
        .parse_err_packet()
        .map_or_else(|| Error::protocol("invalid error packet"), Error::Server)
}

fn pick_rows(results: Vec<Rows>) -> Rows {
    let first_set = results.iter().position(Rows::has_result_set);
    match first_set {
        Some(index) => results.into_iter().nth(index).unwrap_or_default(),
        None => results.into_iter().last().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::registry;
    use crate::transport::tests::MemoryStream;

    fn scripted(input: Vec<u8>, dialer: &str) -> (MySqlConfig, MemoryStream) {
        let stream = MemoryStream::with_input(input);
        let handle = stream.clone();
        registry::register_dialer(dialer, move |_, _| Ok(Box::new(handle.clone())));
        (MySqlConfig::new().dialer(dialer), stream)
    }

    #[test]
    fn test_generations_are_unique() {
        let a = next_generation();
        let b = next_generation();
        assert!(b > a);
    }

    #[test]
    fn test_pick_rows_prefers_result_set() {
        assert!(!pick_rows(Vec::new()).has_result_set());
    }

    #[test]
    fn test_config_error_before_dialing() {
        let config = MySqlConfig::new().dialer("connection-never-dialed").collation("klingon_ci");
        let err = MySqlConnection::open(config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_disconnect_during_greeting_is_bad_connection() {
        let (config, _) = scripted(Vec::new(), "connection-empty-greeting");
        assert!(matches!(config.network, Network::Custom(_)));
        let err = MySqlConnection::open(config).unwrap_err();
        assert!(err.is_bad_connection());
        registry::unregister_dialer("connection-empty-greeting");
    }
}
