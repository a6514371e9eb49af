//! Result sets: column definitions, row decoding and result chains.
//!
//! A response is a chain of results. Each result is either an OK packet
//! (affected rows, last insert id) or a result set (column definitions
//! followed by rows). The SERVER_MORE_RESULTS_EXISTS status flag on an OK
//! packet or row terminator means another result follows in the same
//! response, and the whole chain must leave the wire before the next
//! command.
//!
//! [`ResultStream`] reads the chain lazily and borrows the connection for
//! its lifetime; [`Rows`] is one fully materialized result with no tie to
//! the connection.

use crate::connection::MySqlConnection;
use crate::protocol::{MAX_COLUMNS, OkPacket, PacketReader, server_status};
use crate::transport::PacketTransport;
use crate::types::{
    ColumnDefinition, DecodeOptions, decode_binary_value, decode_text_value,
    parse_column_definition,
};
use mywire_core::{ColumnInfo, Error, Result, Row, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Row encoding of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// COM_QUERY: length-encoded strings
    Text,
    /// COM_STMT_EXECUTE: NULL bitmap and typed fields
    Binary,
}

/// Counters and status from the OK packet (or row terminator) ending a result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub warnings: u16,
    pub status_flags: u16,
}

impl ExecResult {
    pub fn in_transaction(&self) -> bool {
        self.status_flags & server_status::SERVER_STATUS_IN_TRANS != 0
    }

    pub(crate) fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

impl From<&OkPacket> for ExecResult {
    fn from(ok: &OkPacket) -> Self {
        Self {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            warnings: ok.warnings,
            status_flags: ok.status_flags,
        }
    }
}

/// Column definitions of one result set, with the name index shared by its rows.
#[derive(Debug, Clone)]
pub struct ResultColumns {
    definitions: Vec<ColumnDefinition>,
    info: Arc<ColumnInfo>,
}

impl ResultColumns {
    pub fn new(definitions: Vec<ColumnDefinition>) -> Self {
        Self::named(definitions, false)
    }

    /// Name each column `table.column` where the server reports a table.
    pub fn with_alias(definitions: Vec<ColumnDefinition>) -> Self {
        Self::named(definitions, true)
    }

    fn named(definitions: Vec<ColumnDefinition>, qualified: bool) -> Self {
        let names = definitions
            .iter()
            .map(|c| if qualified { c.qualified_name() } else { c.name.clone() })
            .collect();
        let info = Arc::new(ColumnInfo::new(names));
        Self { definitions, info }
    }

    pub fn definitions(&self) -> &[ColumnDefinition] {
        &self.definitions
    }

    pub fn info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.info)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// First packet of a result, already classified.
#[derive(Debug)]
pub(crate) enum ResultHeader {
    Ok(OkPacket),
    Columns(Vec<ColumnDefinition>),
}

/// One packet of a row stream.
#[derive(Debug)]
pub(crate) enum RowPacket {
    Row(Vec<u8>),
    End(ExecResult),
}

/// Read `count` column definitions and, unless DEPRECATE_EOF is in effect,
/// the EOF packet after them.
///
/// `count` comes off the wire, so it is bounded before anything is sized
/// from it. Prepared statements may declare up to 65535 parameters.
pub(crate) fn read_column_definitions(
    transport: &mut PacketTransport,
    count: usize,
    deprecate_eof: bool,
) -> Result<Vec<ColumnDefinition>> {
    if count > usize::from(u16::MAX) {
        return Err(Error::protocol(format!(
            "server announced {count} column definitions"
        )));
    }
    let mut columns = Vec::with_capacity(count.min(MAX_COLUMNS));
    for _ in 0..count {
        columns.push(parse_column_definition(&transport.read_packet()?)?);
    }
    if !deprecate_eof && count > 0 {
        let eof = transport.read_packet()?;
        if eof.first() != Some(&0xFE) {
            return Err(Error::protocol("expected EOF after column definitions"));
        }
    }
    Ok(columns)
}

/// Decode a text protocol row.
pub fn decode_text_row(
    payload: &[u8],
    columns: &[ColumnDefinition],
    opts: DecodeOptions,
) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    let mut values = Vec::with_capacity(columns.len());
    for column in columns {
        if reader.peek() == Some(0xFB) {
            reader.skip(1);
            values.push(Value::Null);
            continue;
        }
        let data = reader
            .read_lenenc_bytes()
            .ok_or_else(|| Error::protocol(format!("truncated text row at column '{}'", column.name)))?;
        values.push(decode_text_value(column, data, opts));
    }
    Ok(values)
}

/// Decode a binary protocol row.
///
/// The NULL bitmap is offset by two bits: bit `i + 2` marks column `i`.
pub fn decode_binary_row(
    payload: &[u8],
    columns: &[ColumnDefinition],
    opts: DecodeOptions,
) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    if reader.read_u8() != Some(0x00) {
        return Err(Error::protocol("binary row without 0x00 header"));
    }
    let bitmap = reader
        .read_bytes((columns.len() + 7 + 2) / 8)
        .ok_or_else(|| Error::protocol("truncated binary row NULL bitmap"))?;

    let mut values = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        let value = decode_binary_value(column, &mut reader, opts).ok_or_else(|| {
            Error::protocol(format!("truncated binary row at column '{}'", column.name))
        })?;
        values.push(value);
    }
    Ok(values)
}

fn decode_row(
    format: RowFormat,
    payload: &[u8],
    columns: &ResultColumns,
    opts: DecodeOptions,
) -> Result<Row> {
    let values = match format {
        RowFormat::Text => decode_text_row(payload, columns.definitions(), opts)?,
        RowFormat::Binary => decode_binary_row(payload, columns.definitions(), opts)?,
    };
    Ok(Row::with_columns(columns.info(), values))
}

/// One fully read result: its rows (if it produced any) and its counters.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    columns: Option<Arc<ResultColumns>>,
    rows: Vec<Row>,
    result: ExecResult,
}

impl Rows {
    /// Column definitions; empty for a result without a result set.
    pub fn columns(&self) -> &[ColumnDefinition] {
        self.columns.as_deref().map_or(&[], ResultColumns::definitions)
    }

    /// Did this result carry a result set (possibly with zero rows)?
    pub fn has_result_set(&self) -> bool {
        self.columns.is_some()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn affected_rows(&self) -> u64 {
        self.result.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.result.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.result.warnings
    }

    pub fn result(&self) -> ExecResult {
        self.result
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Rows {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// A response read straight off the wire.
///
/// Iterating yields the rows of the current result; [`next_result`]
/// advances along the chain. While the stream is alive the connection is
/// busy and, being mutably borrowed, cannot start another command.
/// Dropping the stream drains whatever is left of the response.
///
/// [`next_result`]: ResultStream::next_result
#[derive(Debug)]
pub struct ResultStream<'c> {
    conn: &'c mut MySqlConnection,
    format: RowFormat,
    opts: DecodeOptions,
    columns: Option<Arc<ResultColumns>>,
    rows_pending: bool,
    result: ExecResult,
    finished: bool,
}

impl<'c> ResultStream<'c> {
    /// Start reading the response to a command that was just sent.
    pub(crate) fn start(conn: &'c mut MySqlConnection, format: RowFormat) -> Result<Self> {
        let opts = conn.decode_options();
        let mut stream = Self {
            conn,
            format,
            opts,
            columns: None,
            rows_pending: false,
            result: ExecResult::default(),
            finished: false,
        };
        stream.read_header()?;
        Ok(stream)
    }

    fn read_header(&mut self) -> Result<()> {
        match self.conn.read_result_header() {
            Ok(ResultHeader::Ok(ok)) => {
                self.columns = None;
                self.rows_pending = false;
                self.result = ExecResult::from(&ok);
                if !ok.more_results() {
                    self.finish();
                }
                Ok(())
            }
            Ok(ResultHeader::Columns(definitions)) => {
                let columns = if self.conn.config().columns_with_alias {
                    ResultColumns::with_alias(definitions)
                } else {
                    ResultColumns::new(definitions)
                };
                self.columns = Some(Arc::new(columns));
                self.rows_pending = true;
                self.result = ExecResult::default();
                Ok(())
            }
            Err(e) => {
                self.finish();
                Err(e)
            }
        }
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.rows_pending = false;
            self.conn.finish_command();
        }
    }

    /// Column definitions of the current result; empty for an OK result.
    pub fn columns(&self) -> &[ColumnDefinition] {
        self.columns.as_deref().map_or(&[], ResultColumns::definitions)
    }

    /// Does the current result carry a result set?
    pub fn has_result_set(&self) -> bool {
        self.columns.is_some()
    }

    /// Counters of the current result. For a result set they are only
    /// known once its rows have been consumed.
    pub fn result(&self) -> ExecResult {
        self.result
    }

    /// Has the whole response been read?
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn next_row(&mut self) -> Option<Result<Row>> {
        if !self.rows_pending {
            return None;
        }
        let columns = Arc::clone(self.columns.as_ref()?);
        match self.conn.read_row_packet() {
            Ok(RowPacket::Row(payload)) => {
                match decode_row(self.format, &payload, &columns, self.opts) {
                    Ok(row) => Some(Ok(row)),
                    Err(e) => {
                        let e = self.conn.fail(e);
                        self.finish();
                        Some(Err(e))
                    }
                }
            }
            Ok(RowPacket::End(result)) => {
                self.rows_pending = false;
                self.result = result;
                if !result.more_results() {
                    self.finish();
                }
                None
            }
            Err(e) => {
                // ERR inside a row stream ends the whole response
                self.finish();
                Some(Err(e))
            }
        }
    }

    /// Skip the rest of the current result and move to the next one.
    ///
    /// Returns `false` once the response is exhausted.
    #[allow(clippy::result_large_err)]
    pub fn next_result(&mut self) -> Result<bool> {
        while let Some(row) = self.next_row() {
            row?;
        }
        if self.finished {
            return Ok(false);
        }
        self.read_header()?;
        Ok(true)
    }

    /// Read the current result into memory.
    #[allow(clippy::result_large_err)]
    pub fn materialize(&mut self) -> Result<Rows> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row() {
            rows.push(row?);
        }
        Ok(Rows {
            columns: self.columns.clone(),
            rows,
            result: self.result,
        })
    }

    /// Read every remaining result into memory.
    #[allow(clippy::result_large_err)]
    pub fn collect_all(mut self) -> Result<Vec<Rows>> {
        let mut results = vec![self.materialize()?];
        while self.next_result()? {
            results.push(self.materialize()?);
        }
        Ok(results)
    }

    /// Read the rest of the response, keeping only the last result's counters.
    #[allow(clippy::result_large_err)]
    pub fn finish_all(mut self) -> Result<ExecResult> {
        while self.next_result()? {}
        Ok(self.result)
    }
}

impl Iterator for ResultStream<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row()
    }
}

impl Drop for ResultStream<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        loop {
            match self.next_result() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "error while draining abandoned result");
                    break;
                }
            }
        }
        self.finish();
    }
}
