//! MySQL prepared statement (binary protocol) commands.
//!
//! # Protocol Flow
//!
//! 1. **Prepare**: COM_STMT_PREPARE with the SQL text
//!    - Server returns statement ID, param count, column count
//!    - Server sends param column definitions (if any)
//!    - Server sends result column definitions (if any)
//!
//! 2. **Send long data** (optional): COM_STMT_SEND_LONG_DATA per large parameter
//!    - No server response
//!
//! 3. **Execute**: COM_STMT_EXECUTE with statement ID + binary params
//!    - Server returns a binary result set or an OK packet
//!
//! 4. **Close**: COM_STMT_CLOSE with statement ID
//!    - No server response
//!
//! The builders here return command payloads; framing happens in the transport.

use super::{Command, PacketReader, PacketWriter};
use crate::types::{encode_binary_param, param_type};
use mywire_core::Value;

/// Response from COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    /// Unique statement identifier (used in execute/close)
    pub statement_id: u32,
    /// Number of columns in result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of parameters (placeholders) in the SQL
    pub num_params: u16,
    /// Number of warnings generated during prepare
    pub warnings: u16,
}

/// Build a COM_STMT_PREPARE payload.
pub fn build_stmt_prepare_packet(sql: &str) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(1 + sql.len());
    writer.write_u8(Command::StmtPrepare as u8);
    writer.write_bytes(sql.as_bytes());
    writer.into_bytes()
}

/// Build a COM_STMT_EXECUTE payload.
///
/// Layout:
/// - Command byte (0x17)
/// - Statement ID (4 bytes, little-endian)
/// - Flags (1 byte): always CURSOR_TYPE_NO_CURSOR
/// - Iteration count (4 bytes, always 1)
/// - NULL bitmap, `(num_params + 7) / 8` bytes
/// - New params bound flag (1 byte, always 1)
/// - Type and flag byte per parameter
/// - Values of non-NULL parameters
///
/// Parameters whose index is set in `sent_as_long_data` already reached the
/// server through COM_STMT_SEND_LONG_DATA; only their type is written.
pub fn build_stmt_execute_packet(
    statement_id: u32,
    params: &[Value],
    sent_as_long_data: &[bool],
) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(64 + params.len() * 16);

    writer.write_u8(Command::StmtExecute as u8);
    writer.write_u32_le(statement_id);
    writer.write_u8(0x00);
    writer.write_u32_le(1);

    if params.is_empty() {
        return writer.into_bytes();
    }

    let mut null_bitmap = vec![0u8; params.len().div_ceil(8)];
    for (i, param) in params.iter().enumerate() {
        if param.is_null() {
            null_bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    writer.write_bytes(&null_bitmap);

    writer.write_u8(1);
    for param in params {
        let (field_type, flags) = param_type(param);
        writer.write_u8(field_type as u8);
        writer.write_u8(flags);
    }

    for (i, param) in params.iter().enumerate() {
        if sent_as_long_data.get(i).copied().unwrap_or(false) {
            continue;
        }
        encode_binary_param(&mut writer, param);
    }

    writer.into_bytes()
}

/// Build a COM_STMT_SEND_LONG_DATA payload carrying one chunk of a parameter.
pub fn build_send_long_data_packet(statement_id: u32, param_index: u16, chunk: &[u8]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(7 + chunk.len());
    writer.write_u8(Command::StmtSendLongData as u8);
    writer.write_u32_le(statement_id);
    writer.write_u16_le(param_index);
    writer.write_bytes(chunk);
    writer.into_bytes()
}

/// Build a COM_STMT_CLOSE payload. The server does not respond.
pub fn build_stmt_close_packet(statement_id: u32) -> Vec<u8> {
    statement_command(Command::StmtClose, statement_id)
}

/// Build a COM_STMT_RESET payload.
///
/// Discards long data accumulated with COM_STMT_SEND_LONG_DATA.
pub fn build_stmt_reset_packet(statement_id: u32) -> Vec<u8> {
    statement_command(Command::StmtReset, statement_id)
}

fn statement_command(command: Command, statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(command as u8);
    writer.write_u32_le(statement_id);
    writer.into_bytes()
}

/// Parse a COM_STMT_PREPARE_OK response.
///
/// - Status: 0x00 (1 byte)
/// - Statement ID (4 bytes)
/// - Number of columns (2 bytes)
/// - Number of parameters (2 bytes)
/// - Reserved: 0x00 (1 byte)
/// - Warning count (2 bytes)
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Option<StmtPrepareOk> {
    let mut reader = PacketReader::new(data);
    if reader.read_u8()? != 0x00 {
        return None;
    }
    let statement_id = reader.read_u32_le()?;
    let num_columns = reader.read_u16_le()?;
    let num_params = reader.read_u16_le()?;
    reader.skip(1);
    let warnings = reader.read_u16_le().unwrap_or(0);
    Some(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    #[test]
    fn test_build_stmt_prepare_packet() {
        let payload = build_stmt_prepare_packet("SELECT ?");
        assert_eq!(payload[0], 0x16);
        assert_eq!(&payload[1..], b"SELECT ?");
    }

    #[test]
    fn test_execute_without_params() {
        let payload = build_stmt_execute_packet(7, &[], &[]);
        assert_eq!(payload, vec![0x17, 7, 0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_execute_layout() {
        let params = [Value::Int(1), Value::Null, Value::UInt(2), Value::Text("ab".into())];
        let payload = build_stmt_execute_packet(1, &params, &[]);
        let mut r = PacketReader::new(&payload);
        assert_eq!(r.read_u8(), Some(0x17));
        assert_eq!(r.read_u32_le(), Some(1));
        assert_eq!(r.read_u8(), Some(0));
        assert_eq!(r.read_u32_le(), Some(1));
        // NULL bitmap marks the second parameter
        assert_eq!(r.read_u8(), Some(0b0000_0010));
        assert_eq!(r.read_u8(), Some(1));
        assert_eq!(r.read_bytes(8), Some(&[
            FieldType::LongLong as u8, 0,
            FieldType::Null as u8, 0,
            FieldType::LongLong as u8, 0x80,
            FieldType::VarString as u8, 0,
        ][..]));
        assert_eq!(r.read_u64_le(), Some(1));
        assert_eq!(r.read_u64_le(), Some(2));
        assert_eq!(r.read_lenenc_string().as_deref(), Some("ab"));
        assert!(r.is_empty());
    }

    #[test]
    fn test_execute_skips_long_data_values() {
        let params = [Value::Bytes(vec![1; 10]), Value::Int(5)];
        let payload = build_stmt_execute_packet(1, &params, &[true, false]);
        // header 10 + bitmap 1 + bound 1 + types 4 + one i64
        assert_eq!(payload.len(), 10 + 1 + 1 + 4 + 8);
    }

    #[test]
    fn test_send_long_data_packet() {
        let payload = build_send_long_data_packet(3, 1, b"xyz");
        assert_eq!(payload, vec![0x18, 3, 0, 0, 0, 1, 0, b'x', b'y', b'z']);
    }

    #[test]
    fn test_close_and_reset() {
        assert_eq!(build_stmt_close_packet(9), vec![0x19, 9, 0, 0, 0]);
        assert_eq!(build_stmt_reset_packet(9), vec![0x1a, 9, 0, 0, 0]);
    }

    #[test]
    fn test_parse_stmt_prepare_ok() {
        let data = [0x00, 1, 0, 0, 0, 2, 0, 3, 0, 0, 1, 0];
        let ok = parse_stmt_prepare_ok(&data).unwrap();
        assert_eq!(ok.statement_id, 1);
        assert_eq!(ok.num_columns, 2);
        assert_eq!(ok.num_params, 3);
        assert_eq!(ok.warnings, 1);

        assert!(parse_stmt_prepare_ok(&[0xFF, 1, 2]).is_none());
        assert!(parse_stmt_prepare_ok(&[0x00, 1, 0]).is_none());
    }
}
