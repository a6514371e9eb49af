//! MySQL type system and value codec.
//!
//! This module provides:
//! - MySQL field type codes and column flags
//! - Column definition parsing
//! - Decoding of text-protocol and binary-protocol row values
//! - Binary parameter encoding for prepared statements
//!
//! # MySQL Type System
//!
//! The text protocol transmits every value as a length-encoded string; the
//! binary protocol uses a type-specific encoding. Both decode into the same
//! [`Value`] so a column reads identically whichever protocol produced it:
//! integers honour the UNSIGNED flag, FLOAT widens exactly into a double,
//! temporal values keep the column's declared fractional digits, and string
//! columns with the binary charset (63) decode to bytes.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::charset;
use crate::protocol::{PacketReader, PacketWriter};
use mywire_core::temporal::{Date, DateTime, MAX_PRECISION, Temporal, Time};
use mywire_core::{Error, Result, Value};

/// MySQL field type codes.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// DECIMAL (MYSQL_TYPE_DECIMAL)
    Decimal = 0x00,
    /// TINYINT (MYSQL_TYPE_TINY)
    Tiny = 0x01,
    /// SMALLINT (MYSQL_TYPE_SHORT)
    Short = 0x02,
    /// INT (MYSQL_TYPE_LONG)
    Long = 0x03,
    /// FLOAT (MYSQL_TYPE_FLOAT)
    Float = 0x04,
    /// DOUBLE (MYSQL_TYPE_DOUBLE)
    Double = 0x05,
    /// NULL (MYSQL_TYPE_NULL)
    Null = 0x06,
    /// TIMESTAMP (MYSQL_TYPE_TIMESTAMP)
    Timestamp = 0x07,
    /// BIGINT (MYSQL_TYPE_LONGLONG)
    LongLong = 0x08,
    /// MEDIUMINT (MYSQL_TYPE_INT24)
    Int24 = 0x09,
    /// DATE (MYSQL_TYPE_DATE)
    Date = 0x0A,
    /// TIME (MYSQL_TYPE_TIME)
    Time = 0x0B,
    /// DATETIME (MYSQL_TYPE_DATETIME)
    DateTime = 0x0C,
    /// YEAR (MYSQL_TYPE_YEAR)
    Year = 0x0D,
    /// NEWDATE (MYSQL_TYPE_NEWDATE) - internal use
    NewDate = 0x0E,
    /// VARCHAR (MYSQL_TYPE_VARCHAR)
    VarChar = 0x0F,
    /// BIT (MYSQL_TYPE_BIT)
    Bit = 0x10,
    /// TIMESTAMP2 (MYSQL_TYPE_TIMESTAMP2)
    Timestamp2 = 0x11,
    /// DATETIME2 (MYSQL_TYPE_DATETIME2)
    DateTime2 = 0x12,
    /// TIME2 (MYSQL_TYPE_TIME2)
    Time2 = 0x13,
    /// JSON (MYSQL_TYPE_JSON)
    Json = 0xF5,
    /// NEWDECIMAL (MYSQL_TYPE_NEWDECIMAL)
    NewDecimal = 0xF6,
    /// ENUM (MYSQL_TYPE_ENUM)
    Enum = 0xF7,
    /// SET (MYSQL_TYPE_SET)
    Set = 0xF8,
    /// TINYBLOB (MYSQL_TYPE_TINY_BLOB)
    TinyBlob = 0xF9,
    /// MEDIUMBLOB (MYSQL_TYPE_MEDIUM_BLOB)
    MediumBlob = 0xFA,
    /// LONGBLOB (MYSQL_TYPE_LONG_BLOB)
    LongBlob = 0xFB,
    /// BLOB (MYSQL_TYPE_BLOB)
    Blob = 0xFC,
    /// VARCHAR (MYSQL_TYPE_VAR_STRING)
    VarString = 0xFD,
    /// CHAR (MYSQL_TYPE_STRING)
    String = 0xFE,
    /// GEOMETRY (MYSQL_TYPE_GEOMETRY)
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from a byte. Unknown codes decode as strings.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    pub const fn is_float(self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }

    pub const fn is_decimal(self) -> bool {
        matches!(self, FieldType::Decimal | FieldType::NewDecimal)
    }

    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::Time
                | FieldType::DateTime
                | FieldType::Timestamp
                | FieldType::NewDate
                | FieldType::Timestamp2
                | FieldType::DateTime2
                | FieldType::Time2
        )
    }

    /// Get the type name as a string.
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp | FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time | FieldType::Time2 => "TIME",
            FieldType::DateTime | FieldType::DateTime2 => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in result set metadata.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const AUTO_INCREMENT: u16 = 512;
}

/// Parameter flag byte marking an unsigned integer in COM_STMT_EXECUTE.
pub const PARAM_UNSIGNED: u8 = 0x80;

/// Column definition from a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Schema (database) name
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    /// Original table name
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Collation id of the column's character set
    pub charset: u16,
    /// Display length
    pub column_length: u32,
    /// Column type
    pub column_type: FieldType,
    /// Column flags
    pub flags: u16,
    /// Declared decimals; 0x1f means "not fixed"
    pub decimals: u8,
}

impl ColumnDefinition {
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    pub const fn is_zerofill(&self) -> bool {
        self.flags & column_flags::ZEROFILL != 0
    }

    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    /// Does the column hold raw bytes rather than text?
    pub const fn is_binary_charset(&self) -> bool {
        self.charset == charset::BINARY as u16
    }

    /// Fractional-second digits declared for a temporal column, if fixed.
    pub fn fraction_digits(&self) -> Option<u8> {
        (self.decimals <= MAX_PRECISION).then_some(self.decimals)
    }

    /// `table.name`, or just `name` for columns with no table (expressions).
    pub fn qualified_name(&self) -> String {
        if self.table.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.table, self.name)
        }
    }
}

/// Parse a column definition packet (protocol 4.1).
pub fn parse_column_definition(data: &[u8]) -> Result<ColumnDefinition> {
    let truncated = || Error::protocol("truncated column definition packet");
    let mut reader = PacketReader::new(data);

    // catalog is always "def"
    reader.read_lenenc_bytes().ok_or_else(truncated)?;
    let schema = reader.read_lenenc_string().ok_or_else(truncated)?;
    let table = reader.read_lenenc_string().ok_or_else(truncated)?;
    let org_table = reader.read_lenenc_string().ok_or_else(truncated)?;
    let name = reader.read_lenenc_string().ok_or_else(truncated)?;
    let org_name = reader.read_lenenc_string().ok_or_else(truncated)?;

    // length of the fixed-size fields, always 0x0c
    reader.read_lenenc_int().ok_or_else(truncated)?;
    let charset = reader.read_u16_le().ok_or_else(truncated)?;
    let column_length = reader.read_u32_le().ok_or_else(truncated)?;
    let column_type = FieldType::from_u8(reader.read_u8().ok_or_else(truncated)?);
    let flags = reader.read_u16_le().ok_or_else(truncated)?;
    let decimals = reader.read_u8().ok_or_else(truncated)?;

    Ok(ColumnDefinition {
        schema,
        table,
        org_table,
        name,
        org_name,
        charset,
        column_length,
        column_type,
        flags,
        decimals,
    })
}

/// Decoding switches that come from connection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Decode temporal columns to [`Value::Temporal`]; otherwise to their text.
    pub parse_time: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { parse_time: true }
    }
}

fn string_value(column: &ColumnDefinition, data: &[u8]) -> Value {
    if column.is_binary_charset() {
        return Value::Bytes(data.to_vec());
    }
    match std::str::from_utf8(data) {
        Ok(s) => Value::Text(s.to_string()),
        Err(_) => Value::Bytes(data.to_vec()),
    }
}

fn temporal_value(temporal: Temporal, opts: DecodeOptions) -> Value {
    if opts.parse_time {
        Value::Temporal(temporal)
    } else {
        Value::Text(temporal.to_string())
    }
}

/// Decode a text protocol value.
///
/// Text that does not parse as the column's type is returned as-is rather
/// than dropped.
pub fn decode_text_value(column: &ColumnDefinition, data: &[u8], opts: DecodeOptions) -> Value {
    let Ok(text) = std::str::from_utf8(data) else {
        return Value::Bytes(data.to_vec());
    };
    let fallback = || string_value(column, data);

    match column.column_type {
        t if t.is_integer() => {
            if column.is_unsigned() {
                text.parse::<u64>().map_or_else(|_| fallback(), Value::UInt)
            } else {
                text.parse::<i64>().map_or_else(|_| fallback(), Value::Int)
            }
        }

        // Parse as f32 first so the value widens exactly
        FieldType::Float => text
            .parse::<f32>()
            .map_or_else(|_| fallback(), |v| Value::Double(f64::from(v))),

        FieldType::Double => text.parse::<f64>().map_or_else(|_| fallback(), Value::Double),

        FieldType::Date | FieldType::NewDate => Date::parse(text)
            .map_or_else(|_| fallback(), |d| temporal_value(Temporal::Date(d), opts)),

        FieldType::DateTime
        | FieldType::DateTime2
        | FieldType::Timestamp
        | FieldType::Timestamp2 => DateTime::parse(text).map_or_else(
            |_| fallback(),
            |dt| {
                let dt = match column.fraction_digits() {
                    Some(p) => dt.with_precision(p),
                    None => dt,
                };
                temporal_value(Temporal::DateTime(dt), opts)
            },
        ),

        FieldType::Time | FieldType::Time2 => Time::parse(text).map_or_else(
            |_| fallback(),
            |t| {
                let t = match column.fraction_digits() {
                    Some(p) => t.with_precision(p),
                    None => t,
                };
                temporal_value(Temporal::Time(t), opts)
            },
        ),

        FieldType::Null => Value::Null,

        FieldType::Bit | FieldType::Geometry => Value::Bytes(data.to_vec()),

        // DECIMAL, JSON, ENUM, SET, strings and blobs
        _ => fallback(),
    }
}

/// Decode one non-NULL binary protocol value from the reader.
///
/// Returns `None` when the row is truncated.
pub fn decode_binary_value(
    column: &ColumnDefinition,
    reader: &mut PacketReader<'_>,
    opts: DecodeOptions,
) -> Option<Value> {
    let unsigned = column.is_unsigned();
    let value = match column.column_type {
        FieldType::Tiny => {
            let v = reader.read_u8()?;
            if unsigned {
                Value::UInt(u64::from(v))
            } else {
                Value::Int(i64::from(v as i8))
            }
        }
        FieldType::Short | FieldType::Year => {
            let v = reader.read_u16_le()?;
            if unsigned {
                Value::UInt(u64::from(v))
            } else {
                Value::Int(i64::from(v as i16))
            }
        }
        FieldType::Long | FieldType::Int24 => {
            let v = reader.read_u32_le()?;
            if unsigned {
                Value::UInt(u64::from(v))
            } else {
                Value::Int(i64::from(v as i32))
            }
        }
        FieldType::LongLong => {
            let v = reader.read_u64_le()?;
            if unsigned {
                Value::UInt(v)
            } else {
                Value::Int(v as i64)
            }
        }
        FieldType::Float => Value::Double(f64::from(f32::from_bits(reader.read_u32_le()?))),
        FieldType::Double => Value::Double(f64::from_bits(reader.read_u64_le()?)),

        FieldType::Date | FieldType::NewDate => {
            let len = usize::from(reader.read_u8()?);
            let data = reader.read_bytes(len)?;
            temporal_value(Temporal::Date(decode_binary_date(data)?), opts)
        }
        FieldType::DateTime
        | FieldType::DateTime2
        | FieldType::Timestamp
        | FieldType::Timestamp2 => {
            let len = usize::from(reader.read_u8()?);
            let data = reader.read_bytes(len)?;
            let dt = decode_binary_datetime(data, column.fraction_digits())?;
            temporal_value(Temporal::DateTime(dt), opts)
        }
        FieldType::Time | FieldType::Time2 => {
            let len = usize::from(reader.read_u8()?);
            let data = reader.read_bytes(len)?;
            let t = decode_binary_time(data, column.fraction_digits())?;
            temporal_value(Temporal::Time(t), opts)
        }

        FieldType::Null => Value::Null,
        FieldType::Bit | FieldType::Geometry => Value::Bytes(reader.read_lenenc_bytes()?.to_vec()),
        _ => string_value(column, reader.read_lenenc_bytes()?),
    };
    Some(value)
}

/// Binary DATE: 0 bytes (zero date) or year u16, month, day.
fn decode_binary_date(data: &[u8]) -> Option<Date> {
    if data.is_empty() {
        return Some(Date::ZERO);
    }
    if data.len() < 4 {
        return None;
    }
    Some(Date::new(
        u16::from_le_bytes([data[0], data[1]]),
        data[2],
        data[3],
    ))
}

/// Binary DATETIME: 0, 4, 7 or 11 bytes.
fn decode_binary_datetime(data: &[u8], precision: Option<u8>) -> Option<DateTime> {
    let date = decode_binary_date(data)?;
    let (hour, minute, second) = match data.len() {
        0 | 4 => (0, 0, 0),
        7 | 11 => (data[4], data[5], data[6]),
        _ => return None,
    };
    let micros = if data.len() == 11 {
        u32::from_le_bytes([data[7], data[8], data[9], data[10]])
    } else {
        0
    };
    let precision = precision.unwrap_or(if data.len() == 11 { MAX_PRECISION } else { 0 });
    Some(DateTime::new(date, hour, minute, second, micros, precision))
}

/// Binary TIME: 0, 8 or 12 bytes (sign, days u32, h, m, s, [micros u32]).
fn decode_binary_time(data: &[u8], precision: Option<u8>) -> Option<Time> {
    match data.len() {
        0 => return Some(Time::new(false, 0, 0, 0, 0, precision.unwrap_or(0))),
        8 | 12 => {}
        _ => return None,
    }
    let negative = data[0] == 1;
    let days = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    let micros = if data.len() == 12 {
        u32::from_le_bytes([data[8], data[9], data[10], data[11]])
    } else {
        0
    };
    let precision = precision.unwrap_or(if data.len() == 12 { MAX_PRECISION } else { 0 });
    let hours = days.checked_mul(24)?.checked_add(u32::from(data[5]))?;
    Some(Time::new(
        negative,
        hours,
        data[6],
        data[7],
        micros,
        precision,
    ))
}

/// Render a value as the server would print it. ZEROFILL integer, DECIMAL,
/// FLOAT and DOUBLE columns are left-padded with zeros to the display width;
/// floats with declared decimals keep that many fraction digits. The decoded
/// value is never affected.
pub fn render_text(column: &ColumnDefinition, value: &Value) -> Option<String> {
    let column_type = column.column_type;
    let digits = match value {
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Null => return None,
        Value::Double(v) if column_type.is_float() && column.decimals < 31 => {
            format!("{v:.prec$}", prec = usize::from(column.decimals))
        }
        Value::Double(v) => v.to_string(),
        Value::Text(s) => s.clone(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Temporal(t) => t.to_string(),
    };
    let numeric = column_type.is_integer() || column_type.is_decimal() || column_type.is_float();
    let width = column.column_length as usize;
    if !(column.is_zerofill() && numeric) || digits.len() >= width {
        return Some(digits);
    }
    let pad = "0".repeat(width - digits.len());
    Some(match digits.strip_prefix('-') {
        Some(rest) => format!("-{pad}{rest}"),
        None => format!("{pad}{digits}"),
    })
}

/// Wire type and flag byte for a bound parameter.
pub fn param_type(value: &Value) -> (FieldType, u8) {
    match value {
        Value::Null => (FieldType::Null, 0),
        Value::Int(_) => (FieldType::LongLong, 0),
        Value::UInt(_) => (FieldType::LongLong, PARAM_UNSIGNED),
        Value::Double(_) => (FieldType::Double, 0),
        Value::Bytes(_) => (FieldType::Blob, 0),
        Value::Text(_) => (FieldType::VarString, 0),
        Value::Temporal(Temporal::Date(_)) => (FieldType::Date, 0),
        Value::Temporal(Temporal::DateTime(_)) => (FieldType::DateTime, 0),
        Value::Temporal(Temporal::Time(_)) => (FieldType::Time, 0),
    }
}

/// Encode a non-NULL parameter value for COM_STMT_EXECUTE.
pub fn encode_binary_param(writer: &mut PacketWriter, value: &Value) {
    match value {
        Value::Null => {}
        Value::Int(v) => writer.write_u64_le(*v as u64),
        Value::UInt(v) => writer.write_u64_le(*v),
        Value::Double(v) => writer.write_u64_le(v.to_bits()),
        Value::Bytes(b) => writer.write_lenenc_bytes(b),
        Value::Text(s) => writer.write_lenenc_string(s),
        Value::Temporal(Temporal::Date(d)) => {
            if d.is_zero() {
                writer.write_u8(0);
            } else {
                writer.write_u8(4);
                write_date(writer, d);
            }
        }
        Value::Temporal(Temporal::DateTime(dt)) => {
            if dt.is_zero() {
                writer.write_u8(0);
            } else if dt.micros != 0 {
                writer.write_u8(11);
                write_date(writer, &dt.date);
                writer.write_bytes(&[dt.hour, dt.minute, dt.second]);
                writer.write_u32_le(dt.micros);
            } else if dt.hour != 0 || dt.minute != 0 || dt.second != 0 {
                writer.write_u8(7);
                write_date(writer, &dt.date);
                writer.write_bytes(&[dt.hour, dt.minute, dt.second]);
            } else {
                writer.write_u8(4);
                write_date(writer, &dt.date);
            }
        }
        Value::Temporal(Temporal::Time(t)) => {
            if t.is_zero() {
                writer.write_u8(0);
                return;
            }
            writer.write_u8(if t.micros != 0 { 12 } else { 8 });
            writer.write_u8(u8::from(t.negative));
            writer.write_u32_le(t.hours / 24);
            writer.write_bytes(&[(t.hours % 24) as u8, t.minutes, t.seconds]);
            if t.micros != 0 {
                writer.write_u32_le(t.micros);
            }
        }
    }
}

fn write_date(writer: &mut PacketWriter, d: &Date) {
    writer.write_u16_le(d.year);
    writer.write_u8(d.month);
    writer.write_u8(d.day);
}
