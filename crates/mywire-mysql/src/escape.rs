//! SQL literal escaping and client-side parameter interpolation.
//!
//! MySQL accepts two escaping conventions for string literals:
//! - backslash mode (the default): special bytes are prefixed with `\`
//! - quote mode (`NO_BACKSLASH_ESCAPES`): only `'` is special and is doubled
//!
//! The active mode comes from the status flags of the last OK/EOF packet.

use mywire_core::{Error, Result, TypeError, Value};

/// Which escaping convention the server currently expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapeMode {
    #[default]
    Backslash,
    Quote,
}

impl EscapeMode {
    /// Select the mode from server status flags.
    pub fn from_status(status_flags: u16) -> Self {
        if status_flags & crate::protocol::server_status::SERVER_STATUS_NO_BACKSLASH_ESCAPES != 0 {
            EscapeMode::Quote
        } else {
            EscapeMode::Backslash
        }
    }
}

/// Append `data` to `out`, escaped for use inside a single-quoted literal.
pub fn escape_bytes_into(out: &mut Vec<u8>, data: &[u8], mode: EscapeMode) {
    out.reserve(data.len());
    match mode {
        EscapeMode::Backslash => {
            for &b in data {
                match b {
                    0x00 => out.extend_from_slice(b"\\0"),
                    b'\n' => out.extend_from_slice(b"\\n"),
                    b'\r' => out.extend_from_slice(b"\\r"),
                    0x1a => out.extend_from_slice(b"\\Z"),
                    b'\'' => out.extend_from_slice(b"\\'"),
                    b'"' => out.extend_from_slice(b"\\\""),
                    b'\\' => out.extend_from_slice(b"\\\\"),
                    _ => out.push(b),
                }
            }
        }
        EscapeMode::Quote => {
            for &b in data {
                if b == b'\'' {
                    out.push(b'\'');
                }
                out.push(b);
            }
        }
    }
}

/// Escape a string for use inside a single-quoted literal (quotes not added).
pub fn escape_str(s: &str, mode: EscapeMode) -> String {
    let mut out = Vec::with_capacity(s.len() + 8);
    escape_bytes_into(&mut out, s.as_bytes(), mode);
    // Only ASCII bytes are inserted or doubled, so UTF-8 stays valid
    String::from_utf8(out).unwrap_or_default()
}

/// Render a value as a SQL literal.
///
/// Bytes are written as `_binary'...'` so they are never reinterpreted in the
/// connection charset. Non-finite doubles have no literal form.
pub fn write_literal(out: &mut Vec<u8>, value: &Value, mode: EscapeMode) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"NULL"),
        Value::Int(v) => out.extend_from_slice(v.to_string().as_bytes()),
        Value::UInt(v) => out.extend_from_slice(v.to_string().as_bytes()),
        Value::Double(v) => {
            if !v.is_finite() {
                return Err(Error::Type(TypeError {
                    expected: "finite DOUBLE",
                    actual: v.to_string(),
                    column: None,
                }));
            }
            out.extend_from_slice(format!("{v:?}").as_bytes());
        }
        Value::Text(s) => {
            out.push(b'\'');
            escape_bytes_into(out, s.as_bytes(), mode);
            out.push(b'\'');
        }
        Value::Bytes(b) => {
            out.extend_from_slice(b"_binary'");
            escape_bytes_into(out, b, mode);
            out.push(b'\'');
        }
        Value::Temporal(t) => {
            out.push(b'\'');
            out.extend_from_slice(t.to_string().as_bytes());
            out.push(b'\'');
        }
    }
    Ok(())
}

/// Replace `?` placeholders with escaped literals.
///
/// Placeholders inside quoted strings, backquoted identifiers and comments
/// are left alone. The number of placeholders must match `params`.
pub fn interpolate(sql: &str, params: &[Value], mode: EscapeMode) -> Result<Vec<u8>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::with_capacity(sql.len() + params.len() * 16);
    let mut next = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'?' => {
                let value = params.get(next).ok_or_else(|| placeholder_mismatch(params.len()))?;
                write_literal(&mut out, value, mode)?;
                next += 1;
                i += 1;
            }
            b'\'' | b'"' | b'`' => {
                let end = skip_quoted(bytes, i, mode);
                out.extend_from_slice(&bytes[i..end]);
                i = end;
            }
            b'#' => {
                let end = skip_line(bytes, i);
                out.extend_from_slice(&bytes[i..end]);
                i = end;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-')
                && bytes.get(i + 2).is_none_or(|c| c.is_ascii_whitespace()) =>
            {
                let end = skip_line(bytes, i);
                out.extend_from_slice(&bytes[i..end]);
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = find(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2);
                out.extend_from_slice(&bytes[i..end]);
                i = end;
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }

    if next != params.len() {
        return Err(placeholder_mismatch(params.len()));
    }
    Ok(out)
}

fn placeholder_mismatch(params: usize) -> Error {
    Error::usage(format!(
        "placeholder count does not match the {params} supplied parameters"
    ))
}

/// Index just past the closing quote of the literal starting at `start`.
fn skip_quoted(bytes: &[u8], start: usize, mode: EscapeMode) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && quote != b'`' && mode == EscapeMode::Backslash {
            i += 2;
            continue;
        }
        if b == quote {
            // doubled quote stays inside the literal
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| start + p + 1)
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}
