//! The `Value` sum type, text-form escaping, and type-keyed text decoding
//! (spec §4.6, §9 Design Notes, component C6).

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::column::FieldDescriptor;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

/// A dynamically typed MySQL value. `Seq`/`Map` exist for composing bound
/// parameters from structured data (e.g. a JSON-ish value bound into a
/// query via `escape`); rows never decode into them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Duration(chrono::Duration),
    Decimal(Decimal),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Render this value as it should appear inline in a SQL statement,
    /// escaping per spec §4.6: NUL/`\`/LF/CR/Ctrl-Z/`"`/`'` are
    /// backslash-escaped unless `no_backslash_escapes` is set, in which case
    /// only quoting via doubled quote characters is used.
    pub fn escape(&self, no_backslash_escapes: bool) -> Result<String> {
        match self {
            Value::Null => Ok("NULL".to_string()),
            Value::Bool(b) => Ok(if *b { "1".to_string() } else { "0".to_string() }),
            Value::Int(i) => Ok(i.to_string()),
            Value::UInt(u) => Ok(u.to_string()),
            Value::Float(f) => {
                if f.is_nan() || f.is_infinite() {
                    return Err(Error::ProgrammingError(
                        "cannot bind NaN/Infinity as a SQL float literal".to_string(),
                    ));
                }
                let rendered = f.to_string();
                // `f64::to_string` renders whole numbers like `1.0` as `"1"`,
                // which SQL parses as an integer literal, not a float one.
                // Appending `e0` keeps the literal's type repr-equivalent.
                if rendered.contains(['e', 'E', '.']) {
                    Ok(rendered)
                } else {
                    Ok(format!("{rendered}e0"))
                }
            }
            Value::Str(s) => quote_text(s.as_bytes(), no_backslash_escapes, false),
            Value::Bytes(b) => quote_text(b, no_backslash_escapes, true),
            Value::Date(d) => Ok(format!("'{}'", d.format("%Y-%m-%d"))),
            Value::DateTime(dt) => Ok(format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f"))),
            Value::Time(t) => Ok(format!("'{}'", t.format("%H:%M:%S%.f"))),
            Value::Duration(dur) => Ok(format!("'{}'", format_duration(*dur))),
            Value::Decimal(d) => Ok(d.to_string()),
            Value::Seq(items) => {
                let parts: Result<Vec<String>> =
                    items.iter().map(|v| v.escape(no_backslash_escapes)).collect();
                Ok(parts?.join(","))
            }
            Value::Map(_) => Err(Error::ProgrammingError(
                "a map value cannot be escaped as a single SQL literal".to_string(),
            )),
        }
    }

    /// Decode a text-protocol field (spec §4.5/§4.6) keyed by its column
    /// type. `None` bytes (the lenenc-NULL marker) decode to `Value::Null`.
    pub fn decode_text(field: &FieldDescriptor, bytes: Option<&[u8]>) -> Result<Self> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        let text = || String::from_utf8_lossy(bytes).to_string();

        use ColumnType::*;
        Ok(match field.column_type {
            MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_LONG | MYSQL_TYPE_INT24
            | MYSQL_TYPE_LONGLONG | MYSQL_TYPE_YEAR => {
                let s = text();
                if field.flags.contains(crate::constant::ColumnFlags::UNSIGNED_FLAG) {
                    Value::UInt(s.parse().map_err(|_| decode_err(&s, "integer"))?)
                } else {
                    Value::Int(s.parse().map_err(|_| decode_err(&s, "integer"))?)
                }
            }
            MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => {
                let s = text();
                Value::Float(s.parse().map_err(|_| decode_err(&s, "float"))?)
            }
            MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL => {
                let s = text();
                Value::Decimal(Decimal::from_str(&s).map_err(|_| decode_err(&s, "decimal"))?)
            }
            MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE => {
                let s = text();
                Value::Date(NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| decode_err(&s, "date"))?)
            }
            MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 | MYSQL_TYPE_TIMESTAMP
            | MYSQL_TYPE_TIMESTAMP2 => {
                let s = text();
                Value::DateTime(parse_datetime(&s)?)
            }
            MYSQL_TYPE_TIME | MYSQL_TYPE_TIME2 => {
                let s = text();
                Value::Duration(parse_time_duration(&s)?)
            }
            MYSQL_TYPE_NULL => Value::Null,
            // JSON is always sent as connection-encoding text (it has no
            // binary-vs-text ambiguity at the protocol level, regardless of
            // the charset/binary-flag it's tagged with).
            MYSQL_TYPE_JSON => Value::Str(text()),
            // BLOB/VARCHAR/STRING/BIT/GEOMETRY/etc: binary passthrough when
            // the column's charset is 63 (binary), UTF-8 text otherwise.
            _ => {
                if field.charset == 63 {
                    Value::Bytes(bytes.to_vec())
                } else {
                    Value::Str(text())
                }
            }
        })
    }
}

fn decode_err(text: &str, kind: &str) -> Error {
    Error::DataError(format!("cannot decode {text:?} as {kind}"))
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    // A zero date (`0000-00-00 00:00:00`) is valid MySQL but not valid
    // chrono; callers needing it should query with NO_ZERO_DATE disabled
    // and expect this error otherwise.
    Err(decode_err(s, "datetime"))
}

fn parse_time_duration(s: &str) -> Result<chrono::Duration> {
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (main, frac) = s.split_once('.').unwrap_or((s, "0"));
    let parts: Vec<&str> = main.split(':').collect();
    if parts.len() != 3 {
        return Err(decode_err(s, "time"));
    }
    let hours: i64 = parts[0].parse().map_err(|_| decode_err(s, "time"))?;
    let minutes: i64 = parts[1].parse().map_err(|_| decode_err(s, "time"))?;
    let seconds: i64 = parts[2].parse().map_err(|_| decode_err(s, "time"))?;
    let micros: i64 = format!("{frac:0<6}")[..6].parse().map_err(|_| decode_err(s, "time"))?;

    let mut duration = chrono::Duration::hours(hours)
        + chrono::Duration::minutes(minutes)
        + chrono::Duration::seconds(seconds)
        + chrono::Duration::microseconds(micros);
    if neg {
        duration = -duration;
    }
    Ok(duration)
}

fn format_duration(d: chrono::Duration) -> String {
    let total_secs = d.num_seconds();
    let sign = if total_secs < 0 { "-" } else { "" };
    let total_secs = total_secs.abs();
    format!(
        "{sign}{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60
    )
}

/// Quote and escape a text/binary value per spec §4.6. Binary values use the
/// `_binary'...'` introducer so the server treats the literal as bytes, not
/// as connection-encoded text.
/// Builds the literal as raw bytes (never reinterpreting a byte as a
/// standalone `char`, which would split multi-byte UTF-8 sequences in
/// `Value::Str` and corrupt arbitrary binary in `Value::Bytes`) and only
/// converts to `String` once, at the end.
fn quote_text(bytes: &[u8], no_backslash_escapes: bool, binary: bool) -> Result<String> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    if binary {
        out.extend_from_slice(b"_binary");
    }
    out.push(b'\'');
    for &b in bytes {
        if no_backslash_escapes {
            match b {
                b'\'' => out.extend_from_slice(b"''"),
                _ => out.push(b),
            }
        } else {
            match b {
                0 => out.extend_from_slice(b"\\0"),
                b'\\' => out.extend_from_slice(b"\\\\"),
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                0x1a => out.extend_from_slice(b"\\Z"),
                b'\'' => out.extend_from_slice(b"\\'"),
                b'"' => out.extend_from_slice(b"\\\""),
                _ => out.push(b),
            }
        }
    }
    out.push(b'\'');

    match String::from_utf8(out) {
        Ok(s) => Ok(s),
        // Arbitrary binary payload (`Value::Bytes`) with no valid UTF-8
        // interpretation. The literal is destined for the wire as bytes
        // (`dispatch_command` sends `sql.as_bytes()`), never read back as
        // text, so holding it in a `String` is a safe representation choice
        // even though the byte content isn't valid UTF-8.
        Err(e) => Ok(unsafe { String::from_utf8_unchecked(e.into_bytes()) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_control_characters() {
        let v = Value::Str("a'b\0c\nd".to_string());
        assert_eq!(v.escape(false).unwrap(), "'a\\'b\\0c\\nd'");
    }

    #[test]
    fn no_backslash_escapes_doubles_quotes_only() {
        let v = Value::Str("a'b".to_string());
        assert_eq!(v.escape(true).unwrap(), "'a''b'");
    }

    #[test]
    fn escaping_preserves_multi_byte_utf8_text() {
        let v = Value::Str("café\u{1F600}".to_string());
        assert_eq!(v.escape(false).unwrap(), "'café\u{1F600}'");
    }

    #[test]
    fn bytes_use_binary_introducer() {
        let v = Value::Bytes(vec![0xDE, 0xAD]);
        let escaped = v.escape(false).unwrap();
        assert!(escaped.starts_with("_binary'"));
    }

    #[test]
    fn float_rejects_nan_and_infinity() {
        assert!(Value::Float(f64::NAN).escape(false).is_err());
        assert!(Value::Float(f64::INFINITY).escape(false).is_err());
    }

    #[test]
    fn null_escapes_to_null_literal() {
        assert_eq!(Value::Null.escape(false).unwrap(), "NULL");
    }

    #[test]
    fn time_duration_roundtrip() {
        let d = parse_time_duration("-01:02:03").unwrap();
        assert_eq!(format_duration(d), "-01:02:03");
    }
}
