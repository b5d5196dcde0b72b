//! Binary encoding of key tuples.
//!
//! Each column is written as a null marker byte followed by the value:
//!
//! ```text
//! int4   : 4 bytes big-endian
//! int8   : 8 bytes big-endian
//! float8 : 8 bytes big-endian IEEE-754 bits
//! text   : u32 big-endian length + UTF-8 bytes
//! ```
//!
//! The same bytes are stored in the sorted index and, base64-encoded, in the
//! `start`/`end` parameters of range fetch URLs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::cursor::ByteCursor;
use crate::datum::{DataType, Datum, SortKey, Tuple};
use crate::error::{Error, Result};

const NULL_MARKER: u8 = 1;
const VALUE_MARKER: u8 = 0;

/// Encode `tuple` against the key schema.
pub fn encode_tuple(keys: &[SortKey], tuple: &Tuple) -> Result<Vec<u8>> {
    if tuple.len() != keys.len() {
        return Err(Error::KeyEncoding(format!(
            "tuple has {} values but the key schema has {} columns",
            tuple.len(),
            keys.len()
        )));
    }

    let mut out = Vec::with_capacity(keys.len() * 9);
    for (key, datum) in keys.iter().zip(tuple.values()) {
        encode_datum(key, datum, &mut out)?;
    }
    Ok(out)
}

fn encode_datum(key: &SortKey, datum: &Datum, out: &mut Vec<u8>) -> Result<()> {
    match (key.data_type, datum) {
        (_, Datum::Null) => out.push(NULL_MARKER),
        (DataType::Int4, Datum::Int4(v)) => {
            out.push(VALUE_MARKER);
            out.extend_from_slice(&v.to_be_bytes());
        }
        (DataType::Int8, Datum::Int4(v)) => {
            out.push(VALUE_MARKER);
            out.extend_from_slice(&(*v as i64).to_be_bytes());
        }
        (DataType::Int8, Datum::Int8(v)) => {
            out.push(VALUE_MARKER);
            out.extend_from_slice(&v.to_be_bytes());
        }
        (DataType::Float8, Datum::Float8(v)) => {
            out.push(VALUE_MARKER);
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        (DataType::Text, Datum::Text(v)) => {
            let len = u32::try_from(v.len())
                .map_err(|_| Error::KeyEncoding(format!("text key too long: {}", v.len())))?;
            out.push(VALUE_MARKER);
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(v.as_bytes());
        }
        (expected, other) => {
            return Err(Error::KeyEncoding(format!(
                "column '{}' expects {:?}, got {}",
                key.column, expected, other
            )))
        }
    }
    Ok(())
}

/// Decode a tuple that was written by [`encode_tuple`] with the same schema.
pub fn decode_tuple(keys: &[SortKey], bytes: &[u8]) -> Result<Tuple> {
    let mut cur = ByteCursor::new(bytes);
    let tuple = read_tuple(keys, &mut cur)?;
    if !cur.is_empty() {
        return Err(Error::KeyEncoding(format!(
            "{} trailing bytes after key tuple",
            cur.remaining()
        )));
    }
    Ok(tuple)
}

/// Decode one tuple from the cursor, leaving it positioned after the tuple.
pub fn read_tuple(keys: &[SortKey], cur: &mut ByteCursor<'_>) -> Result<Tuple> {
    let mut values = Vec::with_capacity(keys.len());
    for key in keys {
        let datum = match cur.u8()? {
            NULL_MARKER => Datum::Null,
            VALUE_MARKER => match key.data_type {
                DataType::Int4 => Datum::Int4(cur.i32()?),
                DataType::Int8 => Datum::Int8(cur.i64()?),
                DataType::Float8 => Datum::Float8(f64::from_bits(cur.u64()?)),
                DataType::Text => {
                    let len = cur.u32()? as usize;
                    let raw = cur.take(len)?;
                    let text = std::str::from_utf8(raw).map_err(|e| {
                        Error::KeyEncoding(format!("column '{}' is not UTF-8: {}", key.column, e))
                    })?;
                    Datum::Text(text.to_string())
                }
            },
            other => {
                return Err(Error::KeyEncoding(format!(
                    "unknown null marker {} for column '{}'",
                    other, key.column
                )))
            }
        };
        values.push(datum);
    }
    Ok(Tuple::new(values))
}

/// Base64 form used in fetch URLs.
pub fn to_base64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn from_base64(text: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(text.trim_end_matches('='))
        .map_err(|e| Error::KeyEncoding(format!("invalid base64 key '{}': {}", text, e)))
}
