//! SQLite record (row payload) encoding and decoding.
//!
//! A record is a header followed by a body. The header starts with its own
//! size as a varint, then one serial type varint per column. The body packs
//! the column values back to back in header order.
//!
//! See: <https://www.sqlite.org/fileformat.html#record_format>

use crate::serial_type::{
    read_varint, serial_type_for_blob, serial_type_for_integer, serial_type_for_text,
    serial_type_len, varint_len, write_varint,
};
use crate::value::SqliteValue;

/// Parse a serialized record into its column values.
///
/// `data` must be the complete record (header + body). Returns `None` if
/// the record is malformed: a header size that disagrees with the data, a
/// reserved serial type, a truncated body, or text that is not UTF-8.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_record(data: &[u8]) -> Option<Vec<SqliteValue>> {
    if data.is_empty() {
        return Some(Vec::new());
    }

    let (header_size_u64, header_varint_len) = read_varint(data)?;
    let header_size = header_size_u64 as usize;
    if header_size > data.len() || header_size < header_varint_len {
        return None;
    }

    let mut serial_types = Vec::new();
    let mut offset = header_varint_len;
    while offset < header_size {
        let (serial_type, consumed) = read_varint(&data[offset..header_size])?;
        serial_types.push(serial_type);
        offset += consumed;
    }

    let mut values = Vec::with_capacity(serial_types.len());
    let mut body_offset = header_size;
    for &serial_type in &serial_types {
        let value_len = serial_type_len(serial_type)? as usize;
        let value_bytes = data.get(body_offset..body_offset + value_len)?;
        values.push(decode_value(serial_type, value_bytes)?);
        body_offset += value_len;
    }

    Some(values)
}

/// Serialize column values into the SQLite record format.
pub fn serialize_record(values: &[SqliteValue]) -> Vec<u8> {
    let serial_types: Vec<u64> = values.iter().map(serial_type_for_value).collect();

    let types_len: usize = serial_types.iter().map(|&st| varint_len(st)).sum();
    let header_size = header_size_for(types_len);

    #[allow(clippy::cast_possible_truncation)]
    let body_size: usize = serial_types
        .iter()
        .map(|&st| serial_type_len(st).unwrap_or(0) as usize)
        .sum();

    let mut buf = vec![0u8; header_size + body_size];
    let mut offset = write_varint(&mut buf, header_size as u64);
    for &st in &serial_types {
        offset += write_varint(&mut buf[offset..], st);
    }
    debug_assert_eq!(offset, header_size);

    for (value, &st) in values.iter().zip(&serial_types) {
        #[allow(clippy::cast_possible_truncation)]
        let value_len = serial_type_len(st).unwrap_or(0) as usize;
        encode_value(value, &mut buf[offset..offset + value_len]);
        offset += value_len;
    }

    buf
}

/// Total header size including the header-size varint itself.
///
/// Circular because the size varint is part of what it measures; iterate
/// until the guess is self-consistent.
fn header_size_for(types_len: usize) -> usize {
    let mut header_size = types_len + 1;
    loop {
        let needed = types_len + varint_len(header_size as u64);
        if needed <= header_size {
            return header_size;
        }
        header_size = needed;
    }
}

#[allow(clippy::cast_possible_truncation)]
fn serial_type_for_value(value: &SqliteValue) -> u64 {
    match value {
        SqliteValue::Null => 0,
        SqliteValue::Integer(i) => serial_type_for_integer(*i),
        // SQLite stores NaN as NULL.
        SqliteValue::Float(f) if f.is_nan() => 0,
        SqliteValue::Float(_) => 7,
        SqliteValue::Text(s) => serial_type_for_text(s.len() as u64),
        SqliteValue::Blob(b) => serial_type_for_blob(b.len() as u64),
    }
}

fn decode_value(serial_type: u64, bytes: &[u8]) -> Option<SqliteValue> {
    match serial_type {
        0 => Some(SqliteValue::Null),
        1..=6 => Some(SqliteValue::Integer(decode_signed_be(bytes))),
        7 => {
            let bits = u64::from_be_bytes(bytes.try_into().ok()?);
            let value = f64::from_bits(bits);
            if value.is_nan() {
                Some(SqliteValue::Null)
            } else {
                Some(SqliteValue::Float(value))
            }
        }
        8 => Some(SqliteValue::Integer(0)),
        9 => Some(SqliteValue::Integer(1)),
        10 | 11 => None,
        n if n % 2 == 0 => Some(SqliteValue::Blob(bytes.to_vec())),
        _ => {
            let s = std::str::from_utf8(bytes).ok()?;
            Some(SqliteValue::Text(s.to_owned()))
        }
    }
}

/// Decode a big-endian two's-complement integer of 1-8 bytes.
#[allow(clippy::cast_possible_wrap)]
fn decode_signed_be(bytes: &[u8]) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut value: u64 = if bytes[0] & 0x80 != 0 { u64::MAX } else { 0 };
    for &b in bytes {
        value = (value << 8) | u64::from(b);
    }
    value as i64
}

fn encode_value(value: &SqliteValue, buf: &mut [u8]) {
    match value {
        SqliteValue::Null => {}
        SqliteValue::Integer(i) => {
            // Serial types 8 and 9 carry no body bytes.
            if !buf.is_empty() {
                let be = i.to_be_bytes();
                buf.copy_from_slice(&be[8 - buf.len()..]);
            }
        }
        SqliteValue::Float(f) => {
            if !f.is_nan() {
                buf.copy_from_slice(&f.to_bits().to_be_bytes());
            }
        }
        SqliteValue::Text(s) => buf.copy_from_slice(s.as_bytes()),
        SqliteValue::Blob(b) => buf.copy_from_slice(b),
    }
}
