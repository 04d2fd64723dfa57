//! SQLite serial types and varint encoding.
//!
//! Each value in a record is preceded by a serial type (stored as a varint)
//! that gives the storage class and byte length of the data that follows:
//! 0 is NULL, 1-6 are big-endian signed integers of 1/2/3/4/6/8 bytes,
//! 7 is an IEEE 754 double, 8 and 9 are the constants 0 and 1, 10 and 11
//! are reserved, even types >= 12 are BLOBs of `(N-12)/2` bytes and odd
//! types >= 13 are TEXT of `(N-13)/2` bytes.

/// Compute the number of payload bytes for a given serial type.
///
/// Returns `None` for the reserved serial types (10, 11).
pub const fn serial_type_len(serial_type: u64) -> Option<u64> {
    match serial_type {
        0 | 8 | 9 => Some(0),
        1 => Some(1),
        2 => Some(2),
        3 => Some(3),
        4 => Some(4),
        5 => Some(6),
        6 | 7 => Some(8),
        10 | 11 => None, // reserved
        n if n % 2 == 0 => Some((n - 12) / 2),
        n => Some((n - 13) / 2),
    }
}

/// Compute the serial type for an integer, choosing the smallest encoding.
#[allow(clippy::cast_sign_loss)]
pub const fn serial_type_for_integer(value: i64) -> u64 {
    let magnitude = if value < 0 {
        !(value as u64)
    } else {
        value as u64
    };

    if magnitude <= 127 {
        if value == 0 {
            return 8;
        }
        if value == 1 {
            return 9;
        }
        1
    } else if magnitude <= 32_767 {
        2
    } else if magnitude <= 8_388_607 {
        3
    } else if magnitude <= 2_147_483_647 {
        4
    } else if magnitude <= 0x0000_7FFF_FFFF_FFFF {
        5
    } else {
        6
    }
}

/// Compute the serial type for a text value of `len` bytes.
pub const fn serial_type_for_text(len: u64) -> u64 {
    len * 2 + 13
}

/// Compute the serial type for a blob value of `len` bytes.
pub const fn serial_type_for_blob(len: u64) -> u64 {
    len * 2 + 12
}

/// Read a varint from a byte slice, returning `(value, bytes_consumed)`.
///
/// SQLite varints are 1-9 bytes, big-endian, 7 bits per byte with the high
/// bit as a continuation flag. The 9th byte, when present, contributes all
/// 8 of its bits.
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    if buf.is_empty() {
        return None;
    }

    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate().take(8) {
        if byte & 0x80 == 0 {
            value = (value << 7) | u64::from(byte);
            return Some((value, i + 1));
        }
        value = (value << 7) | u64::from(byte & 0x7F);
    }

    if buf.len() > 8 {
        value = (value << 8) | u64::from(buf[8]);
        Some((value, 9))
    } else {
        None
    }
}

/// Compute the number of bytes needed to encode `value` as a varint.
pub const fn varint_len(value: u64) -> usize {
    if value <= 0x7F {
        1
    } else if value <= 0x3FFF {
        2
    } else if value <= 0x001F_FFFF {
        3
    } else if value <= 0x0FFF_FFFF {
        4
    } else if value <= 0x07_FFFF_FFFF {
        5
    } else if value <= 0x03FF_FFFF_FFFF {
        6
    } else if value <= 0x01_FFFF_FFFF_FFFF {
        7
    } else if value <= 0xFF_FFFF_FFFF_FFFF {
        8
    } else {
        9
    }
}

/// Write a varint into `buf`, returning the number of bytes written.
///
/// The buffer must have at least `varint_len(value)` bytes available.
#[allow(clippy::cast_possible_truncation)]
pub fn write_varint(buf: &mut [u8], value: u64) -> usize {
    let len = varint_len(value);

    if len == 9 {
        let mut rest = value >> 8;
        for i in (0..8).rev() {
            buf[i] = (rest as u8 & 0x7F) | 0x80;
            rest >>= 7;
        }
        buf[8] = value as u8;
        return len;
    }

    let mut rest = value;
    for i in (0..len).rev() {
        if i == len - 1 {
            buf[i] = rest as u8 & 0x7F;
        } else {
            buf[i] = (rest as u8 & 0x7F) | 0x80;
        }
        rest >>= 7;
    }
    len
}
