//! Byte-order helpers for fixed-width fields in the SQLite file formats.
//!
//! Database and WAL file fields are big-endian on disk.

/// Read a big-endian `u16` from the start of `buf`.
///
/// Returns `None` if fewer than 2 bytes are available.
#[must_use]
pub fn read_u16_be(buf: &[u8]) -> Option<u16> {
    let bytes: [u8; 2] = buf.get(..2)?.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}

/// Read a big-endian `u32` from the start of `buf`.
///
/// Returns `None` if fewer than 4 bytes are available.
#[must_use]
pub fn read_u32_be(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_respect_byte_order() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(read_u16_be(&buf), Some(0x0102));
        assert_eq!(read_u32_be(&buf), Some(0x0102_0304));
    }

    #[test]
    fn short_buffers_return_none() {
        assert_eq!(read_u16_be(&[0x01]), None);
        assert_eq!(read_u32_be(&[0x01, 0x02, 0x03]), None);
    }
}
