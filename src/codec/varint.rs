//! Compact variable-length integers
//!
//! Seven value bits per byte, least significant group first, high bit set on
//! every byte except the last.

use std::io::{self, Read, Write};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Append the encoding of `value` to `out`.
pub fn encode_varint(
    mut value: u64,
    out: &mut Vec<u8>,
) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Write the encoding of `value` to `writer`.
pub fn write_varint<W: Write + ?Sized>(
    writer: &mut W,
    value: u64,
) -> io::Result<()> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    encode_varint(value, &mut buf);
    writer.write_all(&buf)
}

/// Read one encoded integer from `reader`.
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let group = u64::from(byte[0] & 0x7F);
        if i == MAX_VARINT_LEN - 1 && group > 1 {
            break;
        }
        value |= group << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "variable-length integer overflows 64 bits",
    ))
}
