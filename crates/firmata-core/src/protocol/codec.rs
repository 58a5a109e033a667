//! 7-bit payload packing and little-endian integer helpers.
//!
//! SysEx payloads may only carry bytes below 0x80, so multi-byte data is
//! split into (low 7 bits, high 7 bits) pairs on the wire.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("odd-length 14-bit payload: {len} bytes")]
    OddLength { len: usize },

    #[error("buffer too small: need {needed} bytes at offset {offset}, have {len}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        len: usize,
    },
}

/// Split each byte into two 7-bit groups: (b & 0x7F, (b >> 7) & 0x7F).
pub fn pack_14bit(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    for &b in data {
        out.push(b & 0x7F);
        out.push((b >> 7) & 0x7F);
    }
    out
}

/// Recombine (lo, hi) pairs into bytes: lo | (hi << 7).
///
/// The input length must be even; the upper bit of each reconstructed byte
/// comes from bit 0 of the hi group, so the result stays within one byte.
pub fn unpack_14bit(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.len() % 2 != 0 {
        return Err(CodecError::OddLength { len: data.len() });
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| pair[0] | (pair[1] << 7))
        .collect())
}

/// Recombine (lo, hi) pairs into 14-bit values: lo | (hi << 7).
///
/// Unlike [`unpack_14bit`] the full 14-bit range is preserved, which string
/// payloads need for code units above 0xFF.
pub fn unpack_14bit_wide(data: &[u8]) -> Result<Vec<u16>, CodecError> {
    if data.len() % 2 != 0 {
        return Err(CodecError::OddLength { len: data.len() });
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from(pair[0] & 0x7F) | (u16::from(pair[1] & 0x7F) << 7))
        .collect())
}

/// Read a little-endian u32 at `offset`.
pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32, CodecError> {
    check_bounds(data, offset, 4)?;
    let mut cursor = Cursor::new(&data[offset..]);
    Ok(cursor.read_u32::<LittleEndian>().expect("bounds checked"))
}

/// Read a little-endian i32 at `offset`.
pub fn read_i32_le(data: &[u8], offset: usize) -> Result<i32, CodecError> {
    check_bounds(data, offset, 4)?;
    let mut cursor = Cursor::new(&data[offset..]);
    Ok(cursor.read_i32::<LittleEndian>().expect("bounds checked"))
}

/// Append a little-endian u32.
pub fn write_u32_le(buf: &mut Vec<u8>, value: u32) {
    buf.write_u32::<LittleEndian>(value).expect("vec write");
}

/// Append a little-endian i32.
pub fn write_i32_le(buf: &mut Vec<u8>, value: i32) {
    buf.write_i32::<LittleEndian>(value).expect("vec write");
}

fn check_bounds(data: &[u8], offset: usize, needed: usize) -> Result<(), CodecError> {
    if data.len() < offset + needed {
        return Err(CodecError::OutOfBounds {
            offset,
            needed,
            len: data.len(),
        });
    }
    Ok(())
}
