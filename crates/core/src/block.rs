//! Minimal NDN-TLV element

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("empty buffer")]
    Empty,

    #[error("truncated var-number at offset {0}")]
    TruncatedVarNumber(usize),

    #[error("declared length {declared} exceeds remaining {remaining} bytes")]
    TruncatedValue { declared: u64, remaining: usize },

    #[error("{0} trailing bytes after element")]
    TrailingBytes(usize),
}

/// One TLV element: type, length, value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    tlv_type: u64,
    value: Bytes,
}

impl Block {
    pub fn new(tlv_type: u64, value: impl Into<Bytes>) -> Self {
        Self {
            tlv_type,
            value: value.into(),
        }
    }

    pub fn tlv_type(&self) -> u64 {
        self.tlv_type
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn encoded_len(&self) -> usize {
        var_number_len(self.tlv_type) + var_number_len(self.value.len() as u64) + self.value.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        put_var_number(&mut buf, self.tlv_type);
        put_var_number(&mut buf, self.value.len() as u64);
        buf.put_slice(&self.value);
        buf.freeze()
    }

    /// Decodes exactly one element spanning the whole buffer.
    pub fn decode(wire: &[u8]) -> Result<Self, BlockError> {
        let (block, used) = Self::decode_prefix(wire)?;
        if used != wire.len() {
            return Err(BlockError::TrailingBytes(wire.len() - used));
        }
        Ok(block)
    }

    /// Decodes the first element and returns the number of bytes it used.
    pub fn decode_prefix(wire: &[u8]) -> Result<(Self, usize), BlockError> {
        if wire.is_empty() {
            return Err(BlockError::Empty);
        }
        let (tlv_type, type_len) = read_var_number(wire, 0)?;
        let (length, length_len) = read_var_number(wire, type_len)?;
        let start = type_len + length_len;
        let remaining = wire.len() - start;
        if length > remaining as u64 {
            return Err(BlockError::TruncatedValue {
                declared: length,
                remaining,
            });
        }
        let end = start + length as usize;
        Ok((
            Self {
                tlv_type,
                value: Bytes::copy_from_slice(&wire[start..end]),
            },
            end,
        ))
    }
}

pub fn var_number_len(n: u64) -> usize {
    match n {
        0..=252 => 1,
        253..=0xFFFF => 3,
        0x1_0000..=0xFFFF_FFFF => 5,
        _ => 9,
    }
}

fn put_var_number(buf: &mut BytesMut, n: u64) {
    match n {
        0..=252 => buf.put_u8(n as u8),
        253..=0xFFFF => {
            buf.put_u8(253);
            buf.put_u16(n as u16);
        }
        0x1_0000..=0xFFFF_FFFF => {
            buf.put_u8(254);
            buf.put_u32(n as u32);
        }
        _ => {
            buf.put_u8(255);
            buf.put_u64(n);
        }
    }
}

fn read_var_number(wire: &[u8], offset: usize) -> Result<(u64, usize), BlockError> {
    let first = *wire
        .get(offset)
        .ok_or(BlockError::TruncatedVarNumber(offset))?;
    let width = match first {
        0..=252 => return Ok((first as u64, 1)),
        253 => 2,
        254 => 4,
        255 => 8,
    };
    let bytes = wire
        .get(offset + 1..offset + 1 + width)
        .ok_or(BlockError::TruncatedVarNumber(offset))?;
    let value = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    Ok((value, 1 + width))
}
