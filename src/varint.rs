//! QUIC variable-length integers (RFC 9000 section 16).
//!
//! The length of the encoding is stored in the top two bits of the first
//! byte, so the value space shrinks as the encoding grows: 1 byte covers 6
//! bits, 2 bytes cover 14 bits, 4 bytes cover 30 bits, 8 bytes cover 62 bits.

use bytes::{Buf, BufMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const MAX_VARINT: u64 = (1 << 62) - 1;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("varint unexpectedly ended")]
pub struct VarIntUnexpectedEnd;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: VarInt = VarInt(MAX_VARINT);

    pub const fn from_u32(v: u32) -> Self {
        VarInt(v as u64)
    }

    /// Returns `None` if `v` doesn't fit in 62 bits.
    pub fn try_from_u64(v: u64) -> Option<Self> {
        (v <= MAX_VARINT).then_some(VarInt(v))
    }

    pub const fn into_inner(self) -> u64 {
        self.0
    }

    fn encoded_len(&self) -> usize {
        match self.0 {
            0..=0x3f => 1,
            0x40..=0x3fff => 2,
            0x4000..=0x3fff_ffff => 4,
            _ => 8,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let len = self.encoded_len();
        let tag = match len {
            1 => 0b00,
            2 => 0b01,
            4 => 0b10,
            _ => 0b11,
        };

        let mut tmp = [0u8; 8];
        tmp[8 - len..].copy_from_slice(&self.0.to_be_bytes()[8 - len..]);
        tmp[8 - len] |= tag << 6;
        buf.put_slice(&tmp[8 - len..]);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, VarIntUnexpectedEnd> {
        if !buf.has_remaining() {
            return Err(VarIntUnexpectedEnd);
        }

        let first = buf.chunk()[0];
        let len = 1 << (first >> 6);
        if buf.remaining() < len {
            return Err(VarIntUnexpectedEnd);
        }

        let mut tmp = [0u8; 8];
        buf.copy_to_slice(&mut tmp[8 - len..]);
        tmp[8 - len] &= 0x3f;

        Ok(VarInt(u64::from_be_bytes(tmp)))
    }

    /// Decode from an async stream, reading exactly one byte at a time so
    /// the length prefix can be discovered before the rest is pulled.
    ///
    /// This mirrors the restartable, chunk-boundary-safe parsing spec.md
    /// requires of the frame parser: every varint read goes through this
    /// byte-by-byte path regardless of the transport (stream or datagram).
    pub async fn read<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Self> {
        let first = stream.read_u8().await?;
        let len = 1usize << (first >> 6);

        let mut tmp = [0u8; 8];
        tmp[8 - len] = first & 0x3f;
        if len > 1 {
            stream.read_exact(&mut tmp[9 - len..]).await?;
        }

        Ok(VarInt(u64::from_be_bytes(tmp)))
    }
}

impl From<VarInt> for u64 {
    fn from(v: VarInt) -> u64 {
        v.0
    }
}

impl TryFrom<u64> for VarInt {
    type Error = VarIntUnexpectedEnd;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        VarInt::try_from_u64(v).ok_or(VarIntUnexpectedEnd)
    }
}

impl std::fmt::Debug for VarInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A byte-at-a-time varint reader that can be fed chunks as they arrive off
/// the wire, restarting cleanly across chunk boundaries.
///
/// Grounded on spec.md section 4.2: "All varints must be read byte-by-byte
/// across network chunk boundaries; the parser is restartable."
#[derive(Default)]
pub struct VarIntReader {
    staging: [u8; 8],
    len: usize,
    filled: usize,
}

impl VarIntReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns `Some(value)` once the varint is complete,
    /// consuming the reader's internal state for the next call.
    pub fn push(&mut self, byte: u8) -> Option<VarInt> {
        if self.filled == 0 {
            self.len = 1 << (byte >> 6);
            self.staging = [0u8; 8];
            self.staging[8 - self.len] = byte & 0x3f;
            self.filled = 1;
        } else {
            self.staging[8 - self.len + self.filled] = byte;
            self.filled += 1;
        }

        if self.filled == self.len {
            let value = u64::from_be_bytes(self.staging);
            self.filled = 0;
            Some(VarInt(value))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(v: u64) {
        let var = VarInt::try_from_u64(v).unwrap();
        let mut buf = Vec::new();
        var.encode(&mut buf);

        let mut cursor = Cursor::new(&buf);
        let decoded = VarInt::decode(&mut cursor).unwrap();
        assert_eq!(decoded.into_inner(), v);
    }

    #[test]
    fn roundtrip_boundaries() {
        for v in [
            0,
            1,
            0x3f,
            0x40,
            0x3fff,
            0x4000,
            0x3fff_ffff,
            0x4000_0000,
            MAX_VARINT,
        ] {
            roundtrip(v);
        }
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(VarInt::try_from_u64(MAX_VARINT + 1).is_none());
    }

    #[test]
    fn byte_at_a_time_matches_bulk_decode() {
        for v in [0u64, 300, 1_000_000, MAX_VARINT] {
            let var = VarInt::try_from_u64(v).unwrap();
            let mut buf = Vec::new();
            var.encode(&mut buf);

            let mut reader = VarIntReader::new();
            let mut result = None;
            for &byte in &buf {
                if let Some(value) = reader.push(byte) {
                    result = Some(value);
                }
            }

            assert_eq!(result.unwrap().into_inner(), v);
        }
    }

    #[tokio::test]
    async fn async_read_matches_sync_decode() {
        for v in [0u64, 1, 16384, MAX_VARINT] {
            let var = VarInt::try_from_u64(v).unwrap();
            let mut buf = Vec::new();
            var.encode(&mut buf);

            let mut cursor = Cursor::new(buf);
            let decoded = VarInt::read(&mut cursor).await.unwrap();
            assert_eq!(decoded.into_inner(), v);
        }
    }
}
