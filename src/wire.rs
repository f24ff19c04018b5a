//! HTTP/3 wire constants: frame types, unidirectional stream types, and the
//! application error codes the session engine raises.
//!
//! Grounded on `web-transport-proto/src/settings.rs` (the `Setting`/`Frame`
//! newtype-over-`VarInt` pattern) generalized to the frame and stream-type
//! surface spec.md section 6 enumerates.

use crate::varint::VarInt;
use bytes::{Buf, BufMut};

macro_rules! varint_newtype {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub VarInt);

        impl $name {
            pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, crate::varint::VarIntUnexpectedEnd> {
                Ok($name(VarInt::decode(buf)?))
            }

            pub fn encode<B: BufMut>(&self, buf: &mut B) {
                self.0.encode(buf)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

varint_newtype!(Frame);
varint_newtype!(StreamUni);

impl Frame {
    pub const DATA: Frame = Frame(VarInt::from_u32(0x0));
    pub const HEADERS: Frame = Frame(VarInt::from_u32(0x1));
    pub const SETTINGS: Frame = Frame(VarInt::from_u32(0x4));
    pub const WEBTRANSPORT: Frame = Frame(VarInt::from_u32(0x41));
}

impl StreamUni {
    pub const CONTROL: StreamUni = StreamUni(VarInt::from_u32(0x00));
    pub const PUSH: StreamUni = StreamUni(VarInt::from_u32(0x01));
    pub const QPACK_ENCODER: StreamUni = StreamUni(VarInt::from_u32(0x02));
    pub const QPACK_DECODER: StreamUni = StreamUni(VarInt::from_u32(0x03));
    pub const WEBTRANSPORT: StreamUni = StreamUni(VarInt::from_u32(0x54));
}

/// QUIC application error codes this endpoint ever raises, per spec.md
/// section 6 ("Error codes raised on the wire").
pub mod error_code {
    pub const H3_INTERNAL_ERROR: u64 = 0x102;
    pub const H3_STREAM_CREATION_ERROR: u64 = 0x103;
    pub const H3_FRAME_ERROR: u64 = 0x106;
    pub const H3_WEBTRANSPORT_BUFFERED_STREAM_REJECTED: u64 = 0x3994_bd84;
}

/// The fixed SETTINGS payload this endpoint advertises on its control
/// stream: QPACK dynamic table capacity 0 (we only use the static table)
/// plus the two WebTransport-enabling settings, matching the deprecated and
/// current draft so both old and new clients recognize support.
///
/// Grounded on `web-transport-proto::Settings::enable_webtransport`,
/// flattened to a constant byte string since this endpoint's settings never
/// change at runtime (spec.md: "The SETTINGS payload is the implementation's
/// constant default").
pub fn default_settings_payload() -> Vec<u8> {
    use crate::wire::setting::*;

    let mut payload = Vec::new();
    for (id, value) in [
        (QPACK_MAX_TABLE_CAPACITY, 0u32),
        (ENABLE_CONNECT_PROTOCOL, 1),
        (ENABLE_DATAGRAM, 1),
        (ENABLE_DATAGRAM_DEPRECATED, 1),
        (WEBTRANSPORT_MAX_SESSIONS, 1),
    ] {
        VarInt::from_u32(id).encode(&mut payload);
        VarInt::from_u32(value).encode(&mut payload);
    }
    payload
}

pub mod setting {
    pub const QPACK_MAX_TABLE_CAPACITY: u32 = 0x1;
    pub const ENABLE_CONNECT_PROTOCOL: u32 = 0x8;
    pub const ENABLE_DATAGRAM: u32 = 0x33;
    pub const ENABLE_DATAGRAM_DEPRECATED: u32 = 0xFFD277;
    pub const WEBTRANSPORT_MAX_SESSIONS: u32 = 0xc671706a;
}

/// Encode a HEADERS frame length prefix the way spec.md section 6 specifies:
/// a two-byte QUIC varint of the form `[0x40 | hi, lo]`, valid for lengths up
/// to 14 bits (16383 bytes), which is always enough for this endpoint's
/// small header blocks.
pub fn encode_headers_length_14(len: u16, buf: &mut [u8; 2]) {
    debug_assert!(len < 0x4000, "header block too large for 14-bit varint");
    buf[0] = 0x40 | (len >> 8) as u8;
    buf[1] = (len & 0xff) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn frame_constants_roundtrip() {
        for frame in [Frame::DATA, Frame::HEADERS, Frame::SETTINGS, Frame::WEBTRANSPORT] {
            let mut buf = BytesMut::new();
            frame.encode(&mut buf);
            let decoded = Frame::decode(&mut buf).unwrap();
            assert_eq!(decoded.0.into_inner(), frame.0.into_inner());
        }
    }

    #[test]
    fn headers_length_prefix_matches_varint_two_byte_form() {
        let mut buf = [0u8; 2];
        encode_headers_length_14(1234, &mut buf);

        let mut cursor: &[u8] = &buf;
        let decoded = VarInt::decode(&mut cursor).unwrap();
        assert_eq!(decoded.into_inner(), 1234);
    }

    #[test]
    fn default_settings_enable_webtransport_signals() {
        let payload = default_settings_payload();
        let mut cursor: &[u8] = &payload;

        let mut seen_datagram = false;
        let mut seen_sessions = false;
        while cursor.has_remaining() {
            let id = VarInt::decode(&mut cursor).unwrap().into_inner();
            let value = VarInt::decode(&mut cursor).unwrap().into_inner();
            if id == setting::ENABLE_DATAGRAM as u64 {
                seen_datagram = value == 1;
            }
            if id == setting::WEBTRANSPORT_MAX_SESSIONS as u64 {
                seen_sessions = value >= 1;
            }
        }

        assert!(seen_datagram);
        assert!(seen_sessions);
    }
}
