//! Restartable frame parsers for the two stream shapes HTTP/3 delivers data
//! on (spec.md section 4.2): a unidirectional stream's single leading
//! stream-type varint (`parse_unidir_prefix`), and a bidirectional
//! request/response stream's sequence of length-prefixed frames
//! (`parse_data_stream`). Every varint goes through
//! [`crate::varint::VarIntReader`] one byte at a time so a read can suspend
//! and resume cleanly across chunk boundaries, the same restartability
//! requirement spec.md section 4.2 states explicitly; non-varint payload
//! bytes (DATA, raw WebTransport passthrough) are copied in bulk since only
//! varints need byte-level granularity.
//!
//! Grounded on `h3zero_parse_incoming_header`/`h3zero_server_parse_stream`'s
//! state-machine shape in `original_source/picohttp/h3zero_common.c`
//! (resumable parsing driven by a `parse_string_t` cursor that survives
//! across `stream_data` callback invocations).

use crate::headers::{HeaderError, RequestHeader};
use crate::varint::VarIntReader;
use crate::wire::{error_code, Frame, StreamUni};

/// Stream-type outcomes for a peer-initiated unidirectional stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnidirStreamKind {
    Control,
    QpackEncoder,
    QpackDecoder,
    WebTransport { session_id: u64 },
}

/// One step of unidirectional-stream prefix parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnidirEvent {
    /// The stream type has been identified.
    Resolved(UnidirStreamKind),
    /// Raw bytes to forward as-is, only ever produced after
    /// `Resolved(WebTransport { .. })` for the remainder of the stream.
    Data(Vec<u8>),
    /// The stream type is disallowed or unrecognized; reset with this code.
    Reject(u64),
}

enum UnidirStage {
    Type(VarIntReader),
    SessionId(VarIntReader),
    Passthrough,
    Ignore,
    Done,
}

/// `parse_unidir_prefix` (spec.md section 4.2): reads the leading stream-type
/// varint of a peer-initiated unidirectional stream, and for the
/// WebTransport type (`0x54`) the control-stream-id varint that follows it.
pub struct UnidirPrefixParser {
    stage: UnidirStage,
}

impl Default for UnidirPrefixParser {
    fn default() -> Self {
        Self::new()
    }
}

impl UnidirPrefixParser {
    pub fn new() -> Self {
        Self { stage: UnidirStage::Type(VarIntReader::new()) }
    }

    /// Feeds `data` through the parser, returning every event produced. A
    /// stream type resolved as Control/QPACK has no further structure this
    /// session engine cares about, so subsequent bytes are silently dropped
    /// (`Ignore`); a WebTransport stream transitions to raw passthrough.
    pub fn feed(&mut self, data: &[u8]) -> Vec<UnidirEvent> {
        let mut events = Vec::new();
        let mut i = 0;

        while i < data.len() {
            match &mut self.stage {
                UnidirStage::Type(reader) => {
                    let byte = data[i];
                    i += 1;
                    if let Some(value) = reader.push(byte) {
                        match value.into_inner() {
                            v if v == StreamUni::CONTROL.0.into_inner() => {
                                self.stage = UnidirStage::Ignore;
                                events.push(UnidirEvent::Resolved(UnidirStreamKind::Control));
                            }
                            v if v == StreamUni::PUSH.0.into_inner() => {
                                self.stage = UnidirStage::Done;
                                events.push(UnidirEvent::Reject(error_code::H3_STREAM_CREATION_ERROR));
                                return events;
                            }
                            v if v == StreamUni::QPACK_ENCODER.0.into_inner() => {
                                self.stage = UnidirStage::Ignore;
                                events.push(UnidirEvent::Resolved(UnidirStreamKind::QpackEncoder));
                            }
                            v if v == StreamUni::QPACK_DECODER.0.into_inner() => {
                                self.stage = UnidirStage::Ignore;
                                events.push(UnidirEvent::Resolved(UnidirStreamKind::QpackDecoder));
                            }
                            v if v == StreamUni::WEBTRANSPORT.0.into_inner() => {
                                self.stage = UnidirStage::SessionId(VarIntReader::new());
                            }
                            _ => {
                                self.stage = UnidirStage::Done;
                                events.push(UnidirEvent::Reject(error_code::H3_FRAME_ERROR));
                                return events;
                            }
                        }
                    }
                }
                UnidirStage::SessionId(reader) => {
                    let byte = data[i];
                    i += 1;
                    if let Some(value) = reader.push(byte) {
                        events.push(UnidirEvent::Resolved(UnidirStreamKind::WebTransport {
                            session_id: value.into_inner(),
                        }));
                        self.stage = UnidirStage::Passthrough;
                    }
                }
                UnidirStage::Passthrough => {
                    events.push(UnidirEvent::Data(data[i..].to_vec()));
                    i = data.len();
                }
                UnidirStage::Ignore | UnidirStage::Done => {
                    i = data.len();
                }
            }
        }

        events
    }
}

/// One step of bidirectional request/response stream parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataStreamEvent {
    Header(RequestHeader),
    DataChunk(Vec<u8>),
    /// A `WEBTRANSPORT` frame's session-id varint has been read; every byte
    /// from here on (in this call and all future ones) is raw tunnel data.
    WebTransportSession(u64),
    ProtocolError(u64),
}

enum DataStage {
    FrameType(VarIntReader),
    FrameLength { frame_type: u64, reader: VarIntReader },
    HeadersPayload { remaining: usize, buf: Vec<u8> },
    DataPayload { remaining: u64 },
    WebTransportSessionId(VarIntReader),
    Passthrough,
    Failed,
}

/// `parse_data_stream` (spec.md section 4.2): the request-control-stream
/// state machine of frame-type varint -> frame-length varint -> payload,
/// specialized for the two frame types this endpoint's requests ever carry
/// (`HEADERS`, `DATA`) plus the `WEBTRANSPORT` frame that hands a bidir
/// stream off to raw tunnel semantics.
pub struct DataStreamParser {
    stage: DataStage,
}

impl Default for DataStreamParser {
    fn default() -> Self {
        Self { stage: DataStage::FrameType(VarIntReader::new()) }
    }
}

impl DataStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) -> Vec<DataStreamEvent> {
        let mut events = Vec::new();
        let mut i = 0;

        while i < data.len() {
            match &mut self.stage {
                DataStage::FrameType(reader) => {
                    let byte = data[i];
                    i += 1;
                    if let Some(value) = reader.push(byte) {
                        let frame_type = value.into_inner();
                        if frame_type == Frame::WEBTRANSPORT.0.into_inner() {
                            // The WEBTRANSPORT stream frame carries no length
                            // field: the session-id varint follows the frame
                            // type directly and the rest of the stream is raw
                            // tunnel data through to its end.
                            self.stage = DataStage::WebTransportSessionId(VarIntReader::new());
                        } else {
                            self.stage = DataStage::FrameLength { frame_type, reader: VarIntReader::new() };
                        }
                    }
                }
                DataStage::FrameLength { frame_type, reader } => {
                    let byte = data[i];
                    i += 1;
                    if let Some(value) = reader.push(byte) {
                        let frame_type = *frame_type;
                        let len = value.into_inner();
                        if frame_type == Frame::HEADERS.0.into_inner() {
                            self.stage =
                                DataStage::HeadersPayload { remaining: len as usize, buf: Vec::with_capacity(len as usize) };
                        } else if frame_type == Frame::DATA.0.into_inner() {
                            self.stage = DataStage::DataPayload { remaining: len };
                        } else {
                            self.stage = DataStage::Failed;
                            events.push(DataStreamEvent::ProtocolError(error_code::H3_FRAME_ERROR));
                            return events;
                        }
                    }
                }
                DataStage::HeadersPayload { remaining, buf } => {
                    let take = (*remaining).min(data.len() - i);
                    buf.extend_from_slice(&data[i..i + take]);
                    i += take;
                    *remaining -= take;
                    if *remaining == 0 {
                        match RequestHeader::decode(&mut &buf[..]) {
                            Ok(header) => events.push(DataStreamEvent::Header(header)),
                            Err(HeaderError::UnexpectedEnd) => {
                                // header block shorter than the declared frame
                                // length can't happen (remaining==0 means we
                                // consumed exactly that many bytes); any
                                // decode failure here is a malformed header.
                                events.push(DataStreamEvent::ProtocolError(error_code::H3_FRAME_ERROR));
                                self.stage = DataStage::Failed;
                                return events;
                            }
                            Err(_) => {
                                events.push(DataStreamEvent::ProtocolError(error_code::H3_FRAME_ERROR));
                                self.stage = DataStage::Failed;
                                return events;
                            }
                        }
                        self.stage = DataStage::FrameType(VarIntReader::new());
                    }
                }
                DataStage::DataPayload { remaining } => {
                    let take = (*remaining as usize).min(data.len() - i);
                    if take > 0 {
                        events.push(DataStreamEvent::DataChunk(data[i..i + take].to_vec()));
                    }
                    i += take;
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        self.stage = DataStage::FrameType(VarIntReader::new());
                    }
                }
                DataStage::WebTransportSessionId(reader) => {
                    let byte = data[i];
                    i += 1;
                    if let Some(value) = reader.push(byte) {
                        events.push(DataStreamEvent::WebTransportSession(value.into_inner()));
                        self.stage = DataStage::Passthrough;
                    }
                }
                DataStage::Passthrough => {
                    events.push(DataStreamEvent::DataChunk(data[i..].to_vec()));
                    i = data.len();
                }
                DataStage::Failed => {
                    i = data.len();
                }
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Method;

    #[test]
    fn unidir_control_stream_resolves_and_then_ignores() {
        let mut parser = UnidirPrefixParser::new();
        let events = parser.feed(&[0x00]);
        assert_eq!(events, vec![UnidirEvent::Resolved(UnidirStreamKind::Control)]);
        assert!(parser.feed(b"whatever").is_empty());
    }

    #[test]
    fn unidir_push_stream_is_rejected() {
        let mut parser = UnidirPrefixParser::new();
        let events = parser.feed(&[0x01]);
        assert_eq!(events, vec![UnidirEvent::Reject(error_code::H3_STREAM_CREATION_ERROR)]);
    }

    #[test]
    fn unidir_webtransport_prefix_resolves_session_and_forwards_remainder() {
        let mut parser = UnidirPrefixParser::new();
        let mut bytes = Vec::new();
        StreamUni::WEBTRANSPORT.encode(&mut bytes);
        crate::varint::VarInt::try_from_u64(42).unwrap().encode(&mut bytes);
        bytes.extend_from_slice(b"payload");

        let events = parser.feed(&bytes);
        assert_eq!(
            events,
            vec![
                UnidirEvent::Resolved(UnidirStreamKind::WebTransport { session_id: 42 }),
                UnidirEvent::Data(b"payload".to_vec()),
            ]
        );
    }

    #[test]
    fn unidir_prefix_is_restartable_across_byte_boundaries() {
        let mut parser = UnidirPrefixParser::new();
        let mut bytes = Vec::new();
        crate::varint::VarInt::try_from_u64(0x54).unwrap().encode(&mut bytes);
        crate::varint::VarInt::try_from_u64(7).unwrap().encode(&mut bytes);

        let mut events = Vec::new();
        for &byte in &bytes {
            events.extend(parser.feed(&[byte]));
        }
        assert_eq!(events, vec![UnidirEvent::Resolved(UnidirStreamKind::WebTransport { session_id: 7 })]);
    }

    #[test]
    fn data_stream_parses_headers_frame_into_request_header() {
        let mut parser = DataStreamParser::new();
        let header = RequestHeader { method: Method::Get, path: b"/1234".to_vec() };
        let mut payload = Vec::new();
        header.encode(&mut payload).unwrap();

        let mut frame = Vec::new();
        Frame::HEADERS.encode(&mut frame);
        crate::varint::VarInt::try_from_u64(payload.len() as u64).unwrap().encode(&mut frame);
        frame.extend_from_slice(&payload);

        let events = parser.feed(&frame);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DataStreamEvent::Header(h) => {
                assert_eq!(h.method, Method::Get);
                assert_eq!(h.path, b"/1234");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn data_stream_splits_data_frame_across_chunks() {
        let mut parser = DataStreamParser::new();
        let mut frame = Vec::new();
        Frame::DATA.encode(&mut frame);
        crate::varint::VarInt::try_from_u64(5).unwrap().encode(&mut frame);
        frame.extend_from_slice(b"he");

        let mut events = parser.feed(&frame);
        events.extend(parser.feed(b"llo"));

        let mut collected = Vec::new();
        for event in events {
            if let DataStreamEvent::DataChunk(chunk) = event {
                collected.extend(chunk);
            }
        }
        assert_eq!(collected, b"hello");
    }

    #[test]
    fn webtransport_frame_switches_to_raw_passthrough() {
        let mut parser = DataStreamParser::new();
        let mut frame = Vec::new();
        Frame::WEBTRANSPORT.encode(&mut frame);
        crate::varint::VarInt::try_from_u64(99).unwrap().encode(&mut frame);
        frame.extend_from_slice(b"tunnel-bytes");

        let events = parser.feed(&frame);
        assert_eq!(events[0], DataStreamEvent::WebTransportSession(99));
        assert_eq!(events[1], DataStreamEvent::DataChunk(b"tunnel-bytes".to_vec()));

        let more = parser.feed(b"-more");
        assert_eq!(more, vec![DataStreamEvent::DataChunk(b"-more".to_vec())]);
    }

    #[test]
    fn unknown_frame_type_is_a_protocol_error() {
        let mut parser = DataStreamParser::new();
        let mut frame = Vec::new();
        crate::varint::VarInt::try_from_u64(0x2f).unwrap().encode(&mut frame); // reserved/greasing type
        crate::varint::VarInt::try_from_u64(0).unwrap().encode(&mut frame);

        let events = parser.feed(&frame);
        assert_eq!(events, vec![DataStreamEvent::ProtocolError(error_code::H3_FRAME_ERROR)]);
    }
}
