//! Session engine: the per-connection callback contract the transport
//! invokes (spec.md section 4.5).
//!
//! Grounded on `ez/driver.rs`'s `Driver`/`DriverState` (the place the teacher
//! keeps per-connection bookkeeping and reacts to transport callbacks) and
//! `h3/connect.rs` + `h3/request.rs` (the CONNECT accept/reject shape).

use crate::dispatcher::{self, get_content_type, post_response_page, GetOutcome, PathTable, DEFAULT_PAGE};
use crate::frame_parser::{DataStreamEvent, UnidirEvent, UnidirStreamKind};
use crate::handler::SharedHandler;
use crate::headers::{ContentType, Method, ResponseHeader};
use crate::prefix::PrefixRegistry;
use crate::stream_index::{FreeHandler, ParseState, StreamIndex};
use crate::transport::{Transport, TransportEvent};
use crate::wire::{self, error_code, Frame, StreamUni};
use bytes::{BufMut, BytesMut};
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

/// `(stream_id, response bytes, fin)` produced by the request processor.
type Reply = (u64, Vec<u8>, bool);

/// Response bodies up to this size are appended directly to the HEADERS
/// reply; larger ones are marked active and streamed through
/// `PrepareToSend` instead (spec.md section 4.5.1).
const INLINE_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("stream buffer overrun while building a response")]
    BufferOverrun,
    #[error("no connection context established yet")]
    NoConnectionContext,
}

/// Connection-scoped context (spec.md section 3).
pub struct Connection {
    role: Role,
    pub streams: StreamIndex,
    pub prefixes: PrefixRegistry<SharedHandler>,
    pub path_table: PathTable<SharedHandler>,
    pub web_folder: Option<PathBuf>,
    pub no_disk: bool,
    pub no_print: bool,
    pub connection_closed: bool,
    setup_done: bool,
}

impl Connection {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            streams: StreamIndex::new(),
            prefixes: PrefixRegistry::new(),
            path_table: PathTable::new(),
            web_folder: None,
            no_disk: false,
            no_print: false,
            connection_closed: false,
            setup_done: false,
        }
    }

    /// Serve GET requests for files under `folder` in preference to the
    /// synthetic welcome/echo pages (spec.md section 3: "optional web-folder
    /// path").
    pub fn with_web_folder(mut self, folder: PathBuf) -> Self {
        self.web_folder = Some(folder);
        self
    }

    /// The protocol initializer: three locally-initiated unidirectional
    /// streams carrying SETTINGS (priority 0), then the QPACK encoder/decoder
    /// stream-type markers (priority 1 each). Runs once, on the first event
    /// seen for a connection (spec.md section 4.5).
    pub fn ensure_setup<T: Transport>(&mut self, transport: &mut T) -> Result<(), T::Error> {
        if self.setup_done {
            return Ok(());
        }
        self.setup_done = true;

        let mut control = BytesMut::new();
        StreamUni::CONTROL.encode(&mut control);
        Frame::SETTINGS.encode(&mut control);
        let settings = wire::default_settings_payload();
        let mut len_prefix = [0u8; 2];
        wire::encode_headers_length_14(settings.len() as u16, &mut len_prefix);
        control.put_slice(&len_prefix);
        control.put_slice(&settings);
        transport.send_stream(2, &control, false)?; // lowest-numbered local unidir, priority 0

        let mut qpack_encoder = BytesMut::new();
        StreamUni::QPACK_ENCODER.encode(&mut qpack_encoder);
        transport.send_stream(6, &qpack_encoder, false)?;

        let mut qpack_decoder = BytesMut::new();
        StreamUni::QPACK_DECODER.encode(&mut qpack_decoder);
        transport.send_stream(10, &qpack_decoder, false)?;

        Ok(())
    }

    /// Dispatches one transport event (spec.md section 4.5's callback
    /// contract) and returns any reply bytes the request processor produced
    /// for the caller to hand to `transport.send_stream`.
    pub fn handle_event<T: Transport>(
        &mut self,
        event: TransportEvent,
        transport: &mut T,
    ) -> Result<Option<Reply>, T::Error> {
        self.ensure_setup(transport)?;

        match event {
            TransportEvent::StreamData { stream_id, data, fin } => {
                self.on_stream_data(stream_id, &data, fin, transport)
            }
            TransportEvent::StreamFin { stream_id } => self.on_stream_data(stream_id, &[], true, transport),
            TransportEvent::StreamReset { stream_id, .. } | TransportEvent::StopSending { stream_id, .. } => {
                self.on_reset(stream_id);
                Ok(None)
            }
            TransportEvent::Close { .. } | TransportEvent::ApplicationClose { .. } => {
                self.on_close();
                Ok(None)
            }
            TransportEvent::PrepareToSend { stream_id, capacity } => Ok(self.on_prepare_to_send(stream_id, capacity)),
            TransportEvent::StatelessReset
            | TransportEvent::VersionNegotiation
            | TransportEvent::StreamGap { .. }
            | TransportEvent::AlmostReady
            | TransportEvent::Ready => Ok(None),
        }
    }

    /// Dispatches a data chunk arriving on a peer-initiated unidirectional
    /// stream through `parse_unidir_prefix` (spec.md section 4.2).
    fn on_unidir_data<T: Transport>(&mut self, stream_id: u64, data: &[u8], fin: bool, transport: &mut T) {
        let ctx = self.streams.find_or_create(stream_id, true, false, true);

        if let Some(handler) = ctx.handler.clone() {
            if !data.is_empty() {
                handler.borrow_mut().on_post_data(data);
            }
            if fin {
                handler.borrow_mut().on_post_fin();
                self.streams.delete(stream_id, &mut HandlerFreeNoop);
            }
            return;
        }

        let ParseState::H3(state) = &mut ctx.parse_state else { return };
        let parser = state.unidir_parser.get_or_insert_with(Default::default);
        let events = parser.feed(data);

        for event in events {
            match event {
                UnidirEvent::Reject(code) => {
                    transport.reset_stream(stream_id, code);
                    self.streams.delete(stream_id, &mut HandlerFreeNoop);
                    return;
                }
                UnidirEvent::Resolved(UnidirStreamKind::WebTransport { session_id }) => {
                    match self.prefixes.find(session_id).cloned() {
                        Some(handler) => ctx.handler = Some(handler),
                        None => {
                            transport.reset_stream(stream_id, error_code::H3_WEBTRANSPORT_BUFFERED_STREAM_REJECTED);
                            self.streams.delete(stream_id, &mut HandlerFreeNoop);
                            return;
                        }
                    }
                }
                UnidirEvent::Resolved(_) => {}
                UnidirEvent::Data(chunk) => {
                    if let Some(handler) = &ctx.handler {
                        handler.borrow_mut().on_post_data(&chunk);
                    }
                }
            }
        }

        if fin {
            if let Some(handler) = ctx.handler.clone() {
                handler.borrow_mut().on_post_fin();
            }
            self.streams.delete(stream_id, &mut HandlerFreeNoop);
        }
    }

    fn on_stream_data<T: Transport>(
        &mut self,
        stream_id: u64,
        data: &[u8],
        fin: bool,
        transport: &mut T,
    ) -> Result<Option<Reply>, T::Error> {
        let is_unidir = stream_id & 0x2 != 0;
        let locally_initiated = match self.role {
            Role::Client => stream_id & 0x1 == 0,
            Role::Server => stream_id & 0x1 != 0,
        };

        if is_unidir && !locally_initiated {
            self.on_unidir_data(stream_id, data, fin, transport);
            return Ok(None);
        }

        let mut connect_ready = false;
        let mut should_process_request = false;

        {
            let ctx = self.streams.find_or_create(stream_id, true, locally_initiated, is_unidir);
            if !ctx.is_open {
                return Ok(None);
            }

            let events = match &mut ctx.parse_state {
                ParseState::H3(state) => state.data_parser.feed(data),
                ParseState::Legacy(_) => Vec::new(),
            };

            for event in events {
                match event {
                    DataStreamEvent::Header(header) => {
                        let is_connect = header.method == Method::Connect;
                        let is_post = header.method == Method::Post;
                        let path = header.path.clone();

                        if let ParseState::H3(state) = &mut ctx.parse_state {
                            state.method = Some(header.method);
                            state.path = header.path;
                            state.header_found = true;
                        }

                        if is_post {
                            if let Some(handler) = self.path_table.find(&path).cloned() {
                                handler.borrow_mut().on_post(&path);
                                ctx.handler = Some(handler);
                            }
                        }

                        if is_connect {
                            if let ParseState::H3(state) = &mut ctx.parse_state {
                                if !state.connect_dispatched {
                                    state.connect_dispatched = true;
                                    connect_ready = true;
                                }
                            }
                        }
                    }
                    DataStreamEvent::DataChunk(chunk) => {
                        ctx.received_length += chunk.len() as u64;
                        ctx.post_received += chunk.len() as u64;
                        if let Some(handler) = &ctx.handler {
                            handler.borrow_mut().on_post_data(&chunk);
                        }
                    }
                    DataStreamEvent::WebTransportSession(session_id) => {
                        if let ParseState::H3(state) = &mut ctx.parse_state {
                            state.is_web_transport = true;
                        }
                        match self.prefixes.find(session_id).cloned() {
                            Some(handler) => ctx.handler = Some(handler),
                            None => {
                                transport.reset_stream(stream_id, error_code::H3_WEBTRANSPORT_BUFFERED_STREAM_REJECTED);
                                ctx.is_open = false;
                            }
                        }
                    }
                    DataStreamEvent::ProtocolError(code) => {
                        transport.reset_stream(stream_id, code);
                        ctx.is_open = false;
                    }
                }
            }

            if fin {
                if let ParseState::H3(state) = &mut ctx.parse_state {
                    state.is_fin_received = true;
                }
                ctx.is_open = false;
                should_process_request = true;
            }
        }

        if connect_ready {
            let path = match self.streams.find(stream_id) {
                Some(ctx) => match &ctx.parse_state {
                    ParseState::H3(state) => state.path.clone(),
                    ParseState::Legacy(_) => Vec::new(),
                },
                None => Vec::new(),
            };
            return Ok(Some(self.process_connect(stream_id, &path)));
        }

        if should_process_request {
            let method = self.streams.find(stream_id).and_then(|ctx| match &ctx.parse_state {
                ParseState::H3(state) => state.method,
                ParseState::Legacy(_) => None,
            });

            if method.is_some() {
                return Ok(self.process_request(stream_id, transport));
            }

            // A bidir stream that FIN'd without ever carrying a HEADERS
            // frame: either a WebTransport tunnel (already forwarded via its
            // `handler`) or a stream we never managed to parse. Either way
            // there's no HTTP response to send.
            if let Some(ctx) = self.streams.find(stream_id) {
                if let Some(handler) = ctx.handler.clone() {
                    handler.borrow_mut().on_post_fin();
                }
            }
            self.streams.delete(stream_id, &mut HandlerFreeNoop);
        }

        Ok(None)
    }

    /// CONNECT dispatch (spec.md section 4.5.1): runs as soon as the HEADERS
    /// frame is parsed rather than waiting on FIN, since CONNECT streams
    /// stay open for the life of the tunnel. Mirrors `h3zero_common.c`'s
    /// `h3zero_process_h3_connect`: 200/no-FIN on accept, 501 on reject
    /// (matching handler present but refuses), 404 when no handler matches.
    fn process_connect(&mut self, stream_id: u64, path: &[u8]) -> Reply {
        let response_header = match self.path_table.find(path).cloned() {
            Some(handler) => {
                let accepted = handler.borrow_mut().on_connect(path);
                if accepted {
                    if let Some(ctx) = self.streams.find_mut(stream_id) {
                        ctx.handler = Some(handler);
                    }
                    ResponseHeader::ok(ContentType::None)
                } else {
                    ResponseHeader::not_implemented()
                }
            }
            None => ResponseHeader::not_found(),
        };

        let mut out = BytesMut::new();
        out.put_u8(0x01); // h3zero_frame_header tag (HEADERS)
        let len_pos = out.len();
        out.put_slice(&[0u8, 0u8]);

        let mut header_bytes = BytesMut::new();
        response_header.encode(&mut header_bytes);
        let header_len = header_bytes.len() as u16;
        let mut len_prefix = [0u8; 2];
        wire::encode_headers_length_14(header_len, &mut len_prefix);
        out[len_pos..len_pos + 2].copy_from_slice(&len_prefix);
        out.put_slice(&header_bytes);

        let fin = response_header.status != 200;
        (stream_id, out.to_vec(), fin)
    }

    /// Request processor (spec.md section 4.5.1).
    fn process_request<T: Transport>(&mut self, stream_id: u64, transport: &mut T) -> Option<Reply> {
        let web_folder = self.resolve_web_folder().map(std::path::Path::to_path_buf);
        let ctx = self.streams.find_mut(stream_id)?;

        let (method, path, received) = match &ctx.parse_state {
            ParseState::H3(state) => (state.method, state.path.clone(), ctx.post_received),
            ParseState::Legacy(_) => return None,
        };

        let (response_header, immediate_body): (ResponseHeader, Vec<u8>) = match method {
            Some(Method::Get) => match dispatcher::resolve_get(&path, web_folder.as_deref()) {
                GetOutcome::WelcomePage => (ResponseHeader::ok(ContentType::TextHtml), DEFAULT_PAGE.as_bytes().to_vec()),
                GetOutcome::Echo { length } if length as usize <= INLINE_BODY_LIMIT => {
                    (ResponseHeader::ok(ContentType::TextPlain), vec![0u8; length as usize])
                }
                GetOutcome::Echo { length } => {
                    ctx.echo_length = length;
                    ctx.echo_sent = 0;
                    (ResponseHeader::ok(ContentType::TextPlain), Vec::new())
                }
                GetOutcome::File { path: file_path, len } if len <= INLINE_BODY_LIMIT as u64 => {
                    match std::fs::read(&file_path) {
                        Ok(bytes) => (ResponseHeader::ok(get_content_type(&GetOutcome::File { path: file_path, len })), bytes),
                        Err(_) => (ResponseHeader::not_found(), Vec::new()),
                    }
                }
                GetOutcome::File { path: file_path, len } => {
                    let content_type = dispatcher::content_type_for_path(&file_path);
                    ctx.echo_length = len;
                    ctx.echo_sent = 0;
                    ctx.file_path = Some(file_path);
                    (ResponseHeader::ok(content_type), Vec::new())
                }
                GetOutcome::NotFound => (ResponseHeader::not_found(), Vec::new()),
            },
            Some(Method::Post) => match ctx.handler.clone() {
                Some(handler) => (ResponseHeader::ok(ContentType::TextHtml), handler.borrow_mut().on_post_fin()),
                None => (ResponseHeader::ok(ContentType::TextHtml), post_response_page(received).into_bytes()),
            },
            Some(Method::Connect) | None => (ResponseHeader::not_implemented(), Vec::new()),
        };

        let mut out = BytesMut::new();
        out.put_u8(0x01); // h3zero_frame_header tag (HEADERS)
        let len_pos = out.len();
        out.put_slice(&[0u8, 0u8]);

        let mut header_bytes = BytesMut::new();
        response_header.encode(&mut header_bytes);
        let header_len = header_bytes.len() as u16;
        let mut len_prefix = [0u8; 2];
        wire::encode_headers_length_14(header_len, &mut len_prefix);
        out[len_pos..len_pos + 2].copy_from_slice(&len_prefix);
        out.put_slice(&header_bytes);

        let fin = if ctx.echo_length > ctx.echo_sent {
            // GET echo/file body already configured above for streaming.
            let length = ctx.echo_length;
            ctx.flow_opened = true;
            transport.open_flow_control(stream_id, length);
            false
        } else if immediate_body.is_empty() {
            true
        } else if immediate_body.len() <= INLINE_BODY_LIMIT {
            match crate::varint::VarInt::try_from_u64(immediate_body.len() as u64) {
                Some(v) => {
                    Frame::DATA.encode(&mut out);
                    v.encode(&mut out);
                    out.put_slice(&immediate_body);
                    true
                }
                None => true, // always fits: immediate_body.len() <= INLINE_BODY_LIMIT
            }
        } else {
            // An oversized in-memory body (e.g. a large handler POST ack):
            // stream it the same way an oversized GET echo/file body does.
            ctx.echo_length = immediate_body.len() as u64;
            ctx.echo_sent = 0;
            ctx.pending_body = Some(immediate_body);
            ctx.flow_opened = true;
            let length = ctx.echo_length;
            transport.open_flow_control(stream_id, length);
            false
        };

        if fin {
            self.streams.delete(stream_id, &mut HandlerFreeNoop);
        }

        Some((stream_id, out.to_vec(), fin))
    }

    fn resolve_web_folder(&self) -> Option<&std::path::Path> {
        if self.no_disk {
            None
        } else {
            self.web_folder.as_deref()
        }
    }

    /// Egress (spec.md section 4.5 "Egress"): a `PrepareToSend` call for a
    /// stream with no attached handler streams the remaining
    /// `echo_length - echo_sent` bytes from whichever source was configured
    /// by the request processor (zero-fill, a file, or an oversized in-memory
    /// body); a stream with a handler defers to its `on_provide_data`.
    fn on_prepare_to_send(&mut self, stream_id: u64, capacity: usize) -> Option<Reply> {
        let ctx = self.streams.find_mut(stream_id)?;

        if let Some(handler) = ctx.handler.clone() {
            let mut buf = vec![0u8; capacity];
            let (written, done) = handler.borrow_mut().on_provide_data(&mut buf);
            buf.truncate(written);
            if written == 0 && !done {
                return None;
            }
            if done {
                self.streams.delete(stream_id, &mut HandlerFreeNoop);
            }
            return Some((stream_id, buf, done));
        }

        if ctx.echo_sent >= ctx.echo_length {
            return None;
        }

        const FRAME_OVERHEAD: usize = 9; // DATA tag (1 byte) + worst-case 8-byte varint length
        let remaining = (ctx.echo_length - ctx.echo_sent) as usize;
        let chunk_len = remaining.min(capacity.saturating_sub(FRAME_OVERHEAD));
        if chunk_len == 0 {
            return None;
        }

        let body = if let Some(path) = ctx.file_path.clone() {
            if ctx.file_handle.is_none() {
                match std::fs::File::open(&path) {
                    Ok(file) => {
                        ctx.file_handle = Some(file);
                        ctx.is_file_open = true;
                    }
                    Err(_) => {
                        self.streams.delete(stream_id, &mut HandlerFreeNoop);
                        return None;
                    }
                }
            }
            let file = ctx.file_handle.as_mut()?;
            if file.seek(SeekFrom::Start(ctx.echo_sent)).is_err() {
                self.streams.delete(stream_id, &mut HandlerFreeNoop);
                return None;
            }
            let mut buf = vec![0u8; chunk_len];
            match file.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    buf
                }
                Err(_) => {
                    self.streams.delete(stream_id, &mut HandlerFreeNoop);
                    return None;
                }
            }
        } else if let Some(pending) = &ctx.pending_body {
            let start = ctx.echo_sent as usize;
            let end = (start + chunk_len).min(pending.len());
            pending[start..end].to_vec()
        } else {
            vec![0u8; chunk_len]
        };

        if body.is_empty() {
            self.streams.delete(stream_id, &mut HandlerFreeNoop);
            return None;
        }

        ctx.echo_sent += body.len() as u64;
        let done = ctx.echo_sent >= ctx.echo_length;

        let mut out = BytesMut::new();
        Frame::DATA.encode(&mut out);
        match crate::varint::VarInt::try_from_u64(body.len() as u64) {
            Some(v) => v.encode(&mut out),
            None => {
                self.streams.delete(stream_id, &mut HandlerFreeNoop);
                return None;
            }
        }
        out.put_slice(&body);

        if done {
            self.streams.delete(stream_id, &mut HandlerFreeNoop);
        }

        Some((stream_id, out.to_vec(), done))
    }

    fn on_reset(&mut self, stream_id: u64) {
        if let Some(ctx) = self.streams.find(stream_id) {
            if let Some(handler) = ctx.handler.clone() {
                handler.borrow_mut().on_reset();
            }
        }
        let mut free = HandlerFreeNoop;
        self.streams.delete(stream_id, &mut free);
    }

    fn on_close(&mut self) {
        match self.role {
            Role::Client => self.connection_closed = true,
            Role::Server => {
                self.prefixes.delete_all();
                let mut free = HandlerFreeNoop;
                self.streams.clear_all(&mut free);
                self.connection_closed = true;
            }
        }
    }
}

struct HandlerFreeNoop;
impl FreeHandler for HandlerFreeNoop {
    fn on_free(&mut self, _stream_id: u64) {}
}

pub const RESET_APPLICATION_CODE: u64 = 0;
pub const FRAME_ERROR: u64 = error_code::H3_FRAME_ERROR;
