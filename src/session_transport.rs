//! A loopback [`Transport`] that drives [`Connection`] directly, so the
//! packet loop demo exercises the real session engine instead of a
//! disconnected mock (spec.md section 2's data flow: packet loop ->
//! `transport.ingest` -> session engine callbacks -> `transport.send`).
//!
//! Grounded on `ez/driver.rs`, which embeds its `ApplicationOverQuic`
//! implementation directly behind the `quiche::Connection` wrapper the same
//! way this embeds [`Connection`] behind a `Transport` impl. Lacking a real
//! QUIC stack in this build (see `quiche_transport.rs`), each ingested UDP
//! datagram here is treated as one complete bidirectional request stream
//! rather than a coalesced set of QUIC packets — enough to exercise the
//! session engine end to end through the packet loop without a handshake.

use crate::session::Connection;
use crate::transport::{Transport, TransportEvent};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
#[error("loopback transport error")]
pub struct LoopbackError;

/// The `Transport` the session engine calls back into while processing one
/// event: it only ever queues bytes for `prepare_next` to drain, since this
/// loopback has no real connection state to manage.
struct ReplySink {
    pending_out: VecDeque<Vec<u8>>,
    closed: bool,
}

impl Transport for ReplySink {
    type Error = LoopbackError;

    fn ingest(&mut self, _datagram: &[u8], _src: SocketAddr, _dst: SocketAddr, _ecn: u8, _now: Instant) -> Result<(), Self::Error> {
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        Vec::new()
    }

    fn prepare_next(&mut self, _now: Instant, out: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        match self.pending_out.pop_front() {
            Some(datagram) => {
                let len = datagram.len().min(out.len());
                out[..len].copy_from_slice(&datagram[..len]);
                Ok(Some(len))
            }
            None => Ok(None),
        }
    }

    fn next_wake_delay(&self, _now: Instant) -> Duration {
        Duration::from_secs(10)
    }

    fn open_flow_control(&mut self, _stream_id: u64, _length: u64) {}

    fn notify_destination_unreachable(&mut self, _addr: SocketAddr) {}

    fn reset_stream(&mut self, _stream_id: u64, _error_code: u64) {}

    fn stop_sending(&mut self, _stream_id: u64, _error_code: u64) {}

    fn send_stream(&mut self, _stream_id: u64, data: &[u8], _fin: bool) -> Result<usize, Self::Error> {
        self.pending_out.push_back(data.to_vec());
        Ok(data.len())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Drives a real [`Connection`] from plain UDP datagrams, one complete
/// bidirectional request per datagram, so the packet loop's wiring exercises
/// the actual session engine without a QUIC handshake.
pub struct LoopbackTransport {
    conn: Connection,
    sink: ReplySink,
    next_stream_id: u64,
}

impl LoopbackTransport {
    pub fn new(conn: Connection) -> Self {
        Self { conn, sink: ReplySink { pending_out: VecDeque::new(), closed: false }, next_stream_id: 0 }
    }
}

impl Transport for LoopbackTransport {
    type Error = LoopbackError;

    fn ingest(&mut self, datagram: &[u8], _src: SocketAddr, _dst: SocketAddr, _ecn: u8, _now: Instant) -> Result<(), Self::Error> {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 4; // client-initiated bidirectional stream-id spacing

        let event = TransportEvent::StreamData { stream_id, data: datagram.to_vec(), fin: true };
        if let Some((reply_stream, bytes, fin)) = self.conn.handle_event(event, &mut self.sink)? {
            self.sink.send_stream(reply_stream, &bytes, fin)?;
        }
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        Vec::new()
    }

    fn prepare_next(&mut self, now: Instant, out: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        self.sink.prepare_next(now, out)
    }

    fn next_wake_delay(&self, now: Instant) -> Duration {
        self.sink.next_wake_delay(now)
    }

    fn open_flow_control(&mut self, stream_id: u64, length: u64) {
        self.sink.open_flow_control(stream_id, length)
    }

    fn notify_destination_unreachable(&mut self, addr: SocketAddr) {
        self.sink.notify_destination_unreachable(addr)
    }

    fn reset_stream(&mut self, stream_id: u64, error_code: u64) {
        self.sink.reset_stream(stream_id, error_code)
    }

    fn stop_sending(&mut self, stream_id: u64, error_code: u64) {
        self.sink.stop_sending(stream_id, error_code)
    }

    fn send_stream(&mut self, stream_id: u64, data: &[u8], fin: bool) -> Result<usize, Self::Error> {
        self.sink.send_stream(stream_id, data, fin)
    }

    fn is_closed(&self) -> bool {
        self.conn.connection_closed || self.sink.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{Method, RequestHeader, ResponseHeader};
    use crate::session::Role;
    use crate::wire::Frame;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    #[test]
    fn ingest_drives_the_real_session_engine_end_to_end() {
        let mut transport = LoopbackTransport::new(Connection::new(Role::Server));

        let req = RequestHeader { method: Method::Get, path: b"/".to_vec() };
        let mut frame = Vec::new();
        Frame::HEADERS.encode(&mut frame);
        let mut payload = Vec::new();
        req.encode(&mut payload).unwrap();
        crate::varint::VarInt::try_from_u64(payload.len() as u64).unwrap().encode(&mut frame);
        frame.extend_from_slice(&payload);

        transport.ingest(&frame, addr(), addr(), 0, Instant::now()).unwrap();

        // `ingest` triggers the one-time connection setup (SETTINGS, QPACK
        // encoder/decoder markers) before the actual HTTP response, so drain
        // every queued datagram and find the one carrying a response header.
        let mut found = false;
        loop {
            let mut out = [0u8; 2048];
            let Some(len) = transport.prepare_next(Instant::now(), &mut out).unwrap() else {
                break;
            };
            if len < 3 || out[0] != Frame::HEADERS.0.into_inner() as u8 {
                continue; // control / QPACK setup datagram, not the response
            }
            let mut cursor: &[u8] = &out[3..len];
            let header = ResponseHeader::decode(&mut cursor).unwrap();
            assert_eq!(header.status, 200);
            found = true;
        }
        assert!(found, "expected a reply datagram carrying a response header");
    }
}
