//! The production `Transport` adapter: wraps `tokio_quiche`/`boring` the way
//! `web-transport-quiche/src/ez/driver.rs` wraps `quiche::Connection` behind
//! `ApplicationOverQuic`. Gated behind the `quiche` feature since building
//! `boring` requires a BoringSSL/cmake toolchain; the sans-IO core in
//! `crate::session`/`crate::packet_loop` builds and tests without it.

use crate::transport::{Transport, TransportEvent};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug)]
pub enum QuicheTransportError {
    #[error("quiche connection error: {0}")]
    Connection(#[from] std::sync::Arc<std::io::Error>),
}

/// A `Transport` backed by a real `quiche::Connection`, driven the way
/// `Driver` in `ez/driver.rs` drives one: `ingest` forwards to
/// `Connection::recv`, `prepare_next` to `Connection::send`, and stream
/// events are collected from `Connection::readable()`/`writable()` into
/// `TransportEvent`s for the session engine to consume.
pub struct QuicheTransport {
    inner: tokio_quiche::quiche::Connection,
    pending_events: Vec<TransportEvent>,
}

impl QuicheTransport {
    pub fn new(inner: tokio_quiche::quiche::Connection) -> Self {
        Self { inner, pending_events: Vec::new() }
    }
}

impl Transport for QuicheTransport {
    type Error = QuicheTransportError;

    fn ingest(
        &mut self,
        datagram: &[u8],
        src: SocketAddr,
        dst: SocketAddr,
        _ecn: u8,
        _now: Instant,
    ) -> Result<(), Self::Error> {
        let info = tokio_quiche::quiche::RecvInfo { from: src, to: dst };
        let mut buf = datagram.to_vec();
        self.inner
            .recv(&mut buf, info)
            .map_err(|e| QuicheTransportError::Connection(std::sync::Arc::new(std::io::Error::other(e.to_string()))))?;

        for stream_id in self.inner.readable() {
            let mut buf = vec![0u8; 4096];
            if let Ok((len, fin)) = self.inner.stream_recv(stream_id, &mut buf) {
                buf.truncate(len);
                self.pending_events.push(TransportEvent::StreamData { stream_id, data: buf, fin });
            }
        }

        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn prepare_next(&mut self, _now: Instant, out: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        match self.inner.send(out) {
            Ok((len, _info)) => Ok(Some(len)),
            Err(tokio_quiche::quiche::Error::Done) => Ok(None),
            Err(e) => Err(QuicheTransportError::Connection(std::sync::Arc::new(std::io::Error::other(e.to_string())))),
        }
    }

    fn next_wake_delay(&self, now: Instant) -> Duration {
        self.inner
            .timeout_instant()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(Duration::from_secs(10))
    }

    fn open_flow_control(&mut self, stream_id: u64, length: u64) {
        let _ = self.inner.stream_priority(stream_id, 0, true);
        let _ = length;
    }

    fn notify_destination_unreachable(&mut self, _addr: SocketAddr) {}

    fn reset_stream(&mut self, stream_id: u64, error_code: u64) {
        let _ = self.inner.stream_shutdown(stream_id, tokio_quiche::quiche::Shutdown::Write, error_code);
    }

    fn stop_sending(&mut self, stream_id: u64, error_code: u64) {
        let _ = self.inner.stream_shutdown(stream_id, tokio_quiche::quiche::Shutdown::Read, error_code);
    }

    fn send_stream(&mut self, stream_id: u64, data: &[u8], fin: bool) -> Result<usize, Self::Error> {
        self.inner
            .stream_send(stream_id, data, fin)
            .map_err(|e| QuicheTransportError::Connection(std::sync::Arc::new(std::io::Error::other(e.to_string()))))
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
