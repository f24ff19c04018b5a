//! The QUIC transport boundary: spec.md treats connection state machines,
//! congestion control, the cryptographic handshake, and flow-control
//! accounting as an external collaborator (section 1). This trait is the
//! Rust seam for that boundary, grounded on the `ApplicationOverQuic` trait
//! `web-transport-quiche/src/ez/driver.rs` implements to separate its
//! session logic from the underlying `quiche::Connection` — `SessionEngine`
//! and `PacketLoop` are generic over `Transport`; `quiche_transport` (feature
//! `quiche`) is the production adapter, `MockTransport` (tests) drives the
//! same code path without a real handshake.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Events the transport reports back to the session engine, mirroring the
/// callback contract spec.md section 4.5 describes abstractly as
/// `(connection, stream_id, bytes, length, event, ...)`.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    StreamData { stream_id: u64, data: Vec<u8>, fin: bool },
    StreamFin { stream_id: u64 },
    StreamReset { stream_id: u64, error_code: u64 },
    StopSending { stream_id: u64, error_code: u64 },
    StatelessReset,
    Close { error_code: u64 },
    ApplicationClose { error_code: u64 },
    VersionNegotiation,
    StreamGap { stream_id: u64 },
    PrepareToSend { stream_id: u64, capacity: usize },
    AlmostReady,
    Ready,
}

/// The transport boundary a `SessionEngine` and `PacketLoop` are generic
/// over. A production implementation wraps a real QUIC connection (or
/// connection set); `MockTransport` exercises the same call sequence with
/// synthetic data for spec.md section 8's testable properties.
pub trait Transport {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Submit one received (already de-coalesced) UDP datagram.
    fn ingest(
        &mut self,
        datagram: &[u8],
        src: SocketAddr,
        dst: SocketAddr,
        ecn: u8,
        now: Instant,
    ) -> Result<(), Self::Error>;

    /// Drain queued session events produced by the last `ingest` (or by
    /// internal timers). Called after every `ingest` and once per
    /// packet-loop iteration before the send phase.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    /// Write the next pending outgoing datagram into `out`, returning the
    /// number of bytes written, or `None` when there is nothing left to
    /// send this iteration.
    fn prepare_next(&mut self, now: Instant, out: &mut [u8]) -> Result<Option<usize>, Self::Error>;

    /// Upper bound on how long the packet loop may wait before it must call
    /// back into this transport again.
    fn next_wake_delay(&self, now: Instant) -> Duration;

    fn open_flow_control(&mut self, stream_id: u64, length: u64);

    fn notify_destination_unreachable(&mut self, addr: SocketAddr);

    fn reset_stream(&mut self, stream_id: u64, error_code: u64);

    fn stop_sending(&mut self, stream_id: u64, error_code: u64);

    fn send_stream(&mut self, stream_id: u64, data: &[u8], fin: bool) -> Result<usize, Self::Error>;

    fn is_closed(&self) -> bool;
}

/// A deterministic in-memory transport used by tests to exercise the packet
/// loop and session engine without a real QUIC handshake. Grounded on
/// spec.md section 8's packet-loop testable property: "given a mock
/// transport that responds to every ingest with one outgoing packet of 1200
/// bytes ... the loop emits exactly N datagrams".
#[derive(Default)]
pub struct MockTransport {
    pub pending_out: std::collections::VecDeque<Vec<u8>>,
    pub ingested: Vec<Vec<u8>>,
    pub closed: bool,
    pub reply_size: usize,
}

impl MockTransport {
    pub fn new(reply_size: usize) -> Self {
        Self { reply_size, ..Default::default() }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("mock transport error")]
pub struct MockTransportError;

impl Transport for MockTransport {
    type Error = MockTransportError;

    fn ingest(
        &mut self,
        datagram: &[u8],
        _src: SocketAddr,
        _dst: SocketAddr,
        _ecn: u8,
        _now: Instant,
    ) -> Result<(), Self::Error> {
        self.ingested.push(datagram.to_vec());
        if self.reply_size > 0 {
            self.pending_out.push_back(vec![0u8; self.reply_size]);
        }
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
        Ok(data.len())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
