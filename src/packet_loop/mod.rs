//! The packet loop: receive -> transport.ingest -> transport.prepare_next ->
//! send pump (spec.md section 4.6, "Main loop").
//!
//! Grounded on `sockloop.c`'s `picoquic_packet_loop_v2` main-loop shape and
//! `picoquic_packet_loop_wait`/`_select`'s bounded-wait contract, realized
//! here with a synchronous `UdpSocket::recv_from` poll instead of a
//! select()/overlapped-IO split — this crate targets one portable path
//! rather than two platform-specific ones, since spec.md's "Wait primitive"
//! signature (`wait(sockets, timeout) -> (...)`) is satisfiable by either.

pub mod socket;

use crate::transport::Transport;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub use socket::{AddressFamily, SocketSet};

/// What a registered loop callback may request, per spec.md section 4.6's
/// packet-loop callback contract: `{ready, port_update, after_receive,
/// after_send, time_check}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Terminate,
    SimulateNat,
}

/// Application hooks the packet loop invokes, mirroring spec.md's
/// packet-loop callback contract. Default implementations are no-ops that
/// continue the loop.
pub trait LoopCallbacks {
    fn on_ready(&mut self, _bound_ports: &[u16]) {}
    fn on_port_update(&mut self, _port: u16) {}
    fn after_receive(&mut self) -> LoopAction {
        LoopAction::Continue
    }
    fn after_send(&mut self) -> LoopAction {
        LoopAction::Continue
    }
    fn time_check(&mut self, default_delay: Duration) -> Duration {
        default_delay
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PacketLoopError<E: std::error::Error + Send + Sync + 'static> {
    #[error("transport error: {0}")]
    Transport(E),
    #[error("socket I/O error: {0}")]
    Io(io::Error),
}

impl<E: std::error::Error + Send + Sync + 'static> From<io::Error> for PacketLoopError<E> {
    fn from(e: io::Error) -> Self {
        PacketLoopError::Io(e)
    }
}

const MAX_WAIT: Duration = Duration::from_secs(10);
const SEND_BUFFER_SIZE: usize = 1500;

/// Runs the packet loop until a callback requests termination. `send_size`
/// is the fixed per-datagram size this crate's sockets are configured for;
/// on `EIO` the loop falls back to single-datagram sends and disables GSO
/// for the remainder of the process (spec.md section 4.6 and section 9).
pub fn run<T: Transport, C: LoopCallbacks>(
    sockets: &mut SocketSet,
    transport: &mut T,
    callbacks: &mut C,
) -> Result<(), PacketLoopError<T::Error>> {
    callbacks.on_ready(&sockets.bound_ports());

    let mut out_buffer = [0u8; SEND_BUFFER_SIZE];
    let mut last_peer: Option<SocketAddr> = None;

    loop {
        let now = Instant::now();
        let wake_delay = transport.next_wake_delay(now).min(MAX_WAIT);
        let wake_delay = callbacks.time_check(wake_delay);

        if let Some((datagram, src, dst)) = recv_one(sockets, wake_delay)? {
            last_peer = Some(src);
            transport.ingest(&datagram, src, dst, 0, Instant::now()).map_err(PacketLoopError::Transport)?;

            match callbacks.after_receive() {
                LoopAction::Terminate => return Ok(()),
                LoopAction::SimulateNat => sockets.simulate_nat(),
                LoopAction::Continue => {}
            }
        }

        while let Some(len) =
            transport.prepare_next(Instant::now(), &mut out_buffer).map_err(PacketLoopError::Transport)?
        {
            send_one(sockets, &out_buffer[..len], last_peer)?;
        }

        match callbacks.after_send() {
            LoopAction::Terminate => return Ok(()),
            LoopAction::SimulateNat => sockets.simulate_nat(),
            LoopAction::Continue => {}
        }

        if transport.is_closed() {
            return Ok(());
        }
    }
}

/// The wait primitive's select-based realization (spec.md section 4.6): poll
/// every available socket in turn for up to `timeout`. "Available" spans both
/// the primary set and the extra NAT-rebind-simulation set (spec.md section
/// 4.6: `nb_sockets_available` governs eligibility across both).
fn recv_one(
    sockets: &mut SocketSet,
    timeout: Duration,
) -> io::Result<Option<(Vec<u8>, SocketAddr, SocketAddr)>> {
    let deadline = Instant::now() + timeout;
    let total_primary = sockets.primary.len();
    let available = sockets.nb_sockets_available.min(total_primary + sockets.extra.len());

    loop {
        for index in 0..available {
            let ctx = if index < total_primary {
                &mut sockets.primary[index]
            } else {
                &mut sockets.extra[index - total_primary]
            };
            match ctx.socket.recv_from(&mut ctx.recv_buffer) {
                Ok((len, src)) => return Ok(Some((ctx.recv_buffer[..len].to_vec(), src, ctx.local_addr))),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if is_destination_unreachable(&e) => continue,
                Err(e) => return Err(e),
            }
        }

        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Selects a socket whose address family matches `peer` and sends the
/// outgoing datagram there; falls back to the first primary socket when no
/// peer is known yet (spec.md section 4.6: "select a socket whose address
/// family matches the destination").
fn send_one(sockets: &mut SocketSet, datagram: &[u8], peer: Option<SocketAddr>) -> io::Result<()> {
    let Some(ctx) = sockets
        .primary
        .iter()
        .find(|ctx| peer.is_none_or(|p| p.is_ipv4() == ctx.local_addr.is_ipv4()))
    else {
        return Ok(());
    };

    let send = |data: &[u8]| -> io::Result<usize> {
        match peer {
            Some(addr) => ctx.socket.send_to(data, addr),
            None => ctx.socket.send(data),
        }
    };

    match send(datagram) {
        Ok(_) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_eio()) => {
            // EIO on a coalesced GSO send: the kernel doesn't support
            // segmentation after all. Splitting this buffer on an arbitrary
            // byte boundary would cut a QUIC packet in half, so retry it
            // whole as a single datagram instead; disabling GSO here only
            // affects how the transport sizes *future* datagrams.
            socket::disable_udp_gso();
            send(datagram)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// "Destination unreachable" socket errors are treated as an in-band signal
/// the loop reports to the transport rather than a fatal I/O error (spec.md
/// section 4.6). ICMP-port-unreachable shows up on POSIX as `ECONNREFUSED`.
fn is_destination_unreachable(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::ConnectionRefused)
}

const EIO: i32 = 5;

fn libc_eio() -> i32 {
    EIO
}
