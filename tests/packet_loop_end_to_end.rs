//! Integration-level packet-loop scenarios (spec.md section 8), run against
//! real UDP sockets and a mock transport — the teacher's own integration
//! tests live in `web-transport-quiche`'s `tests/` directory; this follows
//! the same convention of testing the wiring, not just a single module.

use h3relay::packet_loop::socket::{AddressFamily, SocketSet};
use h3relay::packet_loop::{run, LoopAction, LoopCallbacks};
use h3relay::transport::MockTransport;
use std::net::SocketAddr;

struct TerminateAfter {
    count: usize,
    target: usize,
}

impl LoopCallbacks for TerminateAfter {
    fn after_send(&mut self) -> LoopAction {
        self.count += 1;
        if self.count >= self.target {
            LoopAction::Terminate
        } else {
            LoopAction::Continue
        }
    }
}

#[test]
fn n_packets_in_yields_n_datagrams_out_and_clean_termination() {
    let mut sockets = SocketSet::open(0, AddressFamily::V4, false).unwrap();
    let port = sockets.bound_ports()[0];
    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

    const N: usize = 5;
    for i in 0..N {
        sender.send_to(format!("packet-{i}").as_bytes(), target).unwrap();
    }

    let mut transport = MockTransport::new(1200);
    let mut callbacks = TerminateAfter { count: 0, target: N };

    run(&mut sockets, &mut transport, &mut callbacks).unwrap();

    assert_eq!(transport.ingested.len(), N);
    assert_eq!(callbacks.count, N);
}

#[test]
fn ipv4_only_host_binds_one_socket_and_reports_its_ephemeral_port() {
    let sockets = SocketSet::open(0, AddressFamily::V4, false).unwrap();
    assert_eq!(sockets.primary.len(), 1);
    assert_ne!(sockets.bound_ports()[0], 0);
}

#[test]
fn single_thirty_byte_datagram_is_forwarded_to_ingest_exactly_once() {
    let mut sockets = SocketSet::open(0, AddressFamily::V4, false).unwrap();
    let port = sockets.bound_ports()[0];
    let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

    sender.send_to(&[7u8; 30], target).unwrap();

    let mut transport = MockTransport::new(0);
    let mut callbacks = TerminateAfterReceive { done: false };

    run(&mut sockets, &mut transport, &mut callbacks).unwrap();

    assert_eq!(transport.ingested.len(), 1);
    assert_eq!(transport.ingested[0].len(), 30);
}

struct TerminateAfterReceive {
    done: bool,
}

impl LoopCallbacks for TerminateAfterReceive {
    fn after_receive(&mut self) -> LoopAction {
        if self.done {
            LoopAction::Terminate
        } else {
            self.done = true;
            LoopAction::Terminate
        }
    }
}
