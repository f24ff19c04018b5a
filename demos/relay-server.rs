//! Demo binary wiring the socket set, packet loop, and session engine
//! together, in the spirit of `web-transport-quiche`'s `echo-server`
//! example: parse a CLI, install a `tracing` subscriber, open sockets, run.
//!
//! With the `quiche` feature enabled a real `QuicheTransport` would sit
//! behind this same `packet_loop::run` call; here it drives
//! [`LoopbackTransport`], which wraps a real `session::Connection`, so the
//! wiring can be demonstrated and tested without a BoringSSL/cmake
//! toolchain.

use clap::Parser;
use h3relay::packet_loop::{self, socket::AddressFamily, LoopAction, LoopCallbacks, SocketSet};
use h3relay::session::{Connection, Role};
use h3relay::session_transport::LoopbackTransport;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = 4443)]
    port: u16,

    /// Serve files from this folder instead of the synthetic default pages.
    #[arg(long)]
    web_folder: Option<PathBuf>,

    /// Disable writing received POST bodies to disk.
    #[arg(long)]
    no_disk: bool,

    /// Suppress per-request logging.
    #[arg(long)]
    no_print: bool,

    /// Terminate the loop after this many datagrams (0 = run forever).
    #[arg(long, default_value_t = 0)]
    max_datagrams: usize,
}

struct DemoCallbacks {
    no_print: bool,
    max_datagrams: usize,
    seen: usize,
}

impl LoopCallbacks for DemoCallbacks {
    fn on_ready(&mut self, bound_ports: &[u16]) {
        tracing::info!(?bound_ports, "listening");
    }

    fn after_send(&mut self) -> LoopAction {
        self.seen += 1;
        if !self.no_print {
            tracing::debug!(datagrams = self.seen, "sent reply");
        }
        if self.max_datagrams > 0 && self.seen >= self.max_datagrams {
            LoopAction::Terminate
        } else {
            LoopAction::Continue
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut conn = Connection::new(Role::Server);
    if let Some(folder) = args.web_folder.clone() {
        tracing::info!(folder = ?folder, "serving files from web folder");
        conn = conn.with_web_folder(folder);
    }
    conn.no_disk = args.no_disk;
    conn.no_print = args.no_print;

    let family = if args.bind == "0.0.0.0" { AddressFamily::V4 } else { AddressFamily::Unspecified };
    let mut sockets = SocketSet::open(args.port, family, false)?;

    tracing::info!(no_disk = args.no_disk, no_print = args.no_print, "starting relay");

    // Stands in for a real `QuicheTransport` (feature `quiche`), but drives
    // the actual session engine rather than a disconnected mock: each
    // datagram is treated as one complete bidirectional request stream (see
    // `session_transport.rs`).
    let mut transport = LoopbackTransport::new(conn);
    let mut callbacks = DemoCallbacks { no_print: args.no_print, max_datagrams: args.max_datagrams, seen: 0 };

    packet_loop::run(&mut sockets, &mut transport, &mut callbacks)?;

    tracing::info!("relay stopped");
    Ok(())
}
