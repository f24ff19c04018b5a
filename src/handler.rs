//! The path-handler callback contract (spec.md section 4.5's "Handler"
//! glossary entry: `{post, post_data, post_fin, provide_data, connect, reset,
//! free}`), plus the shared-ownership wrapper a WebTransport session needs:
//! one handler instance is reachable from its control stream *and* every
//! data stream later adopted onto it (spec.md section 4.2's prefix-adoption
//! flow), so `Box<dyn Handler>`'s single-owner model doesn't fit here.
//!
//! Grounded on `h3zero_callback`'s per-path function-pointer table in
//! `original_source/picohttp/h3zero_common.c`, translated into a trait object
//! the way the teacher's own `ez/driver.rs` uses `Box<dyn ApplicationOverQuic>`
//! for its single callback seam.

use crate::prefix::PrefixHandler;
use std::cell::RefCell;
use std::rc::Rc;

pub trait Handler {
    fn on_post(&mut self, _path: &[u8]) {}
    fn on_post_data(&mut self, _data: &[u8]) {}
    /// Returns the response body to send as the POST-FIN acknowledgement.
    fn on_post_fin(&mut self) -> Vec<u8> {
        Vec::new()
    }
    /// Returns `(bytes written into buf, no more data after this call)` for
    /// a `provide_data` egress call.
    fn on_provide_data(&mut self, buf: &mut [u8]) -> (usize, bool) {
        let _ = buf;
        (0, true)
    }
    /// Returns true if the CONNECT is accepted.
    fn on_connect(&mut self, _path: &[u8]) -> bool {
        false
    }
    fn on_reset(&mut self) {}
    fn on_free(&mut self) {}
}

/// A handler shared between a WebTransport session's control stream and
/// every data stream adopted onto it (spec.md section 4.2).
pub type SharedHandler = Rc<RefCell<dyn Handler>>;

impl PrefixHandler for SharedHandler {
    fn on_free(&mut self, _prefix_id: u64) {
        self.borrow_mut().on_free();
    }
}
