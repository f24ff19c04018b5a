//! Prefix registry: maps a control stream-id to a path handler for
//! WebTransport-style tunneling (spec.md section 4.3).
//!
//! The original is a doubly-linked list of raw-pointer nodes so a handler's
//! `free` callback can safely delete its own entry mid-teardown. Re-architected
//! per spec.md section 9 as an owned `Vec` of entries in insertion order;
//! `delete_all` re-checks for the entry's continued presence before unlinking
//! it, since the handler invoked may have already removed itself.

pub trait PrefixHandler {
    /// The `free` event, fired once per entry during `delete_all`.
    fn on_free(&mut self, prefix_id: u64);
}

struct Entry<H> {
    prefix_id: u64,
    handler: H,
}

pub struct PrefixRegistry<H> {
    entries: Vec<Entry<H>>,
}

impl<H> Default for PrefixRegistry<H> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixAlreadyRegistered;

impl<H: PrefixHandler> PrefixRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, prefix_id: u64, handler: H) -> Result<(), PrefixAlreadyRegistered> {
        if self.entries.iter().any(|e| e.prefix_id == prefix_id) {
            return Err(PrefixAlreadyRegistered);
        }
        self.entries.push(Entry { prefix_id, handler });
        Ok(())
    }

    pub fn find(&self, prefix_id: u64) -> Option<&H> {
        self.entries.iter().find(|e| e.prefix_id == prefix_id).map(|e| &e.handler)
    }

    pub fn find_mut(&mut self, prefix_id: u64) -> Option<&mut H> {
        self.entries.iter_mut().find(|e| e.prefix_id == prefix_id).map(|e| &mut e.handler)
    }

    pub fn delete(&mut self, prefix_id: u64) {
        self.entries.retain(|e| e.prefix_id != prefix_id);
    }

    /// Fires `free` on every entry, in insertion order, before unlinking it.
    /// A handler's `free` callback may call `delete` on its own prefix; that
    /// is safe here because each step re-derives "still present" from the
    /// live vector rather than walking a snapshot.
    pub fn delete_all(&mut self) {
        while let Some(prefix_id) = self.entries.first().map(|e| e.prefix_id) {
            if let Some(pos) = self.entries.iter().position(|e| e.prefix_id == prefix_id) {
                self.entries[pos].handler.on_free(prefix_id);
                // The handler may have deleted its own entry (or others)
                // already; only remove it if it's still there.
                if let Some(pos) = self.entries.iter().position(|e| e.prefix_id == prefix_id) {
                    self.entries.remove(pos);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
