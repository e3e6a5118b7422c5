//! Replica & Replay Cursor: the per-process local map and the `catch_up()`
//! algorithm that keeps it synchronized (spec.md §4.5).
//!
//! The replay algorithm itself (this module) is decoupled from segment and
//! lock plumbing through [`CatchUpContext`], which [`crate::map::SharedMap`]
//! implements — keeping the pseudocode in spec.md §4.5 directly readable
//! here, line for line.

use crate::dump;
use crate::error::{ShmError, ShmResult};
use crate::stream;
use std::collections::HashMap;

/// External effects `catch_up` needs: reading control-block counters,
/// taking the IPL, and loading bytes from the stream/full-dump segments.
/// Implemented by [`crate::map::SharedMap`]; kept as a trait so the replay
/// algorithm has no direct dependency on segment/lock types.
pub trait CatchUpContext {
    /// Unlocked (or locked, depending on call site) read of the full-dump
    /// generation.
    fn full_dump_counter(&self) -> u64;
    /// Unlocked (or locked) read of the stream write cursor.
    fn update_stream_position(&self) -> u64;
    /// Name of the current full-dump segment. Only meaningful while
    /// holding the IPL.
    fn read_full_dump_name(&self) -> String;
    /// Attach to (or reuse an existing attachment of) the named full-dump
    /// segment and return its raw blob bytes.
    fn load_full_dump_blob(&self, name: &str) -> ShmResult<Vec<u8>>;
    /// Current view of the stream buffer bytes, up to at least
    /// `update_stream_position()`.
    fn stream_bytes(&self) -> Vec<u8>;
    /// Acquire the IPL (blocking, no timeout — catch-up never honors
    /// timeouts per spec.md §5).
    fn acquire_lock(&self) -> ShmResult<()>;
    /// Release the IPL.
    fn release_lock(&self) -> ShmResult<()>;
}

/// Per-process local map kept synchronized via full dumps and stream
/// replay. Not shared — exclusively owned by the process that created it.
#[derive(Debug, Default)]
pub struct Replica {
    data: HashMap<Vec<u8>, Vec<u8>>,
    seen_full_dump: u64,
    cursor: u64,
    stale: bool,
}

impl Replica {
    /// A fresh, empty replica at generation 0 / cursor 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key's current raw (still-encoded) value.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    /// Number of live (non-tombstoned) keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the replica holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over all raw key/value pairs, e.g. for a facade-level full
    /// snapshot or a nested-dump re-serialization.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.data.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Generation of the full dump currently reflected in `data`.
    pub fn seen_full_dump(&self) -> u64 {
        self.seen_full_dump
    }

    /// Byte offset up to which the stream has been replayed locally.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Whether a parse/deserialize failure has forced a reload on next
    /// catch-up (spec.md §4.5 Recovery).
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn mark_stale(&mut self) {
        self.stale = true;
    }

    fn clear_stale(&mut self) {
        self.stale = false;
    }

    fn apply_record(&mut self, record: &stream::ParsedRecord<'_>) -> ShmResult<()> {
        self.apply_pending(record.marker, record.payload)
    }

    /// Apply a single SET/DELETE record directly, bypassing the stream
    /// entirely — used when a record can never fit the stream buffer and
    /// is folded straight into a full dump instead (spec.md §4.3 step 4).
    pub fn apply_pending(&mut self, marker: u8, payload: &[u8]) -> ShmResult<()> {
        match marker {
            stream::SET => {
                let (key, value) = stream::decode_set_payload(payload)?;
                self.data.insert(key.to_vec(), value.to_vec());
            }
            stream::DELETE => {
                self.data.remove(payload);
            }
            other => {
                return Err(ShmError::ParseError {
                    reason: format!("unknown marker {other} in pending record"),
                });
            }
        }
        Ok(())
    }

    fn load_full_dump(&mut self, blob: &[u8], generation: u64) -> ShmResult<()> {
        let entries = dump::decode_full_dump(blob)?;
        self.data = entries.into_iter().collect();
        self.seen_full_dump = generation;
        self.cursor = 0;
        Ok(())
    }

    /// Directly install a freshly-built map (used by `dump()`/`load(force)`
    /// on the writer side, which already holds the data it just wrote).
    pub fn install(&mut self, data: HashMap<Vec<u8>, Vec<u8>>, generation: u64) {
        self.data = data;
        self.seen_full_dump = generation;
        self.cursor = 0;
        self.clear_stale();
    }
}

/// Bring `replica` up to date with the shared state exposed by `ctx`.
///
/// Fast path: two acquire-ordered unlocked reads that match the cached
/// `(seen_full_dump, cursor)` prove nothing has changed — return without
/// taking the lock. Otherwise acquire the IPL, re-read, reload the full
/// dump if the generation moved, and replay stream records up to the
/// (re-read) stream position.
pub fn catch_up<C: CatchUpContext>(ctx: &C, replica: &mut Replica) -> ShmResult<()> {
    let remote_gen = ctx.full_dump_counter();
    let remote_pos = ctx.update_stream_position();
    if !replica.is_stale() && remote_gen == replica.seen_full_dump && remote_pos == replica.cursor {
        return Ok(());
    }

    ctx.acquire_lock()?;
    let result = (|| -> ShmResult<()> {
        let remote_gen = ctx.full_dump_counter();
        if replica.is_stale() || remote_gen != replica.seen_full_dump {
            let name = ctx.read_full_dump_name();
            let blob = ctx.load_full_dump_blob(&name)?;
            replica.load_full_dump(&blob, remote_gen)?;
        }

        let stream_bytes = ctx.stream_bytes();
        let target = ctx.update_stream_position();
        while replica.cursor < target {
            let record = stream::parse_record_at(&stream_bytes, replica.cursor as usize)?;
            replica.apply_record(&record)?;
            replica.cursor += record.total_len as u64;
        }
        replica.clear_stale();
        Ok(())
    })();

    if result.is_err() {
        replica.mark_stale();
    }
    ctx.release_lock()?;
    result
}
