//! Full-Dump Protocol: snapshot the replica into a dedicated SMS,
//! publish it, and reset the stream (spec.md §4.4).

use crate::error::{ShmError, ShmResult};
use crate::segment::SharedMemorySegment;
use rand::Rng;

/// `[item_count:6B]` header size.
const ITEM_COUNT_LEN: usize = 6;

fn read_u48_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..6].copy_from_slice(&bytes[..6]);
    u64::from_le_bytes(buf)
}

fn write_u48_le(out: &mut [u8], value: u64) {
    let bytes = value.to_le_bytes();
    out[..6].copy_from_slice(&bytes[..6]);
}

/// Encode a full dump: `item_count` followed by repeated
/// `[key_len:4B][key][value_len:4B][value]` entries.
pub fn encode_full_dump<'a>(entries: impl ExactSizeIterator<Item = (&'a [u8], &'a [u8])>) -> Vec<u8> {
    let item_count = entries.len() as u64;
    let mut out = Vec::new();
    out.extend_from_slice(&[0u8; ITEM_COUNT_LEN]);
    write_u48_le(&mut out[..ITEM_COUNT_LEN], item_count);
    for (key, value) in entries {
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
    }
    out
}

/// Decode a full-dump blob back into owned key/value byte pairs. A
/// malformed blob is reported `Fatal` (spec.md §4.5: "a corrupted full
/// dump is unrecoverable").
pub fn decode_full_dump(buf: &[u8]) -> ShmResult<Vec<(Vec<u8>, Vec<u8>)>> {
    if buf.len() < ITEM_COUNT_LEN {
        return Err(ShmError::Fatal {
            reason: "full dump shorter than item-count header".to_string(),
        });
    }
    let item_count = read_u48_le(&buf[..ITEM_COUNT_LEN]) as usize;
    let mut entries = Vec::with_capacity(item_count);
    let mut pos = ITEM_COUNT_LEN;

    for _ in 0..item_count {
        let key_len = read_len_prefix(buf, &mut pos)?;
        let key = read_bytes(buf, &mut pos, key_len)?;
        let value_len = read_len_prefix(buf, &mut pos)?;
        let value = read_bytes(buf, &mut pos, value_len)?;
        entries.push((key, value));
    }
    Ok(entries)
}

fn read_len_prefix(buf: &[u8], pos: &mut usize) -> ShmResult<usize> {
    if *pos + 4 > buf.len() {
        return Err(ShmError::Fatal {
            reason: "full dump truncated reading a length prefix".to_string(),
        });
    }
    let len = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    Ok(len)
}

fn read_bytes(buf: &[u8], pos: &mut usize, len: usize) -> ShmResult<Vec<u8>> {
    if *pos + len > buf.len() {
        return Err(ShmError::Fatal {
            reason: "full dump truncated reading an entry".to_string(),
        });
    }
    let out = buf[*pos..*pos + len].to_vec();
    *pos += len;
    Ok(out)
}

/// A random full-dump segment name, `psm_<16 hex digits>`.
pub fn random_dump_name() -> String {
    let suffix: u64 = rand::thread_rng().r#gen();
    format!("psm_{suffix:016x}")
}

/// Allocate a brand-new SMS sized to `blob` and copy it in. Used when no
/// (or an insufficient) preallocated full-dump segment exists.
pub fn publish_dynamic_dump(blob: &[u8]) -> ShmResult<SharedMemorySegment> {
    let name = random_dump_name();
    let mut segment = SharedMemorySegment::create(&name, blob.len().max(1))?;
    segment.as_mut_slice()[..blob.len()].copy_from_slice(blob);
    Ok(segment)
}

/// Write `blob` into an already-allocated, preallocated full-dump
/// segment, reusing its name across successive dumps (spec.md §4.4 step
/// 2, and the "static full dump" testable scenario).
pub fn write_into_static_dump(segment: &mut SharedMemorySegment, blob: &[u8]) -> ShmResult<()> {
    if blob.len() > segment.size() {
        return Err(ShmError::InvalidSize { size: blob.len() });
    }
    segment.as_mut_slice()[..blob.len()].copy_from_slice(blob);
    Ok(())
}
