//! Shared Memory Segment (SMS): a named, fixed-size OS-backed byte region.
//!
//! Two SMS instances back every map (the control segment and the stream
//! buffer); a third, transient SMS is allocated on demand for each full
//! dump. This module knows nothing about the map's protocol — it only
//! creates, attaches, detaches and unlinks named byte regions.

use crate::error::{ShmError, ShmResult};
use crate::platform::{self, MapConfigHints};
use memmap2::MmapMut;

/// A named shared-memory region backing one part of a map (control block,
/// stream buffer, or a full-dump blob).
pub struct SharedMemorySegment {
    name: String,
    path: String,
    size: usize,
    created_by_us: bool,
    mmap: MmapMut,
}

fn path_for(name: &str) -> String {
    format!("/dev/shm/{name}")
}

impl SharedMemorySegment {
    /// Create a new segment. Fails with `AlreadyExists` if `name` is taken.
    pub fn create(name: &str, size: usize) -> ShmResult<Self> {
        let path = path_for(name);
        if platform::segment_path_exists(&path) {
            return Err(ShmError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let mmap = match platform::create_segment_mmap(&path, size, &MapConfigHints::default()) {
            Ok(m) => m,
            Err(ShmError::Io { source }) if source.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ShmError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            name: name.to_string(),
            path,
            size,
            created_by_us: true,
            mmap,
        })
    }

    /// Attach to an existing segment. Fails with `NotFound` if absent.
    pub fn attach(name: &str) -> ShmResult<Self> {
        let path = path_for(name);
        if !platform::segment_path_exists(&path) {
            return Err(ShmError::NotFound {
                name: name.to_string(),
            });
        }

        let mmap = platform::attach_segment_mmap(&path)?;
        let size = mmap.len();

        Ok(Self {
            name: name.to_string(),
            path,
            size,
            created_by_us: false,
            mmap,
        })
    }

    /// Remove a segment from the OS namespace by name. Existing attachers
    /// keep their mapping valid until they individually detach.
    pub fn unlink_by_name(name: &str, ignore_errors: bool) -> ShmResult<()> {
        platform::unlink_path(&path_for(name), ignore_errors)
    }

    /// Detach this process's mapping. Does not remove the segment from the
    /// OS namespace — use `unlink_by_name` for that.
    pub fn detach(self) {
        drop(self);
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total mapped size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this process created (vs. attached to) the segment.
    pub fn created_by_us(&self) -> bool {
        self.created_by_us
    }

    /// Read-only view of the full segment.
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Mutable view of the full segment.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Raw read pointer to the start of the segment.
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// Raw write pointer to the start of the segment.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!(
            "shdict_test_seg_{}_{}_{}",
            tag,
            std::process::id(),
            rand_suffix()
        )
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos() as u64
    }

    #[test]
    fn create_then_attach_round_trips_bytes() {
        let name = unique_name("roundtrip");
        {
            let mut seg = SharedMemorySegment::create(&name, 4096).unwrap();
            seg.as_mut_slice()[..5].copy_from_slice(b"hello");
        }
        let attached = SharedMemorySegment::attach(&name).unwrap();
        assert_eq!(&attached.as_slice()[..5], b"hello");
        SharedMemorySegment::unlink_by_name(&name, true).unwrap();
    }

    #[test]
    fn create_twice_fails_already_exists() {
        let name = unique_name("exclusive");
        let _first = SharedMemorySegment::create(&name, 4096).unwrap();
        let second = SharedMemorySegment::create(&name, 4096);
        assert!(matches!(second, Err(ShmError::AlreadyExists { .. })));
        SharedMemorySegment::unlink_by_name(&name, true).unwrap();
    }

    #[test]
    fn attach_missing_fails_not_found() {
        let name = unique_name("missing");
        let result = SharedMemorySegment::attach(&name);
        assert!(matches!(result, Err(ShmError::NotFound { .. })));
    }

    #[test]
    fn unlink_does_not_invalidate_existing_attachment() {
        let name = unique_name("unlink_live");
        let mut writer_seg = SharedMemorySegment::create(&name, 4096).unwrap();
        writer_seg.as_mut_slice()[0] = 42;

        let reader_seg = SharedMemorySegment::attach(&name).unwrap();
        SharedMemorySegment::unlink_by_name(&name, true).unwrap();

        // Existing attachment remains valid/readable after unlink.
        assert_eq!(reader_seg.as_slice()[0], 42);
    }
}
