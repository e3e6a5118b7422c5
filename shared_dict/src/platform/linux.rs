//! Linux-specific shared-memory mapping and process-liveness primitives.

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::sys::signal::kill;
use nix::unistd::{Pid, getpid};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;

/// Tuning knobs for a segment's memory mapping.
#[derive(Debug, Clone, Copy)]
pub struct MapConfigHints {
    /// Populate (pre-fault) all pages at mmap time, trading a slower
    /// `create`/`attach` for no page-fault latency on first access.
    pub populate: bool,
}

impl Default for MapConfigHints {
    fn default() -> Self {
        Self { populate: true }
    }
}

/// Create a new backing file at `path` sized to `size` and map it.
///
/// Fails with `ShmError::AlreadyExists` semantics are the caller's
/// responsibility (checked before calling this, since `OpenOptions` with
/// `create_new` races are what we actually want to assert exclusivity).
pub fn create_segment_mmap(path: &str, size: usize, hints: &MapConfigHints) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o600)
        .open(path)?;

    file.set_len(size as u64)?;

    let mut options = MmapOptions::new();
    if hints.populate {
        options.populate();
    }
    let mmap = unsafe { options.map_mut(&file)? };
    Ok(mmap)
}

/// Attach to an existing backing file at `path`.
pub fn attach_segment_mmap(path: &str) -> ShmResult<MmapMut> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Remove the backing file for a segment, ignoring "not found" if asked.
pub fn unlink_path(path: &str, ignore_errors: bool) -> ShmResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && ignore_errors => Ok(()),
        Err(e) if ignore_errors => {
            tracing::debug!(error = %e, path, "ignoring unlink failure");
            Ok(())
        }
        Err(e) => Err(ShmError::Io { source: e }),
    }
}

/// Check whether a backing file currently exists.
pub fn segment_path_exists(path: &str) -> bool {
    std::path::Path::new(path).exists()
}

/// Check if a process is alive via a null signal (`kill(pid, 0)`).
///
/// `EPERM` means the process exists but we lack permission to signal it —
/// still alive from our point of view. Any other error is treated as dead.
pub fn is_process_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::Error::EPERM) => true,
        Err(_) => false,
    }
}

/// Get the current process ID.
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}
