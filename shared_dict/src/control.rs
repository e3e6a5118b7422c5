//! The Control Block: a fixed-layout typed view over the control segment.
//!
//! Holds the IPL state, the full-dump generation/name, and the stream
//! write cursor. All fields are little-endian and are written only while
//! holding the Inter-Process Lock; they may be *read* without the lock as
//! monotonic hints, validated by the replay loop's locked re-read
//! (spec.md §3, §4.5).

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

/// Maximum length, in bytes, of a full-dump segment name.
pub const MAX_DUMP_NAME_LEN: usize = 256;

/// Sentinel written into `shared_lock_flag` for the fork-inherited fast
/// lock variant.
pub const LOCK_VARIANT_FAST: u8 = 0;
/// Sentinel written into `shared_lock_flag` for the atomics-based spin
/// lock variant.
pub const LOCK_VARIANT_SHARED: u8 = 1;

/// Raw, cache-line-aligned layout of the control segment.
///
/// This type is never owned directly — it is always accessed through a
/// reference overlaid onto a [`crate::segment::SharedMemorySegment`]'s
/// mapped bytes (see [`ControlBlock::overlay`]/[`overlay_mut`]).
#[repr(C, align(64))]
pub struct RawControlBlock {
    /// IPL state: 0 = free, else the owning PID.
    pub lock_word: AtomicU32,
    /// Duplicate holder PID, kept for debugging/takeover diagnostics.
    pub lock_pid: AtomicU32,
    /// Which IPL variant this map uses (`LOCK_VARIANT_*`).
    pub shared_lock_flag: AtomicU8,
    /// Whether this map participates in recursive wrapping.
    pub recurse_flag: AtomicU8,
    _pad0: [u8; 2],
    /// Generation number of the newest published full dump.
    pub full_dump_counter: AtomicU64,
    /// Next free byte offset inside the stream buffer.
    pub update_stream_position: AtomicU64,
    /// Nonzero ⇒ preallocated full-dump segment size (Windows safeguard).
    pub full_dump_static_size: AtomicU64,
    /// Length, in bytes, of the name currently stored in
    /// `full_dump_memory_name`. Mutated only under the IPL.
    full_dump_name_len: AtomicU32,
    /// Name of the current full-dump SMS, length-prefixed by
    /// `full_dump_name_len`. Mutated only under the IPL; readers must hold
    /// the IPL before trusting these bytes (spec.md §4.5 catch_up).
    full_dump_memory_name: [u8; MAX_DUMP_NAME_LEN],
}

const _: () = assert!(std::mem::size_of::<RawControlBlock>() % 64 == 0);

impl RawControlBlock {
    /// Size of the control block, i.e. the minimum control-segment size.
    pub const SIZE: usize = std::mem::size_of::<RawControlBlock>();

    /// Initialize a freshly-mapped (zeroed) control block in place.
    ///
    /// # Safety
    /// `ptr` must point to at least `Self::SIZE` writable, zeroed bytes
    /// that this process exclusively owns (i.e. it just created the
    /// segment).
    pub unsafe fn init_in_place(
        ptr: *mut u8,
        shared_lock: bool,
        recurse: bool,
        full_dump_static_size: u64,
    ) -> &'static mut RawControlBlock {
        let block = unsafe { &mut *(ptr as *mut RawControlBlock) };
        block.lock_word.store(0, Ordering::Relaxed);
        block.lock_pid.store(0, Ordering::Relaxed);
        block.shared_lock_flag.store(
            if shared_lock {
                LOCK_VARIANT_SHARED
            } else {
                LOCK_VARIANT_FAST
            },
            Ordering::Relaxed,
        );
        block
            .recurse_flag
            .store(if recurse { 1 } else { 0 }, Ordering::Relaxed);
        block.full_dump_counter.store(0, Ordering::Relaxed);
        block.update_stream_position.store(0, Ordering::Relaxed);
        block
            .full_dump_static_size
            .store(full_dump_static_size, Ordering::Relaxed);
        block.full_dump_name_len.store(0, Ordering::Relaxed);
        block
    }

    /// Overlay a read-only control block view onto mapped bytes.
    ///
    /// # Safety
    /// `ptr` must point to at least `Self::SIZE` bytes belonging to a
    /// live control segment mapping that outlives the returned reference.
    pub unsafe fn overlay<'a>(ptr: *const u8) -> &'a RawControlBlock {
        unsafe { &*(ptr as *const RawControlBlock) }
    }

    /// Whether this map uses the shared (atomics-based) IPL variant.
    pub fn is_shared_lock(&self) -> bool {
        self.shared_lock_flag.load(Ordering::Acquire) == LOCK_VARIANT_SHARED
    }

    /// Whether this map participates in recursive wrapping.
    pub fn recurse_enabled(&self) -> bool {
        self.recurse_flag.load(Ordering::Acquire) != 0
    }

    /// Unlocked (acquire) read of the full-dump generation.
    pub fn full_dump_counter(&self) -> u64 {
        self.full_dump_counter.load(Ordering::Acquire)
    }

    /// Unlocked (acquire) read of the stream write cursor.
    pub fn update_stream_position(&self) -> u64 {
        self.update_stream_position.load(Ordering::Acquire)
    }

    /// Preallocated full-dump size, or 0 if dumps are dynamically sized.
    pub fn full_dump_static_size(&self) -> u64 {
        self.full_dump_static_size.load(Ordering::Acquire)
    }

    /// Publish a new stream position. Must be called while holding the
    /// IPL; uses a release store so readers observing the new position
    /// also observe the bytes written below it (spec.md §4.3 step 6).
    pub fn publish_stream_position(&self, pos: u64) {
        self.update_stream_position.store(pos, Ordering::Release);
    }

    /// Read the name of the current full-dump segment.
    ///
    /// Only trustworthy when called while holding the IPL (or immediately
    /// re-validated against `full_dump_counter` after acquiring it), per
    /// the catch-up protocol in spec.md §4.5.
    pub fn read_full_dump_name(&self) -> String {
        let len = self.full_dump_name_len.load(Ordering::Acquire) as usize;
        let len = len.min(MAX_DUMP_NAME_LEN);
        String::from_utf8_lossy(&self.full_dump_memory_name[..len]).into_owned()
    }

    /// Write a new full-dump segment name. Caller must hold the IPL.
    /// This must happen-before `bump_full_dump_counter` per the ordering
    /// spec.md §4.4 step 4 requires.
    ///
    /// # Safety
    /// Caller must hold the IPL and have exclusive mutable access to this
    /// control block's memory (i.e. no concurrent writer in this process).
    pub unsafe fn write_full_dump_name(&self, name: &str) -> Result<(), crate::error::ShmError> {
        if name.len() > MAX_DUMP_NAME_LEN {
            return Err(crate::error::ShmError::InvalidSize { size: name.len() });
        }
        let bytes_ptr = self.full_dump_memory_name.as_ptr() as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(name.as_ptr(), bytes_ptr, name.len());
        }
        self.full_dump_name_len
            .store(name.len() as u32, Ordering::Release);
        Ok(())
    }

    /// Increment the full-dump generation. Caller must hold the IPL and
    /// must call this *after* `write_full_dump_name` (spec.md §4.4 step 4
    /// ordering: name, then counter, then zeroed stream position).
    pub fn bump_full_dump_counter(&self) -> u64 {
        let next = self.full_dump_counter.load(Ordering::Acquire) + 1;
        self.full_dump_counter.store(next, Ordering::Release);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_block() -> Box<RawControlBlock> {
        unsafe {
            let layout = std::alloc::Layout::new::<RawControlBlock>();
            let ptr = std::alloc::alloc_zeroed(layout);
            let block = RawControlBlock::init_in_place(ptr, true, false, 0);
            Box::from_raw(block as *mut RawControlBlock)
        }
    }

    #[test]
    fn init_sets_documented_defaults() {
        let block = init_block();
        assert_eq!(block.full_dump_counter(), 0);
        assert_eq!(block.update_stream_position(), 0);
        assert!(block.is_shared_lock());
        assert!(!block.recurse_enabled());
    }

    #[test]
    fn full_dump_name_round_trips() {
        let block = init_block();
        unsafe {
            block.write_full_dump_name("psm_deadbeef").unwrap();
        }
        assert_eq!(block.read_full_dump_name(), "psm_deadbeef");
    }

    #[test]
    fn bump_counter_resets_stream_position_is_caller_responsibility() {
        let block = init_block();
        block.publish_stream_position(128);
        assert_eq!(block.bump_full_dump_counter(), 1);
        // publish_stream_position(0) is a separate call the dump protocol
        // makes; bump itself does not reset it.
        assert_eq!(block.update_stream_position(), 128);
    }

    #[test]
    fn name_too_long_is_rejected() {
        let block = init_block();
        let too_long = "x".repeat(MAX_DUMP_NAME_LEN + 1);
        let result = unsafe { block.write_full_dump_name(&too_long) };
        assert!(result.is_err());
    }
}
