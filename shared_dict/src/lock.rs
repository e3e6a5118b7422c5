//! Inter-Process Lock (IPL): the synchronization primitive protecting the
//! control block and stream buffer.
//!
//! Two interchangeable variants sit behind the same contract:
//!
//! - [`FastLock`]: an OS recursive mutex embedded in the control segment.
//!   It is created without `PTHREAD_PROCESS_SHARED`, so it is only valid
//!   for processes that inherited the mapping via `fork()` from the
//!   creator — exactly the restriction spec.md §4.2 documents for the
//!   "fast variant". Its reentrancy is tracked per *thread* by the OS
//!   mutex itself (see DESIGN.md for why this differs from the shared
//!   variant's per-*PID* reentrancy).
//! - [`SharedLock`]: a 4-byte atomic CAS spin lock living in the control
//!   block, safe across completely unrelated attaching processes.
//!
//! Both report through the same `ShmError` taxonomy: a non-blocking
//! acquire that loses the race becomes `CannotAcquireLock`, and a blocking
//! acquire that exhausts its timeout without stealing becomes
//! `CannotAcquireLockTimeout`.

use crate::control::RawControlBlock;
use crate::error::{ShmError, ShmResult};
use crate::platform::get_current_pid;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Size, in bytes, reserved in the control segment for the fast variant's
/// OS mutex (placed immediately after [`RawControlBlock`]).
pub const FAST_MUTEX_SIZE: usize = std::mem::size_of::<libc::pthread_mutex_t>();

/// The shared contract both IPL variants implement.
pub trait InterProcessLock {
    /// Attempt to acquire the lock.
    ///
    /// - `block = false`: fail immediately with `CannotAcquireLock` if
    ///   contended.
    /// - `block = true`, `timeout = None`: block indefinitely.
    /// - `block = true`, `timeout = Some(d)`: poll for up to `d`, then
    ///   either steal (if `steal_after_timeout`) or fail with
    ///   `CannotAcquireLockTimeout`.
    fn acquire(
        &self,
        block: bool,
        timeout: Option<Duration>,
        steal_after_timeout: bool,
    ) -> ShmResult<()>;

    /// Release a previously acquired lock. Reentrant acquisitions must be
    /// released the same number of times. Releasing while not the owner
    /// is a no-op.
    fn release(&self) -> ShmResult<()>;

    /// PID currently holding the lock, or 0 if free.
    fn locked_by(&self) -> u32;
}

/// Shared-memory CAS spin lock, safe across unrelated processes.
///
/// Acquire algorithm (spec.md §4.2):
/// 1. CAS `lock_word` from 0 to our PID.
/// 2. On failure and non-blocking, fail with the observed holder.
/// 3. On failure and blocking, sleep `poll_interval` (0 ⇒ yield/busy-wait)
///    and retry, tracking elapsed time against `timeout`.
/// 4. On timeout, either fail or force-steal the lock word.
pub struct SharedLock {
    control: *const RawControlBlock,
    pid: u32,
    depth: AtomicU32,
    poll_interval: Duration,
}

// SAFETY: `control` points at a live control segment mapping that outlives
// this lock (the segment is owned alongside it by `SharedMap`); all access
// through it goes through the block's own atomics.
unsafe impl Send for SharedLock {}
unsafe impl Sync for SharedLock {}

impl SharedLock {
    /// Wrap a control block's lock fields as a shared spin lock.
    ///
    /// # Safety
    /// `control` must point to a live control segment mapping that
    /// outlives this `SharedLock`.
    pub unsafe fn new(control: *const RawControlBlock, poll_interval: Duration) -> Self {
        Self {
            control,
            pid: get_current_pid(),
            depth: AtomicU32::new(0),
            poll_interval,
        }
    }

    fn control(&self) -> &RawControlBlock {
        unsafe { &*self.control }
    }

    fn try_cas_acquire(&self) -> Result<(), u32> {
        match self
            .control()
            .lock_word
            .compare_exchange(0, self.pid, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.control().lock_pid.store(self.pid, Ordering::Release);
                Ok(())
            }
            Err(current) => Err(current),
        }
    }

    fn steal(&self) {
        self.control().lock_word.store(self.pid, Ordering::Release);
        self.control().lock_pid.store(self.pid, Ordering::Release);
        tracing::warn!(pid = self.pid, "stole shared lock after timeout");
    }
}

impl InterProcessLock for SharedLock {
    fn acquire(
        &self,
        block: bool,
        timeout: Option<Duration>,
        steal_after_timeout: bool,
    ) -> ShmResult<()> {
        // Already ours? Reentrant acquisition is a pure refcount bump.
        if self.control().lock_word.load(Ordering::Acquire) == self.pid {
            self.depth.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }

        match self.try_cas_acquire() {
            Ok(()) => {
                self.depth.store(1, Ordering::Release);
                return Ok(());
            }
            Err(holder) => {
                if !block {
                    return Err(ShmError::CannotAcquireLock {
                        blocking_pid: holder,
                    });
                }
            }
        }

        let start = Instant::now();
        loop {
            match self.try_cas_acquire() {
                Ok(()) => {
                    self.depth.store(1, Ordering::Release);
                    return Ok(());
                }
                Err(_holder) => {
                    if let Some(timeout) = timeout {
                        if start.elapsed() >= timeout {
                            if steal_after_timeout {
                                self.steal();
                                self.depth.store(1, Ordering::Release);
                                return Ok(());
                            }
                            return Err(ShmError::CannotAcquireLockTimeout);
                        }
                    }
                    if self.poll_interval.is_zero() {
                        std::thread::yield_now();
                    } else {
                        std::thread::sleep(self.poll_interval);
                    }
                }
            }
        }
    }

    fn release(&self) -> ShmResult<()> {
        if self.control().lock_word.load(Ordering::Acquire) != self.pid {
            tracing::warn!(pid = self.pid, "release() by non-owner ignored");
            return Ok(());
        }
        let remaining = self.depth.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            // Only the owning PID may clear the word; mismatch (another
            // process stole it between our load and this store) is
            // harmless since we only get here after confirming ownership
            // above and nobody else can overwrite lock_pid concurrently
            // without first winning the CAS we just lost.
            let _ = self.control().lock_word.compare_exchange(
                self.pid,
                0,
                Ordering::Release,
                Ordering::Relaxed,
            );
        }
        Ok(())
    }

    fn locked_by(&self) -> u32 {
        self.control().lock_word.load(Ordering::Acquire)
    }
}

/// OS recursive mutex embedded in the control segment, valid only for
/// processes descended (via `fork`) from the creator.
pub struct FastLock {
    raw: *mut libc::pthread_mutex_t,
    owner_hint: AtomicU32,
}

// SAFETY: the underlying pthread_mutex_t is designed for concurrent access
// from multiple threads/processes; we only ever hand out `&FastLock` and
// serialize all mutation through the mutex itself.
unsafe impl Send for FastLock {}
unsafe impl Sync for FastLock {}

impl FastLock {
    /// Initialize a recursive mutex in place at `ptr`, which must point to
    /// at least `FAST_MUTEX_SIZE` writable bytes owned by this process
    /// (i.e. we are the segment's creator).
    ///
    /// # Safety
    /// `ptr` must be valid, writable, and live for as long as any
    /// `FastLock` built from it.
    pub unsafe fn init_in_place(ptr: *mut u8) -> ShmResult<Self> {
        let raw = ptr as *mut libc::pthread_mutex_t;
        unsafe {
            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            if libc::pthread_mutexattr_init(&mut attr) != 0 {
                return Err(ShmError::Fatal {
                    reason: "pthread_mutexattr_init failed".into(),
                });
            }
            libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE);
            if libc::pthread_mutex_init(raw, &attr) != 0 {
                libc::pthread_mutexattr_destroy(&mut attr);
                return Err(ShmError::Fatal {
                    reason: "pthread_mutex_init failed".into(),
                });
            }
            libc::pthread_mutexattr_destroy(&mut attr);
        }
        Ok(Self {
            raw,
            owner_hint: AtomicU32::new(0),
        })
    }

    /// Attach to an already-initialized recursive mutex at `ptr` (inherited
    /// via fork from the creator).
    ///
    /// # Safety
    /// `ptr` must point to a live, already-`init_in_place`d mutex, and this
    /// process must share the creator's address space lineage via fork.
    pub unsafe fn attach(ptr: *mut u8) -> Self {
        Self {
            raw: ptr as *mut libc::pthread_mutex_t,
            owner_hint: AtomicU32::new(0),
        }
    }
}

impl InterProcessLock for FastLock {
    fn acquire(
        &self,
        block: bool,
        timeout: Option<Duration>,
        steal_after_timeout: bool,
    ) -> ShmResult<()> {
        // PTHREAD_MUTEX_RECURSIVE already permits same-thread reentrancy;
        // we only need to race the first lock attempt against block/timeout.
        if !block {
            let rc = unsafe { libc::pthread_mutex_trylock(self.raw) };
            if rc == 0 {
                self.owner_hint.store(get_current_pid(), Ordering::Release);
                return Ok(());
            }
            return Err(ShmError::CannotAcquireLock {
                blocking_pid: self.owner_hint.load(Ordering::Acquire),
            });
        }

        match timeout {
            None => {
                let rc = unsafe { libc::pthread_mutex_lock(self.raw) };
                if rc != 0 {
                    return Err(ShmError::Fatal {
                        reason: format!("pthread_mutex_lock failed: {rc}"),
                    });
                }
                self.owner_hint.store(get_current_pid(), Ordering::Release);
                Ok(())
            }
            Some(timeout) => {
                let start = Instant::now();
                loop {
                    let rc = unsafe { libc::pthread_mutex_trylock(self.raw) };
                    if rc == 0 {
                        self.owner_hint.store(get_current_pid(), Ordering::Release);
                        return Ok(());
                    }
                    if start.elapsed() >= timeout {
                        if steal_after_timeout {
                            // A process-private recursive mutex has no
                            // portable "force unlock" — the closest
                            // faithful approximation is re-initializing it,
                            // which is only safe because this variant is
                            // documented as fork-descendant-only (no other
                            // lineage can be mid-critical-section across an
                            // unrelated, truly dead holder).
                            unsafe {
                                libc::pthread_mutex_destroy(self.raw);
                                let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
                                libc::pthread_mutexattr_init(&mut attr);
                                libc::pthread_mutexattr_settype(
                                    &mut attr,
                                    libc::PTHREAD_MUTEX_RECURSIVE,
                                );
                                libc::pthread_mutex_init(self.raw, &attr);
                                libc::pthread_mutexattr_destroy(&mut attr);
                                libc::pthread_mutex_lock(self.raw);
                            }
                            self.owner_hint.store(get_current_pid(), Ordering::Release);
                            return Ok(());
                        }
                        return Err(ShmError::CannotAcquireLockTimeout);
                    }
                    std::thread::sleep(Duration::from_micros(100));
                }
            }
        }
    }

    fn release(&self) -> ShmResult<()> {
        let rc = unsafe { libc::pthread_mutex_unlock(self.raw) };
        if rc != 0 {
            tracing::warn!(rc, "pthread_mutex_unlock returned non-zero");
        }
        Ok(())
    }

    fn locked_by(&self) -> u32 {
        self.owner_hint.load(Ordering::Acquire)
    }
}
