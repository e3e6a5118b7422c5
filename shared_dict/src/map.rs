//! `SharedMap`: the core cross-process synchronization engine tying
//! together the SMS, Control Block, IPL, Update Stream, Full-Dump
//! Protocol, and Replica (spec.md §4, §6).
//!
//! No global registry: every `SharedMap` owns its segments and lock
//! independently (spec.md §9 Design Notes) — unlike the teacher crate's
//! process-wide `lifecycle::GLOBAL_CLEANUP` singleton, which this crate
//! deliberately does not carry over (see DESIGN.md).

use crate::config::{CreateMode, MapConfig};
use crate::control::RawControlBlock;
use crate::dump;
use crate::error::{ShmError, ShmResult};
use crate::lock::{FastLock, InterProcessLock, SharedLock};
use crate::replica::{CatchUpContext, Replica, catch_up};
use crate::segment::SharedMemorySegment;
use crate::stream;
use std::time::Duration;

enum Lock {
    Fast(FastLock),
    Shared(SharedLock),
}

impl InterProcessLock for Lock {
    fn acquire(&self, block: bool, timeout: Option<Duration>, steal: bool) -> ShmResult<()> {
        match self {
            Lock::Fast(l) => l.acquire(block, timeout, steal),
            Lock::Shared(l) => l.acquire(block, timeout, steal),
        }
    }

    fn release(&self) -> ShmResult<()> {
        match self {
            Lock::Fast(l) => l.release(),
            Lock::Shared(l) => l.release(),
        }
    }

    fn locked_by(&self) -> u32 {
        match self {
            Lock::Fast(l) => l.locked_by(),
            Lock::Shared(l) => l.locked_by(),
        }
    }
}

/// Diagnostic snapshot returned by [`SharedMap::status`].
#[derive(Debug, Clone)]
pub struct MapStatus {
    /// Control segment name.
    pub name: String,
    /// Stream segment name (`<name>_memory`).
    pub stream_name: String,
    /// Current full-dump segment name, if any dump has been published yet.
    pub full_dump_name: String,
    /// Stream buffer capacity in bytes.
    pub buffer_size: usize,
    /// `full_dump_counter` as last observed (unlocked read).
    pub full_dump_counter: u64,
    /// `update_stream_position` as last observed (unlocked read).
    pub update_stream_position: u64,
    /// This process's locally-cached replay cursor.
    pub local_cursor: u64,
    /// Generation this process's replica reflects.
    pub local_seen_full_dump: u64,
    /// Number of live keys in the local replica.
    pub len: usize,
    /// PID currently holding the IPL, or 0 if free.
    pub locked_by: u32,
}

/// A cross-process synchronized map attached to (or creating) one named
/// shared-memory segment pair.
pub struct SharedMap {
    config: MapConfig,
    control_segment: SharedMemorySegment,
    stream_segment: SharedMemorySegment,
    lock: Lock,
    static_dump_segment: Option<SharedMemorySegment>,
    dynamic_dump_segment: Option<SharedMemorySegment>,
    previous_dump_segment: Option<SharedMemorySegment>,
    replica: Replica,
}

fn random_name() -> String {
    use rand::Rng;
    let suffix: u64 = rand::thread_rng().r#gen();
    format!("shdict_{suffix:016x}")
}

impl SharedMap {
    /// Create, attach, or create-or-attach a map per `config.create`
    /// (spec.md §6 Construction Parameters).
    pub fn new(config: MapConfig) -> ShmResult<Self> {
        config
            .validate()
            .map_err(|reason| ShmError::Fatal { reason })?;

        let name = config.name.clone().unwrap_or_else(random_name);
        let stream_name = format!("{name}_memory");

        let control_size = RawControlBlock::SIZE + crate::lock::FAST_MUTEX_SIZE;

        match config.create {
            CreateMode::MustCreate => Self::create(config, &name, &stream_name, control_size),
            CreateMode::MustAttach => Self::attach(config, &name, &stream_name),
            CreateMode::CreateOrAttach => {
                match Self::create(config.clone(), &name, &stream_name, control_size) {
                    Ok(map) => Ok(map),
                    Err(ShmError::AlreadyExists { .. }) => Self::attach(config, &name, &stream_name),
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn create(
        config: MapConfig,
        name: &str,
        stream_name: &str,
        control_size: usize,
    ) -> ShmResult<Self> {
        let mut control_segment = SharedMemorySegment::create(name, control_size)?;
        let stream_segment = SharedMemorySegment::create(stream_name, config.buffer_size)?;

        let control_ptr = control_segment.as_mut_ptr();
        unsafe {
            RawControlBlock::init_in_place(
                control_ptr,
                config.shared_lock,
                config.recurse,
                config.full_dump_size,
            );
        }

        let lock = Self::build_lock(&config, control_ptr)?;

        let static_dump_segment = if config.full_dump_size > 0 {
            Some(SharedMemorySegment::create(
                &dump::random_dump_name(),
                config.full_dump_size as usize,
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            control_segment,
            stream_segment,
            lock,
            static_dump_segment,
            dynamic_dump_segment: None,
            previous_dump_segment: None,
            replica: Replica::new(),
        })
    }

    fn attach(config: MapConfig, name: &str, stream_name: &str) -> ShmResult<Self> {
        let control_segment = SharedMemorySegment::attach(name)?;
        let stream_segment = SharedMemorySegment::attach(stream_name)?;

        let control_ptr = control_segment.as_ptr() as *mut u8;
        let existing = unsafe { RawControlBlock::overlay(control_ptr) };
        let lock = if existing.is_shared_lock() {
            unsafe { Lock::Shared(SharedLock::new(control_ptr as *const RawControlBlock, Duration::from_millis(config.poll_interval_ms))) }
        } else {
            let mutex_ptr = unsafe { control_ptr.add(RawControlBlock::SIZE) };
            unsafe { Lock::Fast(FastLock::attach(mutex_ptr)) }
        };

        Ok(Self {
            config,
            control_segment,
            stream_segment,
            lock,
            static_dump_segment: None,
            dynamic_dump_segment: None,
            previous_dump_segment: None,
            replica: Replica::new(),
        })
    }

    fn build_lock(config: &MapConfig, control_ptr: *mut u8) -> ShmResult<Lock> {
        if config.shared_lock {
            Ok(unsafe {
                Lock::Shared(SharedLock::new(
                    control_ptr as *const RawControlBlock,
                    Duration::from_millis(config.poll_interval_ms),
                ))
            })
        } else {
            let mutex_ptr = unsafe { control_ptr.add(RawControlBlock::SIZE) };
            Ok(unsafe { Lock::Fast(FastLock::init_in_place(mutex_ptr)?) })
        }
    }

    fn control(&self) -> &RawControlBlock {
        unsafe { RawControlBlock::overlay(self.control_segment.as_ptr()) }
    }

    /// This map's own control-segment name.
    pub fn name(&self) -> &str {
        self.control_segment.name()
    }

    /// A full snapshot of every live (still-encoded) key/value pair, after
    /// catching up with the shared state. Used by `facade.rs`; iteration
    /// order is unspecified.
    pub fn snapshot_raw(&mut self) -> ShmResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.apply_update()?;
        Ok(self
            .replica
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect())
    }

    /// Bring the local replica up to date with the shared state.
    ///
    /// A `ParseError` hit while replaying the stream marks the replica
    /// stale and is retried once internally — the retry forces a full-dump
    /// reload rather than a stream replay, since `catch_up`'s fast path is
    /// skipped once `is_stale()` is set (spec.md §7: "the original caller's
    /// read is retried once internally before any error escapes").
    pub fn apply_update(&mut self) -> ShmResult<()> {
        let mut replica = std::mem::take(&mut self.replica);
        let mut result = catch_up(self, &mut replica);
        if matches!(result, Err(ShmError::ParseError { .. })) {
            result = catch_up(self, &mut replica);
        }
        self.replica = replica;
        result
    }

    /// Look up a key's decoded value.
    pub fn get<K, V, S>(&mut self, codec: &S, key: &K) -> ShmResult<Option<V>>
    where
        S: crate::serializer::Serializer<K> + crate::serializer::Serializer<V>,
    {
        self.apply_update()?;
        let encoded_key = crate::serializer::wrap_encode::<K, S>(codec, key)?;
        match self.replica.get(&encoded_key) {
            Some(bytes) => Ok(Some(crate::serializer::wrap_decode::<V, S>(codec, bytes)?)),
            None => Ok(None),
        }
    }

    /// Set a key's value, appending a SET record and applying it locally.
    pub fn set<K, V, S>(&mut self, codec: &S, key: &K, value: &V) -> ShmResult<()>
    where
        S: crate::serializer::Serializer<K> + crate::serializer::Serializer<V>,
    {
        self.apply_update()?;
        let encoded_key = crate::serializer::wrap_encode::<K, S>(codec, key)?;
        let encoded_value = crate::serializer::wrap_encode::<V, S>(codec, value)?;
        let payload = stream::encode_set_payload(&encoded_key, &encoded_value);
        self.append(stream::SET, &payload)?;
        self.apply_update()
    }

    /// Delete a key, appending a DELETE (tombstone) record.
    pub fn delete<K, S>(&mut self, codec: &S, key: &K) -> ShmResult<()>
    where
        S: crate::serializer::Serializer<K>,
    {
        self.apply_update()?;
        let encoded_key = crate::serializer::wrap_encode::<K, S>(codec, key)?;
        self.append(stream::DELETE, &encoded_key)?;
        self.apply_update()
    }

    /// Number of live keys in the local replica (after a catch-up).
    pub fn len(&mut self) -> ShmResult<usize> {
        self.apply_update()?;
        Ok(self.replica.len())
    }

    /// Whether the local replica (after a catch-up) holds no keys.
    pub fn is_empty(&mut self) -> ShmResult<bool> {
        self.apply_update()?;
        Ok(self.replica.is_empty())
    }

    /// The update-stream append algorithm (spec.md §4.3's 7 steps).
    fn append(&mut self, marker: u8, payload: &[u8]) -> ShmResult<()> {
        let max_record = self.config.effective_max_record();
        if payload.len() > max_record {
            return Err(ShmError::ValueTooLarge {
                size: payload.len(),
                max_record,
            });
        }

        self.lock.acquire(true, None, false)?;
        let result = self.append_locked(marker, payload);
        self.lock.release()?;
        result
    }

    fn append_locked(&mut self, marker: u8, payload: &[u8]) -> ShmResult<()> {
        let need = stream::needed_space(payload.len());
        if need > self.stream_segment.size() {
            // This record can never fit the stream buffer, no matter how
            // many times it is reset to position 0 — looping on
            // `run_full_dump_locked` here would spin forever while holding
            // the IPL. Spec.md §4.3 step 4: fold it directly into a full
            // dump instead, bypassing the stream entirely.
            return self.run_full_dump_locked_with_pending(marker, payload);
        }
        loop {
            let pos = self.control().update_stream_position() as usize;
            if pos + need > self.stream_segment.size() {
                self.run_full_dump_locked()?;
                continue;
            }
            stream::write_record(self.stream_segment.as_mut_slice(), pos, marker, payload);
            self.control().publish_stream_position((pos + need) as u64);
            return Ok(());
        }
    }

    /// Force the Full-Dump Protocol (spec.md §4.4), independent of
    /// overflow — the public `dump()` operation.
    pub fn dump(&mut self) -> ShmResult<()> {
        self.apply_update()?;
        self.lock.acquire(true, None, false)?;
        let result = self.run_full_dump_locked();
        self.lock.release()?;
        result
    }

    fn run_full_dump_locked(&mut self) -> ShmResult<()> {
        self.catch_up_before_dump_locked()?;
        self.publish_full_dump_locked()
    }

    /// Same as `run_full_dump_locked`, but first folds one SET/DELETE
    /// record directly into the caught-up replica before snapshotting it —
    /// for a record too large to ever fit the stream buffer (see
    /// `append_locked`).
    fn run_full_dump_locked_with_pending(&mut self, marker: u8, payload: &[u8]) -> ShmResult<()> {
        self.catch_up_before_dump_locked()?;
        self.replica.apply_pending(marker, payload)?;
        self.publish_full_dump_locked()
    }

    // Catch up first so the dump snapshots the most current state. The
    // lock is already held (reentrant per-PID), so this nested acquire is
    // a pure refcount bump, not a second real acquisition.
    fn catch_up_before_dump_locked(&mut self) -> ShmResult<()> {
        let mut replica = std::mem::take(&mut self.replica);
        let caught_up = catch_up(self, &mut replica);
        self.replica = replica;
        caught_up
    }

    fn publish_full_dump_locked(&mut self) -> ShmResult<()> {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self
            .replica
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        let blob = dump::encode_full_dump(entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())));

        let fits_static = match &self.static_dump_segment {
            Some(segment) => blob.len() <= segment.size(),
            None => false,
        };
        let new_name = if fits_static {
            let segment = self.static_dump_segment.as_mut().unwrap();
            dump::write_into_static_dump(segment, &blob)?;
            segment.name().to_string()
        } else {
            self.publish_dynamic(&blob)?
        };

        unsafe {
            self.control().write_full_dump_name(&new_name)?;
        }
        self.control().bump_full_dump_counter();
        self.control().publish_stream_position(0);

        Ok(())
    }

    fn publish_dynamic(&mut self, blob: &[u8]) -> ShmResult<String> {
        let new_segment = dump::publish_dynamic_dump(blob)?;
        let name = new_segment.name().to_string();
        let old = self.dynamic_dump_segment.replace(new_segment);
        // Defer unlink of the segment we just superseded; only unlink
        // segments this process itself allocated (spec.md §4.4 step 5).
        self.previous_dump_segment = old;
        Ok(name)
    }

    /// Reload the current full dump. If `force`, reloads even if this
    /// process's `seen_full_dump` already matches.
    pub fn load(&mut self, force: bool) -> ShmResult<()> {
        if force {
            self.lock.acquire(true, None, false)?;
            let name = self.control().read_full_dump_name();
            let generation = self.control().full_dump_counter();
            let blob = self.load_full_dump_blob(&name);
            let result = blob.and_then(|blob| {
                let entries = dump::decode_full_dump(&blob)?;
                self.replica.install(entries.into_iter().collect(), generation);
                Ok(())
            });
            self.lock.release()?;
            result
        } else {
            self.apply_update()
        }
    }

    fn load_full_dump_blob(&self, name: &str) -> ShmResult<Vec<u8>> {
        if name.is_empty() {
            return Ok(Vec::new());
        }
        let segment = SharedMemorySegment::attach(name)?;
        Ok(segment.as_slice().to_vec())
    }

    /// A diagnostic snapshot of this map's current state.
    pub fn status(&mut self) -> ShmResult<MapStatus> {
        self.apply_update()?;
        Ok(MapStatus {
            name: self.control_segment.name().to_string(),
            stream_name: self.stream_segment.name().to_string(),
            full_dump_name: self.control().read_full_dump_name(),
            buffer_size: self.stream_segment.size(),
            full_dump_counter: self.control().full_dump_counter(),
            update_stream_position: self.control().update_stream_position(),
            local_cursor: self.replica.cursor(),
            local_seen_full_dump: self.replica.seen_full_dump(),
            len: self.replica.len(),
            locked_by: self.lock.locked_by(),
        })
    }

    /// Catch up, then detach this process's SMS handles and return the
    /// replica's contents as encoded raw key/value pairs. Like every other
    /// externally observable operation (spec.md §4.5), `close()` begins
    /// with catch-up rather than returning whatever the replica happened
    /// to hold from the last call.
    pub fn close(mut self) -> ShmResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.apply_update()?;
        Ok(self
            .replica
            .iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect())
    }

    /// Remove this map's SMS from the OS namespace.
    pub fn unlink(&self) -> ShmResult<()> {
        SharedMemorySegment::unlink_by_name(self.control_segment.name(), true)?;
        SharedMemorySegment::unlink_by_name(self.stream_segment.name(), true)?;
        if let Some(static_segment) = &self.static_dump_segment {
            SharedMemorySegment::unlink_by_name(static_segment.name(), true)?;
        }
        if let Some(dynamic_segment) = &self.dynamic_dump_segment {
            SharedMemorySegment::unlink_by_name(dynamic_segment.name(), true)?;
        }
        Ok(())
    }
}

impl Drop for SharedMap {
    fn drop(&mut self) {
        if self.config.auto_unlink {
            if let Err(error) = self.unlink() {
                tracing::warn!(%error, "auto_unlink failed during SharedMap teardown");
            }
        }
    }
}

impl CatchUpContext for SharedMap {
    fn full_dump_counter(&self) -> u64 {
        self.control().full_dump_counter()
    }

    fn update_stream_position(&self) -> u64 {
        self.control().update_stream_position()
    }

    fn read_full_dump_name(&self) -> String {
        self.control().read_full_dump_name()
    }

    fn load_full_dump_blob(&self, name: &str) -> ShmResult<Vec<u8>> {
        SharedMap::load_full_dump_blob(self, name)
    }

    fn stream_bytes(&self) -> Vec<u8> {
        self.stream_segment.as_slice().to_vec()
    }

    fn acquire_lock(&self) -> ShmResult<()> {
        self.lock.acquire(true, None, false)
    }

    fn release_lock(&self) -> ShmResult<()> {
        self.lock.release()
    }
}
