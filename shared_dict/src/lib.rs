//! # `shared_dict`
//!
//! A synchronized, streaming key-value map shared live across OS processes
//! through named POSIX shared memory (`/dev/shm`), with no broker process
//! and no network transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Process A   │   │  Process B   │   │  Process C   │
//! │  SharedMap   │   │  SharedMap   │   │  SharedMap   │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │                  │                  │
//!        ▼                  ▼                  ▼
//!  ┌─────────────────────────────────────────────────┐
//!  │ Control Segment  [lock | counters | dump name]   │
//!  ├─────────────────────────────────────────────────┤
//!  │ Stream Segment   [SET/DELETE record log]         │
//!  ├─────────────────────────────────────────────────┤
//!  │ Full-Dump Segment(s) [snapshot blob, rotated]     │
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! Each [`SharedMap`] owns its own handles onto this layout — there is no
//! process-wide registry. Writers append `SET`/`DELETE` records to the
//! stream under the Inter-Process Lock (IPL); once the stream segment
//! fills, the writer snapshots the replica into a fresh (or reused, if
//! preallocated) full-dump segment and resets the stream. Every map keeps
//! a local [`Replica`](replica::Replica) that `catch_up` brings back in
//! sync: an unlocked fast-path check first, a locked re-read and replay
//! only when something actually changed.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shared_dict::{JsonSerializer, MapConfig, SharedMap};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut map = SharedMap::new(MapConfig {
//!     name: Some("my_app_state".to_string()),
//!     ..MapConfig::default()
//! })?;
//!
//! let codec = JsonSerializer;
//! map.set(&codec, &"counter".to_string(), &1i64)?;
//! let value: Option<i64> = map.get(&codec, &"counter".to_string())?;
//! assert_eq!(value, Some(1));
//! # Ok(())
//! # }
//! ```
//!
//! A second process attaching to the same name observes the update after
//! its next `get`/`set`/`apply_update` call:
//!
//! ```rust,no_run
//! use shared_dict::{CreateMode, JsonSerializer, MapConfig, SharedMap};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = SharedMap::new(MapConfig {
//!     name: Some("my_app_state".to_string()),
//!     create: CreateMode::MustAttach,
//!     ..MapConfig::default()
//! })?;
//! let codec = JsonSerializer;
//! let value: Option<i64> = reader.get(&codec, &"counter".to_string())?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```
//!
//! ## Façade and recursive wrapping
//!
//! [`facade::Map`] pairs a [`SharedMap`] with one [`Serializer`] for both
//! keys and values, for callers that want ordinary container ergonomics
//! instead of passing a codec to every call. [`recurse::RecursiveMap`]
//! layers nested child maps on top, registering each child's segment name
//! so a single top-level `unlink_cascade()` tears down the whole tree.
//! Neither module carries any synchronization logic of its own — both
//! delegate entirely into the core.
//!
//! ## Error handling
//!
//! Every fallible operation returns [`ShmResult<T>`], a `Result<T,
//! ShmError>`. `ShmError` distinguishes failures a caller can usefully act
//! on (`AlreadyExists`, `NotFound`, `CannotAcquireLock{blocking_pid}`,
//! `CannotAcquireLockTimeout`, `ValueTooLarge`) from unrecoverable ones
//! (`Fatal`, for a corrupted full dump or a cyclic recursive wrap) and from
//! ambient I/O/syscall failures (`Io`, `Nix`).
//!
//! ## Thread safety
//!
//! `SharedMap`, `FastLock` and `SharedLock` are `Send + Sync` and may be
//! shared (behind a `Mutex` or similar) across threads within one process;
//! the IPL itself only arbitrates across processes/threads attached to the
//! same segment, so a single `SharedMap` value still needs external
//! synchronization if called concurrently from multiple threads in the
//! same process.
//!
//! ## Platform support
//!
//! Linux (`/dev/shm`) only, matching the teacher crate's platform layer.
//! The [`platform`] module boundary exists so a Windows backend
//! (`CreateFileMapping`/`MapViewOfFile`) could be added without touching
//! callers; see DESIGN.md for the open question this leaves unresolved.

pub mod config;
pub mod control;
pub mod dump;
pub mod error;
pub mod facade;
pub mod lock;
pub mod map;
pub mod platform;
pub mod recurse;
pub mod replica;
pub mod segment;
pub mod serializer;
pub mod stream;

pub use config::{CreateMode, MapConfig};
pub use error::{ShmError, ShmResult};
pub use facade::Map;
pub use lock::{FastLock, InterProcessLock, SharedLock};
pub use map::{MapStatus, SharedMap};
pub use recurse::RecursiveMap;
pub use replica::Replica;
pub use segment::SharedMemorySegment;
pub use serializer::{JsonSerializer, Serializer};

/// Initialize `tracing` with an env-filter-driven subscriber, matching the
/// teacher crate's logging convention. Intended for binaries/examples, not
/// library consumers who already configure their own subscriber.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
