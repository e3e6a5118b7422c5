//! Error types for the cross-process map.

use thiserror::Error;

/// Errors that can occur during shared-memory map operations.
#[derive(Error, Debug)]
pub enum ShmError {
    /// A segment with this name already exists.
    #[error("segment already exists: {name}")]
    AlreadyExists {
        /// Segment name.
        name: String,
    },

    /// No segment with this name could be found.
    #[error("segment not found: {name}")]
    NotFound {
        /// Segment name.
        name: String,
    },

    /// Requested segment size is outside the allowed range or not
    /// page-aligned.
    #[error("invalid segment size: {size} bytes")]
    InvalidSize {
        /// Attempted size in bytes.
        size: usize,
    },

    /// The non-blocking lock could not be acquired; another PID holds it.
    #[error("cannot acquire lock, held by pid {blocking_pid}")]
    CannotAcquireLock {
        /// PID currently holding the lock.
        blocking_pid: u32,
    },

    /// A blocking lock acquire exceeded its timeout without stealing.
    #[error("lock acquire timed out")]
    CannotAcquireLockTimeout,

    /// An update record in the stream could not be parsed. The replica is
    /// marked stale and will force a full-dump reload on the next catch-up.
    #[error("malformed update record: {reason}")]
    ParseError {
        /// Human-readable description of what was wrong with the record.
        reason: String,
    },

    /// The caller's encoder/decoder raised an error.
    #[error("serializer error: {reason}")]
    SerializerError {
        /// Description of the failure, as reported by the caller's codec.
        reason: String,
    },

    /// A single record exceeds the implementation's hard per-record ceiling.
    #[error("value too large: {size} bytes exceeds max_record ({max_record})")]
    ValueTooLarge {
        /// Size of the record payload that was rejected.
        size: usize,
        /// The configured ceiling.
        max_record: usize,
    },

    /// Unrecoverable corruption — e.g. a full dump that fails to
    /// deserialize. The replica is marked permanently stale.
    #[error("fatal: {reason}")]
    Fatal {
        /// Description of the unrecoverable condition.
        reason: String,
    },

    /// IO error from the underlying filesystem/mmap operations.
    #[error("IO error: {source}")]
    Io {
        /// Source IO error.
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error.
    #[error("system call error: {source}")]
    Nix {
        /// Source nix error.
        #[from]
        source: nix::Error,
    },
}

/// Result type for shared-memory map operations.
pub type ShmResult<T> = Result<T, ShmError>;
