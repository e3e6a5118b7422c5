//! Construction parameters for a [`crate::map::SharedMap`].

use serde::{Deserialize, Serialize};

fn default_buffer_size() -> usize {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    0
}

/// Whether a map must create, must attach, or may do either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    /// Fail with `AlreadyExists` if the segment already exists.
    MustCreate,
    /// Fail with `NotFound` if the segment does not exist.
    MustAttach,
    /// Create if absent, otherwise attach.
    CreateOrAttach,
}

/// Construction parameters for a map instance (spec's External Interfaces
/// table). Deserializable so a process can externalize these in a TOML
/// file via [`MapConfig::from_toml`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapConfig {
    /// Explicit shared-memory name. Random (`shdict_<hex>`) if omitted.
    #[serde(default)]
    pub name: Option<String>,

    /// Create/attach policy.
    #[serde(default = "default_create_mode")]
    pub create: CreateMode,

    /// Stream buffer size in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Selects the IPL variant: `true` for the shared atomics-based spin
    /// lock (required across unrelated processes), `false` for the fast
    /// fork-inherited OS mutex.
    #[serde(default = "default_shared_lock")]
    pub shared_lock: bool,

    /// Preallocate a full-dump segment of this size (0 ⇒ dynamically
    /// sized dumps).
    #[serde(default)]
    pub full_dump_size: u64,

    /// This process unlinks the map's SMS on teardown.
    #[serde(default = "default_auto_unlink")]
    pub auto_unlink: bool,

    /// Marks this map as a node in a recursive wrap tree
    /// ([`crate::recurse::RecursiveMap`]): participating maps register
    /// their children under a reserved key so one top-level
    /// `unlink_cascade()` reaches every descendant. This flag does not
    /// itself auto-wrap assigned values — callers build the tree
    /// explicitly via `RecursiveMap::child()` (see DESIGN.md's Open
    /// Questions for why value-triggered auto-wrap is out of scope here).
    #[serde(default)]
    pub recurse: bool,

    /// Poll interval for the shared lock's blocking retry loop.
    /// 0 ⇒ busy-wait (`yield_now` between attempts).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hard per-record ceiling; a single encoded record exceeding this
    /// fails with `ValueTooLarge` instead of being forced into the stream.
    /// Defaults to `buffer_size`, which forces oversized records onto the
    /// pure-dump path rather than rejecting them outright.
    #[serde(default)]
    pub max_record: Option<usize>,
}

fn default_create_mode() -> CreateMode {
    CreateMode::CreateOrAttach
}

fn default_shared_lock() -> bool {
    true
}

fn default_auto_unlink() -> bool {
    true
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            name: None,
            create: default_create_mode(),
            buffer_size: default_buffer_size(),
            shared_lock: default_shared_lock(),
            full_dump_size: 0,
            auto_unlink: default_auto_unlink(),
            recurse: false,
            poll_interval_ms: default_poll_interval_ms(),
            max_record: None,
        }
    }
}

impl MapConfig {
    /// Validate field combinations that can't be expressed in the type
    /// system alone.
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("buffer_size must be > 0".to_string());
        }
        if let Some(max_record) = self.max_record {
            if max_record == 0 {
                return Err("max_record must be > 0 when set".to_string());
            }
        }
        Ok(())
    }

    /// The effective per-record ceiling: `max_record` if set, else
    /// `buffer_size` (spec.md §4.3: `>= buffer_size` is legal and simply
    /// forces the pure-dump path).
    pub fn effective_max_record(&self) -> usize {
        self.max_record.unwrap_or(self.buffer_size)
    }

    /// Load a `MapConfig` from a TOML file.
    pub fn from_toml(path: &std::path::Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
        let config: MapConfig = toml::from_str(&content).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }
}
