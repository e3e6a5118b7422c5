//! Recursive wrap decorator: explicit `child()` calls create/attach nested
//! child `SharedMap`s and register their segment names in the parent's own
//! stream, under a reserved key, so one top-level `unlink_cascade()`
//! tears down the whole tree (spec.md §9 Design Notes).
//!
//! Nesting here is caller-driven, not value-triggered: a child only comes
//! into being when the caller names it via `RecursiveMap::child()`. There
//! is no detection of a "nested map" shape inside an ordinary `set()`
//! value and no indexed (`root["n"]["c"]`) access — see DESIGN.md's Open
//! Questions for why.
//!
//! Layered strictly above the core — this module holds no control-block or
//! lock state of its own, it only drives `SharedMap::get`/`set`/`unlink`
//! through the `RECURSE_REGISTER_KEY` bookkeeping key. Cycle detection over
//! the graph of maps being wrapped is mandatory and lives here, not in the
//! core.

use crate::config::{CreateMode, MapConfig};
use crate::error::{ShmError, ShmResult};
use crate::map::SharedMap;
use crate::serializer::JsonSerializer;
use std::cell::RefCell;
use std::collections::HashSet;

/// Reserved key under which a parent map stores its children's segment
/// names, as a JSON array of strings. Chosen to be vanishingly unlikely to
/// collide with a caller's own keys.
const RECURSE_REGISTER_KEY: &str = "__shdict_recurse_children__";

thread_local! {
    // Segment names currently being wrapped on this thread's call stack.
    // If `child()` is asked to (re-)enter a name already on the stack, the
    // value graph loops back on itself — reject it (spec.md §9: cyclic
    // nested graphs rejected by identity tracking during wrap).
    static WRAP_STACK: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
}

struct WrapGuard {
    name: String,
}

impl WrapGuard {
    fn enter(name: &str) -> ShmResult<Self> {
        let inserted = WRAP_STACK.with(|stack| stack.borrow_mut().insert(name.to_string()));
        if !inserted {
            return Err(ShmError::Fatal {
                reason: format!("cycle detected while wrapping nested map '{name}'"),
            });
        }
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Drop for WrapGuard {
    fn drop(&mut self) {
        WRAP_STACK.with(|stack| {
            stack.borrow_mut().remove(&self.name);
        });
    }
}

/// A map that participates in recursive wrapping: children are independent
/// `SharedMap`s, with their segment names registered in this map's own
/// reserved-key namespace so a top-level [`unlink_cascade`](Self::unlink_cascade)
/// reaches every descendant.
pub struct RecursiveMap {
    inner: SharedMap,
}

impl RecursiveMap {
    /// Wrap a new or existing map as a recursive node. `config.recurse` is
    /// forced to `true` regardless of what the caller passed.
    pub fn new(mut config: MapConfig) -> ShmResult<Self> {
        config.recurse = true;
        Ok(Self {
            inner: SharedMap::new(config)?,
        })
    }

    /// Create (or attach) a child map nested under this one, registering
    /// its segment name so this map's `unlink_cascade` reaches it too.
    ///
    /// Rejects the wrap with `ShmError::Fatal` if `child_name` is already
    /// being wrapped somewhere up this thread's call stack (a cycle).
    pub fn child(&mut self, child_name: &str) -> ShmResult<RecursiveMap> {
        let _guard = WrapGuard::enter(child_name)?;

        let child_config = MapConfig {
            name: Some(child_name.to_string()),
            create: CreateMode::CreateOrAttach,
            recurse: true,
            ..MapConfig::default()
        };
        let child = RecursiveMap::new(child_config)?;
        self.register_child(child_name)?;
        Ok(child)
    }

    fn register_child(&mut self, child_name: &str) -> ShmResult<()> {
        let codec = JsonSerializer;
        let mut children = self.children()?;
        if !children.iter().any(|n| n == child_name) {
            children.push(child_name.to_string());
            self.inner
                .set(&codec, &RECURSE_REGISTER_KEY.to_string(), &children)?;
        }
        Ok(())
    }

    /// Names of this map's directly registered children.
    pub fn children(&mut self) -> ShmResult<Vec<String>> {
        let codec = JsonSerializer;
        Ok(self
            .inner
            .get(&codec, &RECURSE_REGISTER_KEY.to_string())?
            .unwrap_or_default())
    }

    /// Unlink this map and every registered descendant, depth-first.
    /// A child whose segment has already disappeared is skipped rather
    /// than failing the whole cascade.
    pub fn unlink_cascade(&mut self) -> ShmResult<()> {
        for child_name in self.children()? {
            let child_config = MapConfig {
                name: Some(child_name),
                create: CreateMode::MustAttach,
                recurse: true,
                ..MapConfig::default()
            };
            if let Ok(mut child) = RecursiveMap::new(child_config) {
                child.unlink_cascade()?;
            }
        }
        self.inner.unlink()
    }

    /// Borrow the underlying core map for direct `get`/`set`/`delete`.
    pub fn core(&mut self) -> &mut SharedMap {
        &mut self.inner
    }
}
