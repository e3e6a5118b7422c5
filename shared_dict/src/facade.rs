//! Thin associative-container ergonomics over the core `SharedMap` (spec.md
//! §2's external "Map Façade" collaborator, shipped here as a convenience
//! layer). Every operation delegates straight into `SharedMap` — this module
//! holds no synchronization state of its own.

use crate::config::MapConfig;
use crate::error::ShmResult;
use crate::map::{MapStatus, SharedMap};
use crate::serializer::{self, Serializer};
use std::marker::PhantomData;

/// A typed, associative-container view over a [`SharedMap`], parameterized
/// by a caller-chosen [`Serializer`] for both keys and values.
pub struct Map<K, V, S> {
    inner: SharedMap,
    codec: S,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S> Map<K, V, S>
where
    S: Serializer<K> + Serializer<V>,
{
    /// Create, attach, or create-or-attach per `config.create`, pairing the
    /// resulting core map with `codec`.
    pub fn new(config: MapConfig, codec: S) -> ShmResult<Self> {
        Ok(Self {
            inner: SharedMap::new(config)?,
            codec,
            _marker: PhantomData,
        })
    }

    /// Look up a key's current value.
    pub fn get(&mut self, key: &K) -> ShmResult<Option<V>> {
        self.inner.get(&self.codec, key)
    }

    /// Set a key's value.
    pub fn set(&mut self, key: &K, value: &V) -> ShmResult<()> {
        self.inner.set(&self.codec, key, value)
    }

    /// Delete a key.
    pub fn delete(&mut self, key: &K) -> ShmResult<()> {
        self.inner.delete(&self.codec, key)
    }

    /// Number of live keys, after catching up with the shared state.
    pub fn len(&mut self) -> ShmResult<usize> {
        self.inner.len()
    }

    /// Whether the map (after catch-up) holds no keys.
    pub fn is_empty(&mut self) -> ShmResult<bool> {
        self.inner.is_empty()
    }

    /// A full decoded snapshot of every live key/value pair, after catching
    /// up with the shared state. Iteration order is unspecified.
    pub fn snapshot(&mut self) -> ShmResult<Vec<(K, V)>> {
        self.inner
            .snapshot_raw()?
            .into_iter()
            .map(|(k, v)| {
                let key = serializer::wrap_decode::<K, S>(&self.codec, &k)?;
                let value = serializer::wrap_decode::<V, S>(&self.codec, &v)?;
                Ok((key, value))
            })
            .collect()
    }

    /// Force the Full-Dump Protocol.
    pub fn dump(&mut self) -> ShmResult<()> {
        self.inner.dump()
    }

    /// Reload the current full dump; `force` reloads even if this
    /// process's view already matches.
    pub fn load(&mut self, force: bool) -> ShmResult<()> {
        self.inner.load(force)
    }

    /// Diagnostic snapshot of the underlying core map's state.
    pub fn status(&mut self) -> ShmResult<MapStatus> {
        self.inner.status()
    }

    /// Remove the underlying SMS from the OS namespace.
    pub fn unlink(&self) -> ShmResult<()> {
        self.inner.unlink()
    }

    /// Borrow the underlying core map directly, e.g. to call `apply_update`
    /// or `close` without going through the façade.
    pub fn core(&mut self) -> &mut SharedMap {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreateMode;
    use crate::serializer::JsonSerializer;

    fn unique_config(tag: &str) -> MapConfig {
        MapConfig {
            name: Some(format!(
                "shdict_test_facade_{}_{}_{}",
                tag,
                std::process::id(),
                {
                    use rand::Rng;
                    rand::thread_rng().r#gen::<u32>()
                }
            )),
            create: CreateMode::MustCreate,
            buffer_size: 4096,
            ..MapConfig::default()
        }
    }

    #[test]
    fn set_get_delete_round_trip() {
        let mut map: Map<String, i32, _> = Map::new(unique_config("basic"), JsonSerializer).unwrap();
        map.set(&"a".to_string(), &1).unwrap();
        map.set(&"b".to_string(), &2).unwrap();
        assert_eq!(map.get(&"a".to_string()).unwrap(), Some(1));
        assert_eq!(map.len().unwrap(), 2);

        map.delete(&"a".to_string()).unwrap();
        assert_eq!(map.get(&"a".to_string()).unwrap(), None);
        assert_eq!(map.len().unwrap(), 1);
    }

    #[test]
    fn snapshot_decodes_every_live_pair() {
        let mut map: Map<String, i32, _> =
            Map::new(unique_config("snapshot"), JsonSerializer).unwrap();
        map.set(&"x".to_string(), &10).unwrap();
        map.set(&"y".to_string(), &20).unwrap();

        let mut snapshot = map.snapshot().unwrap();
        snapshot.sort();
        assert_eq!(
            snapshot,
            vec![("x".to_string(), 10), ("y".to_string(), 20)]
        );
    }

    #[test]
    fn is_empty_reflects_deletes() {
        let mut map: Map<String, i32, _> = Map::new(unique_config("empty"), JsonSerializer).unwrap();
        assert!(map.is_empty().unwrap());
        map.set(&"k".to_string(), &1).unwrap();
        assert!(!map.is_empty().unwrap());
        map.delete(&"k".to_string()).unwrap();
        assert!(map.is_empty().unwrap());
    }
}
