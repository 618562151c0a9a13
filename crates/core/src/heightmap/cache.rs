//! Named map cache with an undo graveyard

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::field::Field;

/// Opaque identifier of a cached map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapId(u64);

impl MapId {
    /// Raw numeric value, stable for the lifetime of the cache entry
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Rebuild an id received from the C ABI or a saved session
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map-{}", self.0)
    }
}

/// A named field tagged as height-like or intensity-like
#[derive(Debug)]
pub struct Heightmap {
    /// Display name ("Base map", "Thermal 2", ...)
    pub name: String,
    /// Grid data
    pub field: Field,
    /// `true` for intensity-like maps, `false` for linear heights
    pub logarithmic: bool,
}

/// Mapping from [`MapId`] to [`Heightmap`] with a bounded FIFO graveyard
///
/// Releasing a map parks it in the graveyard so it can be resurrected by a
/// later [`get`](Self::get). Once the graveyard holds more than
/// `history_length` maps, the oldest one is dropped for good.
#[derive(Debug)]
pub struct MapCache {
    maps: FxHashMap<MapId, Heightmap>,
    graveyard: VecDeque<(MapId, Heightmap)>,
    history_length: usize,
    next_id: u64,
}

impl MapCache {
    /// Empty cache keeping up to `history_length` released maps
    pub fn new(history_length: usize) -> Self {
        Self {
            maps: FxHashMap::default(),
            graveyard: VecDeque::with_capacity(history_length + 1),
            history_length,
            next_id: 1,
        }
    }

    /// Maximum number of released maps kept for undo
    pub fn history_length(&self) -> usize {
        self.history_length
    }

    /// Insert a new map and return its id
    ///
    /// When `based_on` names a known map, its `logarithmic` tag is inherited
    /// and the `logarithmic` argument is ignored.
    pub fn create(
        &mut self,
        name: impl Into<String>,
        field: Field,
        logarithmic: bool,
        based_on: Option<MapId>,
    ) -> MapId {
        let logarithmic = based_on
            .and_then(|id| self.peek(id))
            .map_or(logarithmic, |base| base.logarithmic);
        let id = MapId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        trace!(%id, name = %name, "Created map");
        self.maps.insert(
            id,
            Heightmap {
                name,
                field,
                logarithmic,
            },
        );
        id
    }

    /// Whether `id` is live or resurrectable
    pub fn has(&self, id: MapId) -> bool {
        self.maps.contains_key(&id) || self.graveyard.iter().any(|(gid, _)| *gid == id)
    }

    /// Same as [`has`](Self::has) for an optional slot
    pub fn has_opt(&self, id: Option<MapId>) -> bool {
        id.is_some_and(|id| self.has(id))
    }

    /// Whether `id` is live (not graveyarded)
    pub fn is_live(&self, id: MapId) -> bool {
        self.maps.contains_key(&id)
    }

    fn resurrect(&mut self, id: MapId) {
        if self.maps.contains_key(&id) {
            return;
        }
        if let Some(pos) = self.graveyard.iter().position(|(gid, _)| *gid == id) {
            if let Some((gid, map)) = self.graveyard.remove(pos) {
                debug!(id = %gid, "Resurrected map from graveyard");
                self.maps.insert(gid, map);
            }
        }
    }

    /// Look up a map, resurrecting it from the graveyard if needed
    pub fn get(&mut self, id: MapId) -> Option<&Heightmap> {
        self.resurrect(id);
        self.maps.get(&id)
    }

    /// Mutable lookup with the same resurrection side effect as [`get`](Self::get)
    pub fn get_mut(&mut self, id: MapId) -> Option<&mut Heightmap> {
        self.resurrect(id);
        self.maps.get_mut(&id)
    }

    /// Look up a live map without touching the graveyard
    pub fn peek(&self, id: MapId) -> Option<&Heightmap> {
        self.maps.get(&id)
    }

    /// Move a live map into the graveyard; unknown ids are ignored
    pub fn try_release(&mut self, id: MapId) {
        if let Some(map) = self.maps.remove(&id) {
            trace!(%id, "Released map to graveyard");
            self.graveyard.push_back((id, map));
            while self.graveyard.len() > self.history_length {
                if let Some((old, _)) = self.graveyard.pop_front() {
                    debug!(id = %old, "Freed map past history length");
                }
            }
        }
    }

    /// Same as [`try_release`](Self::try_release) for an optional slot
    pub fn try_release_opt(&mut self, id: Option<MapId>) {
        if let Some(id) = id {
            self.try_release(id);
        }
    }

    /// Number of live maps
    pub fn live_count(&self) -> usize {
        self.maps.len()
    }

    /// Number of maps waiting in the graveyard
    pub fn graveyard_len(&self) -> usize {
        self.graveyard.len()
    }

    /// Drop every live and graveyarded map
    pub fn free_all(&mut self) {
        debug!(
            live = self.maps.len(),
            graveyard = self.graveyard.len(),
            "Freeing all maps"
        );
        self.maps.clear();
        self.graveyard.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::TextureManager;

    fn field(manager: &TextureManager) -> Field {
        manager.create(4, 4, 1).unwrap()
    }

    #[test]
    fn test_ids_are_unique() {
        let manager = TextureManager::unbounded();
        let mut cache = MapCache::new(2);
        let a = cache.create("a", field(&manager), false, None);
        let b = cache.create("b", field(&manager), false, None);
        assert_ne!(a, b);
        cache.try_release(a);
        let c = cache.create("c", field(&manager), false, None);
        assert_ne!(a, c);
    }

    #[test]
    fn test_logarithmic_inherited_from_base() {
        let manager = TextureManager::unbounded();
        let mut cache = MapCache::new(2);
        let flow = cache.create("flow", field(&manager), true, None);
        let derived = cache.create("derived", field(&manager), false, Some(flow));
        assert!(cache.peek(derived).unwrap().logarithmic);
    }

    #[test]
    fn test_release_and_resurrect() {
        let manager = TextureManager::unbounded();
        let mut cache = MapCache::new(3);
        let id = cache.create("a", field(&manager), false, None);
        cache.try_release(id);
        assert!(cache.has(id));
        assert!(!cache.is_live(id));
        assert_eq!(cache.graveyard_len(), 1);

        assert_eq!(cache.get(id).unwrap().name, "a");
        assert!(cache.is_live(id));
        assert_eq!(cache.graveyard_len(), 0);
    }

    #[test]
    fn test_free_all_returns_memory() {
        let manager = TextureManager::unbounded();
        let mut cache = MapCache::new(3);
        let a = cache.create("a", field(&manager), false, None);
        cache.create("b", field(&manager), false, None);
        cache.try_release(a);
        assert_eq!(manager.live_fields(), 2);
        cache.free_all();
        assert_eq!(manager.live_fields(), 0);
        assert!(!cache.has(a));
    }
}
