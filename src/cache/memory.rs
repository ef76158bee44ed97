//! Bounded in-memory tile cache.

use moka::sync::Cache;

use crate::cache::TileCache;
use crate::coord::{Tile, TileIndex};

/// In-memory tile cache with a bounded entry count.
///
/// Thin wrapper over a concurrent cache; eviction order is the backing
/// cache's concern. Lookups and inserts are lock-free enough to sit on the
/// fetch engine's hot path.
pub struct MemoryTileCache {
    tiles: Cache<TileIndex, Tile>,
}

impl MemoryTileCache {
    /// Create a cache holding at most `max_tiles` entries.
    pub fn new(max_tiles: u64) -> Self {
        Self {
            tiles: Cache::builder().max_capacity(max_tiles).build(),
        }
    }

    /// Number of entries currently cached.
    ///
    /// An estimate while inserts are in flight, exact once they settle.
    pub fn entry_count(&self) -> u64 {
        self.tiles.run_pending_tasks();
        self.tiles.entry_count()
    }
}

impl TileCache for MemoryTileCache {
    fn find(&self, index: &TileIndex) -> Option<Tile> {
        self.tiles.get(index)
    }

    fn add(&self, tile: Tile) {
        self.tiles.insert(tile.info.index.clone(), tile);
    }

    fn remove(&self, index: &TileIndex) {
        self.tiles.invalidate(index);
    }

    fn clear(&self) {
        self.tiles.invalidate_all();
    }
}
