//! Cache traits shared by the fetch engine and the tile sources.
//!
//! Two capabilities exist side by side:
//!
//! - [`TileCache`]: the fast, synchronous in-memory cache the fetch
//!   orchestrator consults on every wave. Which entries it evicts, and
//!   when, is entirely the implementation's business.
//! - [`PersistentTileCache`]: durable byte-payload storage with blocking
//!   and suspending forms of every operation. Storage failures are
//!   caller-visible; they propagate instead of masquerading as misses.
//!
//! Both traits are dyn-compatible; the suspending operations return boxed
//! futures for that reason.

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::coord::{Tile, TileIndex};

/// Errors from persistent cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the backing store failed.
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Synchronous, thread-safe in-memory tile cache.
///
/// Keyed by [`TileIndex`], which is only meaningful relative to one schema:
/// swap the tile source and the cache must be cleared.
pub trait TileCache: Send + Sync {
    /// The cached tile, or `None` on a miss.
    fn find(&self, index: &TileIndex) -> Option<Tile>;

    /// Insert a tile, replacing any previous entry for its index.
    fn add(&self, tile: Tile);

    /// Drop the entry for `index` if present.
    fn remove(&self, index: &TileIndex);

    /// Drop every entry.
    fn clear(&self);
}

/// Durable tile payload store.
///
/// Every operation exists in a blocking and a suspending form backed by the
/// same synchronization, so callers of either style exclude each other
/// correctly. The blocking forms must not be called from an async context.
pub trait PersistentTileCache: Send + Sync {
    /// The stored payload, or `None` if absent (or expired, for stores
    /// with an expiry policy).
    fn find(&self, index: &TileIndex) -> Result<Option<Bytes>, CacheError>;

    /// Store a payload. Implementations may keep an existing entry and
    /// silently discard the new payload; storing is idempotent, not
    /// refreshing.
    fn add(&self, index: &TileIndex, data: Bytes) -> Result<(), CacheError>;

    /// Delete the entry if present; absence is not an error.
    fn remove(&self, index: &TileIndex) -> Result<(), CacheError>;

    /// Suspending form of [`find`](Self::find).
    fn find_async<'a>(
        &'a self,
        index: &'a TileIndex,
    ) -> BoxFuture<'a, Result<Option<Bytes>, CacheError>>;

    /// Suspending form of [`add`](Self::add).
    fn add_async<'a>(
        &'a self,
        index: &'a TileIndex,
        data: Bytes,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Suspending form of [`remove`](Self::remove).
    fn remove_async<'a>(&'a self, index: &'a TileIndex) -> BoxFuture<'a, Result<(), CacheError>>;
}
