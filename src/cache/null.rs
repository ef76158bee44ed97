//! No-op persistent cache.

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::cache::{CacheError, PersistentTileCache};
use crate::coord::TileIndex;

/// Persistent cache that stores nothing and never hits.
///
/// The default persistence layer of sources that do not want one: every
/// `find` is a miss, `add` and `remove` succeed without effect.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTileCache;

impl PersistentTileCache for NullTileCache {
    fn find(&self, _index: &TileIndex) -> Result<Option<Bytes>, CacheError> {
        Ok(None)
    }

    fn add(&self, _index: &TileIndex, _data: Bytes) -> Result<(), CacheError> {
        Ok(())
    }

    fn remove(&self, _index: &TileIndex) -> Result<(), CacheError> {
        Ok(())
    }

    fn find_async<'a>(
        &'a self,
        _index: &'a TileIndex,
    ) -> BoxFuture<'a, Result<Option<Bytes>, CacheError>> {
        Box::pin(async { Ok(None) })
    }

    fn add_async<'a>(
        &'a self,
        _index: &'a TileIndex,
        _data: Bytes,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async { Ok(()) })
    }

    fn remove_async<'a>(&'a self, _index: &'a TileIndex) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async { Ok(()) })
    }
}
