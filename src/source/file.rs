//! Tile source backed by a local file cache.

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::cache::FileTileCache;
use crate::coord::TileInfo;
use crate::schema::TileSchema;
use crate::source::{FetchError, TileSource};

/// Serves tiles that a [`FileTileCache`] already holds.
///
/// Useful for offline tile sets written by an earlier online session. A
/// tile missing from the store (or past its ttl) is
/// [`FetchError::NotFound`]; this source never goes to the network.
pub struct FileTileSource<S> {
    schema: S,
    cache: FileTileCache,
}

impl<S: TileSchema> FileTileSource<S> {
    pub fn new(schema: S, cache: FileTileCache) -> Self {
        Self { schema, cache }
    }
}

impl<S: TileSchema> TileSource for FileTileSource<S> {
    fn schema(&self) -> Option<&dyn TileSchema> {
        Some(&self.schema)
    }

    fn fetch_tile<'a>(&'a self, info: &'a TileInfo) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            match self.cache.find_async(&info.index).await? {
                Some(data) => Ok(data),
                None => Err(FetchError::NotFound(info.index.clone())),
            }
        })
    }
}
