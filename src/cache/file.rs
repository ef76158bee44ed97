//! File-backed tile cache with lazy expiry.
//!
//! Payloads are stored one file per tile under
//! `root/<level>/<col>/<row>.<format>`, with `:` in level identifiers
//! replaced for path safety. A single reader/writer lock per cache instance
//! guards the whole directory tree: reads share it, writes exclude each
//! other and all reads. Coarse, but the store stays consistent without any
//! per-file bookkeeping.
//!
//! Expiry is lazy. A configured time-to-live turns overaged files into
//! misses at lookup time; nothing is deleted until the entry is either
//! removed or overwritten by a later `add`.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::debug;

use crate::cache::{CacheError, PersistentTileCache};
use crate::coord::TileIndex;
use crate::sync::AsyncRwLock;

/// Persistent tile cache over a directory hierarchy.
///
/// Every operation exists as a blocking call and a suspending call; both
/// go through the same lock, so mixed callers are excluded correctly.
pub struct FileTileCache {
    lock: AsyncRwLock,
    directory: PathBuf,
    format: String,
    ttl: Option<Duration>,
}

impl FileTileCache {
    /// Create a cache rooted at `directory` (created if missing) storing
    /// files with the given extension. Entries never expire.
    pub fn new(
        directory: impl Into<PathBuf>,
        format: impl Into<String>,
    ) -> Result<Self, CacheError> {
        Self::build(directory.into(), format.into(), None)
    }

    /// Like [`new`](Self::new), but entries older than `ttl` read as misses.
    pub fn with_ttl(
        directory: impl Into<PathBuf>,
        format: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, CacheError> {
        Self::build(directory.into(), format.into(), Some(ttl))
    }

    fn build(directory: PathBuf, format: String, ttl: Option<Duration>) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            lock: AsyncRwLock::new(),
            directory,
            format,
            ttl,
        })
    }

    /// The on-disk location for a tile index.
    pub fn tile_path(&self, index: &TileIndex) -> PathBuf {
        self.directory
            .join(index.level.replace(':', "_"))
            .join(index.col.to_string())
            .join(format!("{}.{}", index.row, self.format))
    }

    fn is_expired(&self, meta: &Metadata) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        match meta.modified().ok().and_then(|modified| modified.elapsed().ok()) {
            Some(age) => age > ttl,
            // unreadable or future mtime: keep the entry
            None => false,
        }
    }

    fn exists_fresh(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(meta) => !self.is_expired(&meta),
            Err(_) => false,
        }
    }

    /// Store a payload, blocking form.
    ///
    /// If a fresh file already exists for this index the call returns
    /// without touching it: neither the content nor its timestamp changes.
    /// An expired file is overwritten.
    pub fn add(&self, index: &TileIndex, data: Bytes) -> Result<(), CacheError> {
        let _guard = self.lock.write_blocking();
        let path = self.tile_path(index);
        if self.exists_fresh(&path) {
            debug!(index = %index, "tile already stored, keeping existing payload");
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &data)?;
        Ok(())
    }

    /// Delete a payload, blocking form. Absence is not an error.
    pub fn remove(&self, index: &TileIndex) -> Result<(), CacheError> {
        let _guard = self.lock.write_blocking();
        match std::fs::remove_file(self.tile_path(index)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a payload, blocking form. Absent and expired files are both
    /// misses; an expired file stays on disk.
    pub fn find(&self, index: &TileIndex) -> Result<Option<Bytes>, CacheError> {
        let _guard = self.lock.read_blocking();
        let path = self.tile_path(index);
        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if self.is_expired(&meta) {
            debug!(index = %index, "stored tile past its ttl, reporting miss");
            return Ok(None);
        }
        Ok(Some(std::fs::read(&path)?.into()))
    }

    /// Store a payload, suspending form of [`add`](Self::add).
    pub async fn add_async(&self, index: &TileIndex, data: Bytes) -> Result<(), CacheError> {
        let _guard = self.lock.write().await;
        let path = self.tile_path(index);
        if self.exists_fresh(&path) {
            debug!(index = %index, "tile already stored, keeping existing payload");
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        Ok(())
    }

    /// Delete a payload, suspending form of [`remove`](Self::remove).
    pub async fn remove_async(&self, index: &TileIndex) -> Result<(), CacheError> {
        let _guard = self.lock.write().await;
        match tokio::fs::remove_file(self.tile_path(index)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a payload, suspending form of [`find`](Self::find).
    pub async fn find_async(&self, index: &TileIndex) -> Result<Option<Bytes>, CacheError> {
        let _guard = self.lock.read().await;
        let path = self.tile_path(index);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if self.is_expired(&meta) {
            debug!(index = %index, "stored tile past its ttl, reporting miss");
            return Ok(None);
        }
        Ok(Some(tokio::fs::read(&path).await?.into()))
    }
}

impl PersistentTileCache for FileTileCache {
    fn find(&self, index: &TileIndex) -> Result<Option<Bytes>, CacheError> {
        FileTileCache::find(self, index)
    }

    fn add(&self, index: &TileIndex, data: Bytes) -> Result<(), CacheError> {
        FileTileCache::add(self, index, data)
    }

    fn remove(&self, index: &TileIndex) -> Result<(), CacheError> {
        FileTileCache::remove(self, index)
    }

    fn find_async<'a>(
        &'a self,
        index: &'a TileIndex,
    ) -> BoxFuture<'a, Result<Option<Bytes>, CacheError>> {
        Box::pin(FileTileCache::find_async(self, index))
    }

    fn add_async<'a>(
        &'a self,
        index: &'a TileIndex,
        data: Bytes,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(FileTileCache::add_async(self, index, data))
    }

    fn remove_async<'a>(&'a self, index: &'a TileIndex) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(FileTileCache::remove_async(self, index))
    }
}
