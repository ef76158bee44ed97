//! TilePipe - viewport-driven map tile fetching and caching
//!
//! This library keeps the set of map tiles visible in a viewport up to date
//! as the viewport moves: it decides which tiles a view needs (coarse
//! fallbacks first), fetches the missing ones concurrently from an abstract
//! tile source, retries transient failures, and discards work that a newer
//! viewport has made irrelevant. Fetched payloads land in a synchronous
//! in-memory cache and, optionally, in a TTL-aware file cache guarded by a
//! fair reader/writer lock.
//!
//! # High-Level API
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilepipe::cache::MemoryTileCache;
//! use tilepipe::coord::Extent;
//! use tilepipe::fetch::Fetcher;
//!
//! let cache = Arc::new(MemoryTileCache::new(2_000));
//! let fetcher = Fetcher::new(source, cache);
//! let mut events = fetcher.subscribe();
//!
//! fetcher.view_changed(Extent::new(0.0, 0.0, 1024.0, 1024.0), 1.0);
//! while let Some(event) = events.recv().await {
//!     // render event.tile, surface event.error
//! }
//! ```

pub mod cache;
pub mod coord;
pub mod fetch;
pub mod schema;
pub mod source;
pub mod sync;

/// Version of the TilePipe library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
