//! Tile sources: where payloads come from.
//!
//! The fetch engine talks to sources exclusively through [`TileSource`]. A
//! source owns its schema (or has none yet) and knows how to produce the
//! payload for one tile; it never leaks how requests are constructed.
//! Per-tile failures are ordinary [`FetchError`] values, delivered to the
//! engine's subscribers rather than thrown across its surface.

mod file;
mod http;

pub use file::FileTileSource;
pub use http::{HttpTileSource, TileUrlSource};

use bytes::Bytes;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::cache::CacheError;
use crate::coord::{TileIndex, TileInfo};
use crate::schema::TileSchema;

/// Errors a tile source can report for a single tile.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with something that is not tile data. Carries
    /// the offending URL, the declared content type, and the body when the
    /// server sent text (usually an error page worth reading).
    #[error("expected an image from {url} but the response declared '{content_type}'")]
    UnexpectedContentType {
        url: String,
        content_type: String,
        body: Option<String>,
    },

    /// No response arrived within the source's allotted time.
    #[error("no response received in time")]
    Timeout,

    /// A store-backed source has no entry for this index.
    #[error("no stored tile for {0}")]
    NotFound(TileIndex),

    /// The source's persistence layer failed.
    #[error("storage failure: {0}")]
    Storage(#[from] CacheError),

    /// Transport-level failure or unexpected HTTP status.
    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    /// The HTTP client could not be constructed.
    #[error("HTTP client construction failed: {0}")]
    Client(String),
}

/// An asynchronous origin of tile payloads.
///
/// Implementations must be safe to call from many fetch tasks at once.
pub trait TileSource: Send + Sync {
    /// The source's schema, or `None` if it is not known yet (the fetch
    /// engine then has nothing to do).
    fn schema(&self) -> Option<&dyn TileSchema>;

    /// Produce the payload for one tile.
    fn fetch_tile<'a>(&'a self, info: &'a TileInfo) -> BoxFuture<'a, Result<Bytes, FetchError>>;
}
