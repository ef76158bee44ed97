//! HTTP-backed tile source with read-through persistence.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::cache::{NullTileCache, PersistentTileCache};
use crate::coord::TileInfo;
use crate::schema::TileSchema;
use crate::source::{FetchError, TileSource};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the request URL for a tile.
///
/// Provider-specific templating (server rotation, API keys, quadkeys)
/// lives behind this trait; the engine itself never assembles URLs.
/// Any `Fn(&TileInfo) -> String` qualifies.
pub trait TileUrlSource: Send + Sync {
    fn tile_url(&self, info: &TileInfo) -> String;
}

impl<F> TileUrlSource for F
where
    F: Fn(&TileInfo) -> String + Send + Sync,
{
    fn tile_url(&self, info: &TileInfo) -> String {
        self(info)
    }
}

/// Tile source fetching payloads over HTTP.
///
/// Lookups go through the persistent cache first; fetched payloads are
/// written back to it. The response must declare an `image/*` content
/// type, anything else is reported as [`FetchError::UnexpectedContentType`]
/// together with the response body when the server sent text.
pub struct HttpTileSource<S> {
    schema: S,
    urls: Box<dyn TileUrlSource>,
    client: reqwest::Client,
    cache: Arc<dyn PersistentTileCache>,
}

impl<S: TileSchema> HttpTileSource<S> {
    /// Create a source with a default client and no persistence.
    pub fn new(schema: S, urls: impl TileUrlSource + 'static) -> Result<Self, FetchError> {
        Self::with_timeout(schema, urls, DEFAULT_TIMEOUT)
    }

    /// Create a source whose requests time out after `timeout`.
    pub fn with_timeout(
        schema: S,
        urls: impl TileUrlSource + 'static,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            schema,
            urls: Box::new(urls),
            client,
            cache: Arc::new(NullTileCache),
        })
    }

    /// Attach a persistent cache consulted before and filled after fetches.
    pub fn with_cache(mut self, cache: Arc<dyn PersistentTileCache>) -> Self {
        self.cache = cache;
        self
    }

    async fn fetch_image(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !content_type.starts_with("image") {
            let body = if content_type.starts_with("text") {
                response.text().await.ok()
            } else {
                None
            };
            return Err(FetchError::UnexpectedContentType {
                url: url.to_string(),
                content_type,
                body,
            });
        }

        response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }
}

impl<S: TileSchema> TileSource for HttpTileSource<S> {
    fn schema(&self) -> Option<&dyn TileSchema> {
        Some(&self.schema)
    }

    fn fetch_tile<'a>(&'a self, info: &'a TileInfo) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            if let Some(hit) = self.cache.find_async(&info.index).await? {
                debug!(index = %info.index, "serving tile from persistent cache");
                return Ok(hit);
            }

            let url = self.urls.tile_url(info);
            let data = self.fetch_image(&url).await?;
            self.cache.add_async(&info.index, data.clone()).await?;
            Ok(data)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Extent, Resolution, TileIndex};
    use crate::schema::GridSchema;

    fn test_schema() -> GridSchema {
        GridSchema::new(
            Extent::new(0.0, 0.0, 1024.0, 1024.0),
            256,
            [Resolution::new("0", 1.0)],
        )
    }

    #[test]
    fn test_closures_build_urls() {
        let urls = |info: &TileInfo| {
            format!(
                "https://tiles.example/{}/{}/{}.png",
                info.index.level, info.index.col, info.index.row
            )
        };
        let info = TileInfo::new(
            TileIndex::new("3", 4, 5),
            Extent::new(0.0, 0.0, 256.0, 256.0),
        );

        assert_eq!(urls.tile_url(&info), "https://tiles.example/3/4/5.png");
    }

    #[test]
    fn test_source_exposes_schema() {
        let source = HttpTileSource::new(test_schema(), |info: &TileInfo| {
            format!("https://tiles.example/{}", info.index)
        })
        .unwrap();

        let schema = source.schema().expect("schema should be present");
        assert_eq!(schema.resolutions().len(), 1);
    }
}
