//! The fetch orchestrator.
//!
//! Reacts to viewport changes by computing the tiles the new view needs,
//! fetching the missing ones concurrently, and notifying subscribers as
//! results come in. One `view_changed` call starts one *session*; a session
//! issues *waves* of concurrent per-tile fetches until nothing is missing,
//! the viewport has moved on, or the fetcher was aborted.
//!
//! ```text
//! view_changed ──► session ──► wave: wanted ∖ cached ∖ retry-exhausted
//!                    │            │ (skip indices already in flight)
//!                    │            ▼
//!                    │         fetch tasks ──► memory cache + subscribers
//!                    │            │
//!                    └────────────┘ next wave, until done / stale / aborted
//! ```
//!
//! Staleness is advisory: a viewport change stops a session from issuing
//! new waves, but fetches already dispatched run to completion and their
//! results are still applied. Only an abort swallows results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::TileCache;
use crate::coord::{Extent, Tile, TileIndex, TileInfo, Viewport};
use crate::fetch::{CoarseToFineStrategy, FetchStrategy, RetryTracker};
use crate::schema::nearest_level;
use crate::source::{FetchError, TileSource};

/// Pause before re-examining a wave in which every missing tile was
/// already being fetched by an older session.
const WAVE_BACKOFF: Duration = Duration::from_millis(10);

/// Tuning knobs for the fetch engine, supplied at construction.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Upper bound on concurrently running per-tile fetches.
    pub max_concurrent_fetches: usize,
    /// Retries granted to a tile after its first attempt in a session.
    pub max_retries: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            max_retries: 0,
        }
    }
}

/// One notification per completed tile attempt, plus a terminal marker.
///
/// Exactly one of `tile` and `error` is set on per-tile events. The marker
/// event closing a fully served session carries neither and has
/// `session_final` set. Delivery order follows completion order, not
/// priority order.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    /// The fetched tile, on success.
    pub tile: Option<Tile>,
    /// What went wrong, on failure.
    pub error: Option<Arc<FetchError>>,
    /// Set on the marker event emitted when a session drains its wanted
    /// list.
    pub session_final: bool,
}

/// Point-in-time counters describing what the fetcher has done so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetcherSnapshot {
    pub sessions_started: u64,
    pub tiles_delivered: u64,
    pub tiles_failed: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct FetcherMetrics {
    sessions_started: AtomicU64,
    tiles_delivered: AtomicU64,
    tiles_failed: AtomicU64,
}

impl FetcherMetrics {
    fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    fn tile_delivered(&self) {
        self.tiles_delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn tile_failed(&self) {
        self.tiles_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Viewport-driven tile fetch orchestrator.
///
/// Cheap to share: internally reference counted. Requires a tokio runtime;
/// sessions run as spawned tasks. Tile indices are schema-relative, so the
/// memory cache handed in here must be cleared if the tile source is ever
/// swapped for one with a different schema.
pub struct Fetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    source: Arc<dyn TileSource>,
    memory_cache: Arc<dyn TileCache>,
    strategy: Box<dyn FetchStrategy>,
    viewport: Mutex<Option<Viewport>>,
    in_flight: DashSet<TileIndex>,
    retries: Mutex<RetryTracker>,
    abort: CancellationToken,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<FetchEvent>>>,
    fetch_permits: Arc<Semaphore>,
    metrics: FetcherMetrics,
}

impl Fetcher {
    /// Create a fetcher with the default configuration and strategy.
    pub fn new(source: Arc<dyn TileSource>, memory_cache: Arc<dyn TileCache>) -> Self {
        Self::with_config(source, memory_cache, FetcherConfig::default())
    }

    /// Create a fetcher with an explicit configuration.
    pub fn with_config(
        source: Arc<dyn TileSource>,
        memory_cache: Arc<dyn TileCache>,
        config: FetcherConfig,
    ) -> Self {
        Self::with_strategy(source, memory_cache, config, CoarseToFineStrategy)
    }

    /// Create a fetcher with an explicit configuration and tile strategy.
    pub fn with_strategy(
        source: Arc<dyn TileSource>,
        memory_cache: Arc<dyn TileCache>,
        config: FetcherConfig,
        strategy: impl FetchStrategy + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                source,
                memory_cache,
                strategy: Box::new(strategy),
                viewport: Mutex::new(None),
                in_flight: DashSet::new(),
                retries: Mutex::new(RetryTracker::with_max_retries(config.max_retries)),
                abort: CancellationToken::new(),
                subscribers: Mutex::new(Vec::new()),
                fetch_permits: Arc::new(Semaphore::new(config.max_concurrent_fetches)),
                metrics: FetcherMetrics::default(),
            }),
        }
    }

    /// Replace the current viewport and start a fetch session for it.
    ///
    /// The previous session is not cancelled; it stops issuing new fetches
    /// once it notices the viewport moved on.
    pub fn view_changed(&self, extent: Extent, resolution: f64) {
        let viewport = Viewport { extent, resolution };
        *self.inner.viewport.lock() = Some(viewport);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_session(viewport).await });
    }

    /// Stop the fetcher for good.
    ///
    /// One-way: no further notifications are emitted, fetches already
    /// running finish but their results are discarded.
    pub fn abort_fetch(&self) {
        debug!("fetcher aborted");
        self.inner.abort.cancel();
    }

    /// Whether [`abort_fetch`](Self::abort_fetch) has been called.
    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_cancelled()
    }

    /// Register a subscriber for fetch notifications.
    ///
    /// Every subscriber sees every event; a dropped receiver is pruned on
    /// the next notification.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FetchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Number of tile fetches currently running.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Counters for introspection and tests.
    pub fn snapshot(&self) -> FetcherSnapshot {
        let metrics = &self.inner.metrics;
        FetcherSnapshot {
            sessions_started: metrics.sessions_started.load(Ordering::Relaxed),
            tiles_delivered: metrics.tiles_delivered.load(Ordering::Relaxed),
            tiles_failed: metrics.tiles_failed.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.len(),
        }
    }
}

impl FetcherInner {
    async fn run_session(self: Arc<Self>, snapshot: Viewport) {
        let Some(schema) = self.source.schema() else {
            debug!("tile source has no schema yet, nothing to fetch");
            return;
        };

        let level = match nearest_level(schema.resolutions(), snapshot.resolution) {
            Ok(level) => level,
            Err(e) => {
                warn!(error = %e, "cannot resolve a zoom level for this view");
                return;
            }
        };

        let wanted = self
            .strategy
            .tiles_wanted(schema, &snapshot.extent, &level);
        self.metrics.session_started();
        self.retries.lock().clear();
        debug!(level = %level, wanted = wanted.len(), "fetch session started");

        loop {
            if self.abort.is_cancelled() {
                return;
            }
            if *self.viewport.lock() != Some(snapshot) {
                debug!("viewport moved on, leaving the rest to the next session");
                return;
            }

            let missing = self.tiles_missing(&wanted);
            if missing.is_empty() {
                break;
            }

            let mut wave = JoinSet::new();
            for info in missing {
                if self.abort.is_cancelled() {
                    break;
                }
                if !self.begin_fetch(&info.index) {
                    continue;
                }
                let Ok(permit) = Arc::clone(&self.fetch_permits).acquire_owned().await else {
                    // the semaphore is never closed
                    self.in_flight.remove(&info.index);
                    return;
                };
                let inner = Arc::clone(&self);
                wave.spawn(async move {
                    let _permit = permit;
                    inner.fetch_one(info).await;
                });
            }

            if wave.is_empty() {
                // every missing tile is being fetched by an older session;
                // wait for those fetches instead of spinning
                tokio::time::sleep(WAVE_BACKOFF).await;
                continue;
            }
            while wave.join_next().await.is_some() {}
        }

        if !self.abort.is_cancelled() {
            debug!("fetch session complete");
            self.notify(FetchEvent {
                tile: None,
                error: None,
                session_final: true,
            });
        }
    }

    /// The wanted tiles not already in the memory cache and still worth
    /// attempting.
    fn tiles_missing(&self, wanted: &[TileInfo]) -> Vec<TileInfo> {
        let retries = self.retries.lock();
        wanted
            .iter()
            .filter(|info| {
                self.memory_cache.find(&info.index).is_none() && !retries.reached_max(&info.index)
            })
            .cloned()
            .collect()
    }

    /// Claim an index for fetching. Returns false if it is already in
    /// flight (here or in an older session) or has exhausted its attempts.
    fn begin_fetch(&self, index: &TileIndex) -> bool {
        if !self.in_flight.insert(index.clone()) {
            return false;
        }
        let mut retries = self.retries.lock();
        if retries.reached_max(index) {
            self.in_flight.remove(index);
            return false;
        }
        retries.record_attempt(index);
        true
    }

    async fn fetch_one(&self, info: TileInfo) {
        let result = self.source.fetch_tile(&info).await;
        self.in_flight.remove(&info.index);

        if self.abort.is_cancelled() {
            debug!(index = %info.index, "aborted, discarding fetch result");
            return;
        }

        match result {
            Ok(data) => {
                let tile = Tile::new(info, data);
                self.memory_cache.add(tile.clone());
                self.metrics.tile_delivered();
                self.notify(FetchEvent {
                    tile: Some(tile),
                    error: None,
                    session_final: false,
                });
            }
            Err(error) => {
                warn!(index = %info.index, error = %error, "tile fetch failed");
                self.metrics.tile_failed();
                self.notify(FetchEvent {
                    tile: None,
                    error: Some(Arc::new(error)),
                    session_final: false,
                });
            }
        }
    }

    fn notify(&self, event: FetchEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
