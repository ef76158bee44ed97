//! End-to-end behavior of viewport-driven fetch sessions.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use tilepipe::cache::{MemoryTileCache, TileCache};
use tilepipe::coord::{Extent, Resolution, Tile, TileIndex, TileInfo};
use tilepipe::fetch::{FetchEvent, Fetcher};
use tilepipe::schema::{GridSchema, TileSchema};
use tilepipe::source::{FetchError, TileSource};

/// Scripted tile source recording every fetch it serves.
struct MockSource {
    schema: GridSchema,
    fail: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<TileIndex>>,
}

impl MockSource {
    fn new(schema: GridSchema) -> Self {
        Self {
            schema,
            fail: false,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> Vec<TileIndex> {
        self.calls.lock().clone()
    }

    fn calls_for(&self, index: &TileIndex) -> usize {
        self.calls.lock().iter().filter(|i| *i == index).count()
    }
}

impl TileSource for MockSource {
    fn schema(&self) -> Option<&dyn TileSchema> {
        Some(&self.schema)
    }

    fn fetch_tile<'a>(&'a self, info: &'a TileInfo) -> BoxFuture<'a, Result<Bytes, FetchError>> {
        Box::pin(async move {
            self.calls.lock().push(info.index.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                Err(FetchError::Http {
                    url: "mock://tile".into(),
                    message: "simulated failure".into(),
                })
            } else {
                Ok(Bytes::from_static(b"tile-bytes"))
            }
        })
    }
}

/// 4x4 single-level schema: 256px tiles at 1 unit/pixel over 1024x1024.
fn schema_4x4() -> GridSchema {
    GridSchema::new(
        Extent::new(0.0, 0.0, 1024.0, 1024.0),
        256,
        [Resolution::new("0", 1.0)],
    )
}

/// A view overlapping exactly tiles (0,0), (1,0) and (2,0).
fn three_tile_view() -> Extent {
    Extent::new(10.0, 10.0, 700.0, 200.0)
}

/// A view overlapping only tile (0,0).
fn one_tile_view() -> Extent {
    Extent::new(10.0, 10.0, 200.0, 200.0)
}

fn cached_tile(col: i32, row: i32) -> Tile {
    let min_x = col as f64 * 256.0;
    let min_y = row as f64 * 256.0;
    Tile::new(
        TileInfo::new(
            TileIndex::new("0", col, row),
            Extent::new(min_x, min_y, min_x + 256.0, min_y + 256.0),
        ),
        Bytes::from_static(b"already-cached"),
    )
}

/// Receive events until the session-final marker arrives.
async fn collect_until_final(events: &mut mpsc::UnboundedReceiver<FetchEvent>) -> Vec<FetchEvent> {
    let mut collected = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for the session to finish")
            .expect("event channel closed");
        let done = event.session_final;
        collected.push(event);
        if done {
            return collected;
        }
    }
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = Duration::from_secs(2);
    timeout(deadline, async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn session_fetches_only_the_missing_tile() {
    let source = Arc::new(MockSource::new(schema_4x4()));
    let cache = Arc::new(MemoryTileCache::new(64));
    cache.add(cached_tile(0, 0));
    cache.add(cached_tile(1, 0));

    let fetcher = Fetcher::new(source.clone(), cache.clone());
    let mut events = fetcher.subscribe();

    fetcher.view_changed(three_tile_view(), 1.0);
    let events = collect_until_final(&mut events).await;

    let missing = TileIndex::new("0", 2, 0);
    let tiles: Vec<&Tile> = events.iter().filter_map(|e| e.tile.as_ref()).collect();
    assert_eq!(tiles.len(), 1, "exactly one tile should have been fetched");
    assert_eq!(tiles[0].index(), &missing);

    assert_eq!(source.calls(), vec![missing.clone()]);
    assert_eq!(fetcher.in_flight_count(), 0);

    // the fetched tile is now in the memory cache
    assert!(cache.find(&missing).is_some());
}

#[tokio::test]
async fn failed_tile_is_retried_once_then_abandoned() {
    let source = Arc::new(MockSource::new(schema_4x4()).failing());
    let fetcher = Fetcher::new(source.clone(), Arc::new(MemoryTileCache::new(64)));
    let mut events = fetcher.subscribe();

    fetcher.view_changed(one_tile_view(), 1.0);
    let events = collect_until_final(&mut events).await;

    let errors = events.iter().filter(|e| e.error.is_some()).count();
    assert_eq!(errors, 2, "first attempt plus one retry");
    assert_eq!(source.calls().len(), 2);

    // the session still concluded despite the failures
    assert!(events.last().expect("events not empty").session_final);
    assert_eq!(fetcher.in_flight_count(), 0);
}

#[tokio::test]
async fn new_session_resets_the_retry_budget() {
    let source = Arc::new(MockSource::new(schema_4x4()).failing());
    let fetcher = Fetcher::new(source.clone(), Arc::new(MemoryTileCache::new(64)));
    let mut events = fetcher.subscribe();

    fetcher.view_changed(one_tile_view(), 1.0);
    collect_until_final(&mut events).await;
    assert_eq!(source.calls().len(), 2);

    // the same view again: the cleared tracker allows two fresh attempts
    fetcher.view_changed(one_tile_view(), 1.0);
    collect_until_final(&mut events).await;
    assert_eq!(source.calls().len(), 4);
}

#[tokio::test]
async fn abort_swallows_results_of_running_fetches() {
    let source =
        Arc::new(MockSource::new(schema_4x4()).with_delay(Duration::from_millis(100)));
    let fetcher = Fetcher::new(source.clone(), Arc::new(MemoryTileCache::new(64)));
    let mut events = fetcher.subscribe();

    fetcher.view_changed(three_tile_view(), 1.0);
    wait_until(|| !source.calls().is_empty()).await;

    fetcher.abort_fetch();

    // let the dispatched fetches run their course
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(events.try_recv().is_err(), "no events after abort");
    assert_eq!(fetcher.in_flight_count(), 0, "in-flight set still drained");
}

#[tokio::test]
async fn overlapping_sessions_share_one_fetch_per_tile() {
    let source =
        Arc::new(MockSource::new(schema_4x4()).with_delay(Duration::from_millis(50)));
    let cache = Arc::new(MemoryTileCache::new(64));
    let fetcher = Fetcher::new(source.clone(), cache);
    let mut events = fetcher.subscribe();

    // two sessions for the same viewport while the first fetch is in flight
    fetcher.view_changed(one_tile_view(), 1.0);
    fetcher.view_changed(one_tile_view(), 1.0);

    // both sessions conclude
    let mut finals = 0;
    let mut tiles = 0;
    while finals < 2 {
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("sessions never concluded")
            .expect("event channel closed");
        if event.session_final {
            finals += 1;
        }
        if event.tile.is_some() {
            tiles += 1;
        }
    }

    assert_eq!(source.calls().len(), 1, "the tile must be fetched only once");
    assert_eq!(tiles, 1);
}

#[tokio::test]
async fn stale_session_stops_fetching_but_still_reports_dispatched_work() {
    let tile_a = TileIndex::new("0", 0, 0);
    let tile_b = TileIndex::new("0", 3, 3);

    let source =
        Arc::new(MockSource::new(schema_4x4()).failing().with_delay(Duration::from_millis(50)));
    let fetcher = Fetcher::new(source.clone(), Arc::new(MemoryTileCache::new(64)));
    let mut events = fetcher.subscribe();

    // session A dispatches its first attempt for tile (0,0) ...
    fetcher.view_changed(one_tile_view(), 1.0);
    wait_until(|| source.calls_for(&tile_a) == 1).await;

    // ... then the viewport moves to tile (3,3) before that attempt fails
    fetcher.view_changed(Extent::new(800.0, 800.0, 1000.0, 1000.0), 1.0);
    let events = collect_until_final(&mut events).await;

    // session A must not have retried its tile: its one dispatched attempt
    // was allowed to finish (and got reported), nothing more
    assert_eq!(source.calls_for(&tile_a), 1);
    // session B ran the full attempt-plus-retry for its own tile
    assert_eq!(source.calls_for(&tile_b), 2);

    let errors = events.iter().filter(|e| e.error.is_some()).count();
    assert_eq!(errors, 3, "one stale failure from A, two from B");
}
