//! The fetch engine: deciding what a view needs and getting it there.

mod fetcher;
mod retry;
mod strategy;

pub use fetcher::{FetchEvent, Fetcher, FetcherConfig, FetcherSnapshot};
pub use retry::RetryTracker;
pub use strategy::{CoarseToFineStrategy, FetchStrategy};
