//! Synchronization primitives for the cache layer.

mod rwlock;

pub use rwlock::{AsyncRwLock, LockReleaser};
