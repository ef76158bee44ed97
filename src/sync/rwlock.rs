//! Writer-preferring reader/writer lock with blocking and suspending entry.
//!
//! Serializes access to the persistent cache's backing store. Readers run
//! concurrently while no writer wants the lock; the moment a writer queues,
//! later readers line up behind it (readers already holding the lock finish
//! normally). A releasing writer hands the lock to the next queued writer,
//! or, if none is waiting, wakes every queued reader as one batch. Writers
//! are served in strict FIFO order.
//!
//! Both acquisition styles share one state machine and one wait queue, so
//! blocking callers and task-based callers exclude each other correctly:
//!
//! ```text
//! read()/write()                   ──┐
//!                                    ├──► LockState { status, queues } ──► oneshot wakeup
//! read_blocking()/write_blocking() ──┘
//! ```
//!
//! Nested acquisition of the same lock by one logical operation deadlocks;
//! there is no deadlock detection.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// `status` tracks who holds the lock: `0` free, `n > 0` that many readers,
/// `-1` a single writer.
#[derive(Default)]
struct LockState {
    status: i64,
    waiting_writers: VecDeque<oneshot::Sender<()>>,
    waiting_readers: Vec<oneshot::Sender<()>>,
}

enum Acquired {
    Immediate,
    Queued(oneshot::Receiver<()>),
}

/// Fair asynchronous reader/writer lock.
///
/// At most one writer holds the lock at a time, and readers are never
/// active while a writer is. See the module docs for the fairness policy.
#[derive(Default)]
pub struct AsyncRwLock {
    state: Mutex<LockState>,
}

impl AsyncRwLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for shared reading, suspending while queued.
    pub async fn read(&self) -> LockReleaser<'_> {
        match self.enqueue_read() {
            Acquired::Immediate => LockReleaser::reader(self),
            Acquired::Queued(rx) => {
                // The sender lives in the lock state and signals before it
                // is dropped, so this only fails if the waiter was skipped
                // after cancellation elsewhere; the grant protocol already
                // counted us either way.
                let _ = rx.await;
                LockReleaser::reader(self)
            }
        }
    }

    /// Acquire the lock for shared reading, blocking the thread while queued.
    ///
    /// Must not be called from an async context; use [`read`](Self::read)
    /// there instead.
    pub fn read_blocking(&self) -> LockReleaser<'_> {
        match self.enqueue_read() {
            Acquired::Immediate => LockReleaser::reader(self),
            Acquired::Queued(rx) => {
                let _ = rx.blocking_recv();
                LockReleaser::reader(self)
            }
        }
    }

    /// Acquire the lock exclusively, suspending while queued.
    pub async fn write(&self) -> LockReleaser<'_> {
        match self.enqueue_write() {
            Acquired::Immediate => LockReleaser::writer(self),
            Acquired::Queued(rx) => {
                let _ = rx.await;
                LockReleaser::writer(self)
            }
        }
    }

    /// Acquire the lock exclusively, blocking the thread while queued.
    ///
    /// Must not be called from an async context; use [`write`](Self::write)
    /// there instead.
    pub fn write_blocking(&self) -> LockReleaser<'_> {
        match self.enqueue_write() {
            Acquired::Immediate => LockReleaser::writer(self),
            Acquired::Queued(rx) => {
                let _ = rx.blocking_recv();
                LockReleaser::writer(self)
            }
        }
    }

    fn enqueue_read(&self) -> Acquired {
        let mut state = self.state.lock();
        if state.status >= 0 && state.waiting_writers.is_empty() {
            state.status += 1;
            Acquired::Immediate
        } else {
            let (tx, rx) = oneshot::channel();
            state.waiting_readers.push(tx);
            Acquired::Queued(rx)
        }
    }

    fn enqueue_write(&self) -> Acquired {
        let mut state = self.state.lock();
        if state.status == 0 {
            state.status = -1;
            Acquired::Immediate
        } else {
            let (tx, rx) = oneshot::channel();
            state.waiting_writers.push_back(tx);
            Acquired::Queued(rx)
        }
    }

    fn release_read(&self) {
        let mut state = self.state.lock();
        state.status -= 1;
        if state.status == 0 {
            Self::wake_next(&mut state);
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock();
        state.status = 0;
        Self::wake_next(&mut state);
    }

    /// Hand a free lock to the next queued writer, or failing that wake the
    /// whole reader batch. Waiters that dropped their receiver (a cancelled
    /// acquisition future) are skipped.
    fn wake_next(state: &mut LockState) {
        while let Some(writer) = state.waiting_writers.pop_front() {
            if writer.send(()).is_ok() {
                state.status = -1;
                return;
            }
        }

        let mut granted = 0;
        for reader in state.waiting_readers.drain(..) {
            if reader.send(()).is_ok() {
                granted += 1;
            }
        }
        state.status = granted;
    }
}

/// Scoped release handle returned by every acquisition.
///
/// Releases the lock on drop. [`release`](Self::release) releases early and
/// is idempotent: a handle that has already released owns nothing and does
/// nothing.
pub struct LockReleaser<'a> {
    lock: Option<&'a AsyncRwLock>,
    writer: bool,
}

impl<'a> LockReleaser<'a> {
    fn reader(lock: &'a AsyncRwLock) -> Self {
        Self {
            lock: Some(lock),
            writer: false,
        }
    }

    fn writer(lock: &'a AsyncRwLock) -> Self {
        Self {
            lock: Some(lock),
            writer: true,
        }
    }

    /// Release the lock now. Calling this a second time is a no-op.
    pub fn release(&mut self) {
        if let Some(lock) = self.lock.take() {
            if self.writer {
                lock.release_write();
            } else {
                lock.release_read();
            }
        }
    }
}

impl Drop for LockReleaser<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_readers_share_the_lock() {
        let lock = AsyncRwLock::new();

        let r1 = lock.read().await;
        let r2 = lock.read().await;
        let r3 = lock.read().await;

        drop(r1);
        drop(r2);
        drop(r3);

        // all readers released, a writer can get in
        let _w = timeout(SHORT, lock.write()).await.expect("writer starved");
    }

    #[tokio::test]
    async fn test_writer_excludes_readers() {
        let lock = AsyncRwLock::new();

        let w = lock.write().await;
        assert!(timeout(SHORT, lock.read()).await.is_err());

        drop(w);
        let _r = timeout(SHORT, lock.read()).await.expect("reader starved");
    }

    #[tokio::test]
    async fn test_queued_writer_blocks_later_readers() {
        let lock = Arc::new(AsyncRwLock::new());

        let held = lock.read().await;

        // a writer queues behind the active reader
        let writer_lock = Arc::clone(&lock);
        let (writer_in, got_write) = oneshot::channel();
        let writer = tokio::spawn(async move {
            let guard = writer_lock.write().await;
            writer_in.send(()).unwrap();
            drop(guard);
        });

        // give the writer a moment to enqueue
        tokio::time::sleep(Duration::from_millis(10)).await;

        // a reader arriving after the writer must wait even though the lock
        // is currently only read-held
        assert!(timeout(SHORT, lock.read()).await.is_err());

        drop(held);
        timeout(SHORT, got_write).await.expect("writer never woken").unwrap();
        writer.await.unwrap();

        let _late = timeout(SHORT, lock.read()).await.expect("reader starved");
    }

    #[tokio::test]
    async fn test_writers_are_fifo() {
        let lock = Arc::new(AsyncRwLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = lock.write().await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let guard = lock.write().await;
                order.lock().push(i);
                drop(guard);
            }));
            // serialize enqueue order
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reader_batch_wakes_together() {
        let lock = Arc::new(AsyncRwLock::new());

        let writer_guard = lock.write().await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(tokio::spawn(async move {
                let _guard = lock.read().await;
                // hold briefly so the batch overlaps
                tokio::time::sleep(Duration::from_millis(20)).await;
            }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(writer_guard);

        // the whole batch must drain well within one serial execution budget
        for handle in handles {
            timeout(Duration::from_secs(1), handle)
                .await
                .expect("queued reader starved")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let lock = AsyncRwLock::new();

        let mut guard = lock.write().await;
        guard.release();
        guard.release(); // no-op, must not corrupt the state

        let _w = timeout(SHORT, lock.write()).await.expect("lock corrupted");
    }

    #[tokio::test]
    async fn test_explicit_release_then_drop() {
        let lock = AsyncRwLock::new();

        {
            let mut guard = lock.read().await;
            guard.release();
            // drop runs after an explicit release and must do nothing
        }

        let _w = timeout(SHORT, lock.write()).await.expect("lock corrupted");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_blocking_and_async_callers_exclude_each_other() {
        let lock = Arc::new(AsyncRwLock::new());
        let counter = Arc::new(Mutex::new(0i32));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = lock.write().await;
                let mut counter = counter.lock();
                *counter += 1;
                assert_eq!(*counter, 1, "writers overlapped");
                *counter -= 1;
            }));
        }
        for _ in 0..2 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(tokio::task::spawn_blocking(move || {
                let _guard = lock.write_blocking();
                let mut counter = counter.lock();
                *counter += 1;
                assert_eq!(*counter, 1, "writers overlapped");
                *counter -= 1;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let lock = Arc::new(AsyncRwLock::new());

        let guard = lock.write().await;

        // enqueue a writer, then cancel it before it is ever woken
        let cancelled = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                let _guard = lock.write().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancelled.abort();
        let _ = cancelled.await;

        drop(guard);

        // the dead waiter must not wedge the lock
        let _r = timeout(SHORT, lock.read()).await.expect("lock wedged");
    }
}
