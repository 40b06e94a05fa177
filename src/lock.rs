//
// Single-holder async lock with a FIFO wait queue and timed acquisition
//
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{Error, ErrorKind, Result};

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct Inner {
    locked: bool,
    next_id: u64,
    waiters: VecDeque<Waiter>,
}

/// Asynchronous mutual exclusion without re-entrancy. Waiters are granted the
/// lock in arrival order; a timed waiter that elapses while queued is removed
/// without disturbing the queue.
#[derive(Default)]
pub struct Mutex {
    inner: StdMutex<Inner>,
}

impl Mutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock, waiting as long as it takes.
    pub async fn acquire(&self) -> Result<MutexGuard<'_>> {
        self.acquire_inner(None).await
    }

    /// Acquire the lock or fail with `AcquireTimeout` once `timeout` elapses.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<MutexGuard<'_>> {
        self.acquire_inner(Some(timeout)).await
    }

    /// Run `f` while holding the lock, releasing it when the future settles.
    pub async fn run_exclusive<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire().await?;
        let result = f().await;
        guard.release();
        Ok(result)
    }

    /// Like [`run_exclusive`](Self::run_exclusive) but gives up on the lock
    /// after `timeout`.
    pub async fn run_exclusive_timeout<F, Fut, T>(&self, f: F, timeout: Duration) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire_timeout(timeout).await?;
        let result = f().await;
        guard.release();
        Ok(result)
    }

    async fn acquire_inner(&self, timeout: Option<Duration>) -> Result<MutexGuard<'_>> {
        let (id, rx) = {
            let mut inner = self.inner.lock().expect("lock state poisoned");
            if !inner.locked {
                inner.locked = true;
                return Ok(MutexGuard {
                    lock: self,
                    released: false,
                });
            }
            let (tx, rx) = oneshot::channel();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.waiters.push_back(Waiter {
                id,
                tx,
            });
            (id, rx)
        };

        let granted = match timeout {
            None => rx.await.is_ok(),
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(result) => result.is_ok(),
                Err(_elapsed) => return self.abandon_waiter(id),
            },
        };

        if granted {
            Ok(MutexGuard {
                lock: self,
                released: false,
            })
        } else {
            // The sender can only disappear if the lock state itself is gone.
            Err(Error::new(ErrorKind::AcquireFailed, "Lock was destroyed while waiting"))
        }
    }

    /// A timed-out waiter removes exactly itself from the queue. If the grant
    /// raced ahead of the timer, the lock is ours and must be passed on.
    fn abandon_waiter(&self, id: u64) -> Result<MutexGuard<'_>> {
        let still_queued = {
            let mut inner = self.inner.lock().expect("lock state poisoned");
            match inner.waiters.iter().position(|w| w.id == id) {
                Some(pos) => {
                    inner.waiters.remove(pos);
                    true
                }
                None => false,
            }
        };

        if !still_queued {
            self.release_internal();
        }
        Err(Error::new(ErrorKind::AcquireTimeout, "Timed out waiting for lock"))
    }

    fn release_internal(&self) {
        let mut inner = self.inner.lock().expect("lock state poisoned");
        // Hand the lock to the first waiter still interested; skip waiters
        // whose futures were dropped.
        loop {
            match inner.waiters.pop_front() {
                Some(waiter) => {
                    if waiter.tx.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    inner.locked = false;
                    return;
                }
            }
        }
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.inner.lock().expect("lock state poisoned").waiters.len()
    }
}

/// Exclusive access handle. Dropping it releases the lock; [`release`] does
/// the same eagerly. A handle releases at most once.
///
/// [`release`]: MutexGuard::release
pub struct MutexGuard<'a> {
    lock: &'a Mutex,
    released: bool,
}

impl MutexGuard<'_> {
    pub fn release(mut self) {
        if !self.released {
            self.released = true;
            self.lock.release_internal();
        }
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.lock.release_internal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn uncontended_acquire_and_release() {
        let lock = Mutex::new();
        let guard = lock.acquire().await.unwrap();
        guard.release();
        let guard = lock.acquire().await.unwrap();
        drop(guard);
        lock.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn run_exclusive_returns_the_closure_result() {
        let lock = Mutex::new();
        let out = lock.run_exclusive(|| async { 41 + 1 }).await.unwrap();
        assert_eq!(out, 42);
        // Lock is free again afterwards
        lock.acquire_timeout(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_granted_in_fifo_order() {
        let lock = Arc::new(Mutex::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let guard = lock.acquire().await.unwrap();

        for i in 0..5 {
            let lock = Arc::clone(&lock);
            let tx = tx.clone();
            tokio::spawn(async move {
                let guard = lock.acquire().await.unwrap();
                tx.send(i).unwrap();
                guard.release();
            });
            // Let the task park itself in the queue before spawning the next
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(lock.queue_len(), 5);
        guard.release();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let mut order = Vec::new();
        while let Ok(i) = rx.try_recv() {
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_waiter_is_removed_and_skipped() {
        let lock = Arc::new(Mutex::new());
        let guard = lock.acquire().await.unwrap();

        let short = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire_timeout(Duration::from_millis(50)).await.map(|g| g.release()) })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let patient = {
            let lock = Arc::clone(&lock);
            let tx = tx.clone();
            tokio::spawn(async move {
                let guard = lock.acquire().await.unwrap();
                tx.send("patient").unwrap();
                guard.release();
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The 50ms waiter has elapsed while queued
        let err = short.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AcquireTimeout);
        assert_eq!(lock.queue_len(), 1);

        // Releasing now must go to the remaining waiter
        guard.release();
        patient.await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), "patient");
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_timeout_fails_while_held() {
        let lock = Mutex::new();
        let _guard = lock.acquire().await.unwrap();
        let err = lock.acquire_timeout(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AcquireTimeout);
    }

    #[tokio::test]
    async fn guard_drop_releases_exactly_once() {
        let lock = Mutex::new();
        {
            let _guard = lock.acquire().await.unwrap();
        }
        // A second acquire proves the single release left the lock free
        let guard = lock.acquire().await.unwrap();
        guard.release();
    }
}
