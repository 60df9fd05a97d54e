//! Per-device re-entrant lock.
//!
//! One [`DeviceLock`] guards all command traffic to one recorder. The thread
//! that holds it may acquire it again without blocking, so a command method
//! that issues several exchanges (or calls another command method) never
//! deadlocks on itself. Other threads block until the outermost guard is
//! dropped, or until an optional acquisition timeout runs out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, trace};

use crate::error::CommandError;

#[derive(Debug, Default)]
pub struct DeviceLock {
    mutex: ReentrantMutex<()>,
    /// Nesting depth of the holding thread; only the holder changes it.
    depth: AtomicUsize,
    timeout: Option<Duration>,
}

impl DeviceLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A lock whose [`acquire`](Self::acquire) gives up after `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Acquire with the lock's default timeout.
    ///
    /// # Errors
    /// [`CommandError::LockTimeout`] if another thread kept the lock past
    /// the timeout.
    pub fn acquire(&self) -> Result<DeviceLockGuard<'_>, CommandError> {
        self.acquire_timeout(self.timeout)
    }

    /// Acquire, waiting at most `timeout` (`None` waits forever).
    ///
    /// # Errors
    /// [`CommandError::LockTimeout`] if another thread kept the lock past
    /// `timeout`.
    pub fn acquire_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> Result<DeviceLockGuard<'_>, CommandError> {
        let guard = match timeout {
            None => self.mutex.lock(),
            Some(limit) => self.mutex.try_lock_for(limit).ok_or_else(|| {
                debug!(waited_ms = limit.as_millis() as u64, "device lock busy");
                CommandError::lock_timeout(limit)
            })?,
        };
        Ok(self.enter(guard))
    }

    /// Acquire only if no other thread holds the lock.
    pub fn try_acquire(&self) -> Option<DeviceLockGuard<'_>> {
        self.mutex.try_lock().map(|guard| self.enter(guard))
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.mutex.is_owned_by_current_thread()
    }

    /// Nesting depth of the current holder; 0 when free.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn enter<'a>(&'a self, guard: ReentrantMutexGuard<'a, ()>) -> DeviceLockGuard<'a> {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(depth, "device lock acquired");
        DeviceLockGuard {
            lock: self,
            _guard: guard,
        }
    }
}

/// Held lock level. Dropping the outermost guard frees the lock.
///
/// Guards are tied to the thread that took them and cannot be sent.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct DeviceLockGuard<'a> {
    lock: &'a DeviceLock,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl std::fmt::Debug for DeviceLockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLockGuard")
            .field("depth", &self.lock.depth())
            .finish()
    }
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        let depth = self.lock.depth.fetch_sub(1, Ordering::AcqRel) - 1;
        if depth == 0 {
            trace!("device lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_reentrant_on_same_thread() {
        let lock = DeviceLock::new();
        let outer = lock.acquire().unwrap();
        let inner = lock.acquire().unwrap();
        assert_eq!(lock.depth(), 2);
        drop(inner);
        assert!(lock.is_locked());
        assert!(lock.is_held_by_current_thread());
        drop(outer);
        assert!(!lock.is_locked());
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn test_other_thread_blocks_until_release() {
        let lock = Arc::new(DeviceLock::new());
        let acquired = Arc::new(AtomicBool::new(false));
        let guard = lock.acquire().unwrap();

        let worker = {
            let lock = Arc::clone(&lock);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _guard = lock.acquire().unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(guard);
        worker.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_acquire_times_out_while_held_elsewhere() {
        let lock = Arc::new(DeviceLock::with_timeout(Some(Duration::from_millis(30))));
        let _guard = lock.acquire().unwrap();

        let lock2 = Arc::clone(&lock);
        let result = thread::spawn(move || {
            let started = Instant::now();
            let err = lock2.acquire().unwrap_err();
            (err, started.elapsed())
        })
        .join()
        .unwrap();

        assert_eq!(result.0, CommandError::lock_timeout(Duration::from_millis(30)));
        assert!(result.1 >= Duration::from_millis(30));
    }

    #[test]
    fn test_reentry_ignores_timeout() {
        let lock = DeviceLock::with_timeout(Some(Duration::ZERO));
        let outer = lock.acquire().unwrap();
        let inner = lock.acquire().unwrap();
        let innermost = lock.try_acquire().unwrap();
        assert_eq!(lock.depth(), 3);
        drop((innermost, inner, outer));
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_try_acquire() {
        let lock = Arc::new(DeviceLock::new());
        let guard = lock.acquire().unwrap();
        let lock2 = Arc::clone(&lock);
        let free = thread::spawn(move || lock2.try_acquire().is_some())
            .join()
            .unwrap();
        assert!(!free);
        drop(guard);
        assert!(lock.try_acquire().is_some());
    }
}
