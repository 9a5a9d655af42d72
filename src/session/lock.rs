//! Advisory single-writer session lock
//!
//! `try_acquire` never blocks; `acquire` polls at a fixed interval until the
//! lock frees up, so a caller is never parked indefinitely without the option
//! of handing its work off through the notification queue instead. The
//! structural mutex here guards only the acquisition bookkeeping; the data it
//! protects is whatever the callers agree it protects.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Poll interval for blocking acquisition
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The advisory lock
#[derive(Debug, Default)]
pub struct SessionLock {
    locked: Mutex<bool>,
    available: Condvar,
}

impl SessionLock {
    /// A free lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquisition; true when the lock was taken
    pub fn try_acquire(&self) -> bool {
        let mut locked = self.locked.lock();
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    /// Blocking acquisition, polling every [`LOCK_POLL_INTERVAL`]
    pub fn acquire(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.available.wait_for(&mut locked, LOCK_POLL_INTERVAL);
        }
        *locked = true;
    }

    /// Release and wake one waiting acquirer
    pub fn release(&self) {
        let mut locked = self.locked.lock();
        *locked = false;
        self.available.notify_one();
    }

    /// Whether somebody currently holds the lock
    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_is_exclusive() {
        let lock = SessionLock::new();
        assert!(lock.try_acquire());
        assert!(!lock.try_acquire());
        lock.release();
        assert!(lock.try_acquire());
    }

    #[test]
    fn blocking_acquire_waits_for_release() {
        use std::sync::Arc;
        let lock = Arc::new(SessionLock::new());
        assert!(lock.try_acquire());
        let contender = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                lock.acquire();
                lock.release();
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        lock.release();
        contender.join().unwrap();
        assert!(!lock.is_locked());
    }
}
