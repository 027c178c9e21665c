//! Explicit cancellation for waiting acquirers.
//!
//! Acquire operations never give up on their own. A caller that needs to
//! abandon a wait passes a [`CancelToken`] to
//! [`Mutex::lock_with`](crate::sync::Mutex::lock_with) or
//! [`Semaphore::acquire_with`](crate::sync::Semaphore::acquire_with) and
//! cancels it from elsewhere.
//!
//! # Example
//!
//! ```
//! use handoff::cancel::CancelToken;
//!
//! let token = CancelToken::new();
//! let child = token.clone();
//! assert!(!child.is_cancelled());
//! token.cancel();
//! assert!(child.is_cancelled());
//! ```

use parking_lot::Mutex as ParkingMutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;

/// A cloneable, one-shot cancellation signal.
///
/// Clones share state: cancelling any clone cancels all of them. Once
/// cancelled a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    registrations: ParkingMutex<Registrations>,
}

/// Wakers of tasks currently waiting under the token, keyed so a waiter can
/// refresh or remove its own entry.
#[derive(Debug, Default)]
struct Registrations {
    next_key: u64,
    wakers: SmallVec<[(u64, Waker); 4]>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once [`cancel`](Self::cancel) has been called on any clone.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the token and wakes every task waiting under it.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let wakers = std::mem::take(&mut self.inner.registrations.lock().wakers);
        tracing::debug!(woken = wakers.len(), "cancel token triggered");
        for (_, waker) in wakers {
            waker.wake();
        }
    }

    /// Registers `waker` to be woken on cancellation, or refreshes the entry
    /// under `key` from an earlier call. Returns the key to pass back on the
    /// next poll and to [`deregister`](Self::deregister).
    ///
    /// If the token is already cancelled the waker is woken immediately and
    /// `None` is returned, so a cancel racing with registration is never lost.
    pub(crate) fn register(&self, key: Option<u64>, waker: &Waker) -> Option<u64> {
        let mut registrations = self.inner.registrations.lock();
        // Checked under the lock: `cancel` sets the flag before draining.
        if self.is_cancelled() {
            drop(registrations);
            waker.wake_by_ref();
            return None;
        }
        if let Some(key) = key {
            if let Some((_, existing)) = registrations.wakers.iter_mut().find(|(k, _)| *k == key)
            {
                if !existing.will_wake(waker) {
                    existing.clone_from(waker);
                }
                return Some(key);
            }
        }
        let key = registrations.next_key;
        registrations.next_key = registrations.next_key.wrapping_add(1);
        registrations.wakers.push((key, waker.clone()));
        Some(key)
    }

    /// Drops the waker registered under `key`, if still present.
    pub(crate) fn deregister(&self, key: u64) {
        let mut registrations = self.inner.registrations.lock();
        if let Some(pos) = registrations.wakers.iter().position(|(k, _)| *k == key) {
            registrations.wakers.swap_remove(pos);
        }
    }

    #[cfg(test)]
    pub(crate) fn registered(&self) -> usize {
        self.inner.registrations.lock().wakers.len()
    }
}
