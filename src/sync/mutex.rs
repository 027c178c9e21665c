//! Async mutex with FIFO handoff.
//!
//! At most one guard exists at a time. Tasks that find the mutex held are
//! queued in arrival order; dropping (or [releasing](MutexGuard::release))
//! the guard hands the lock straight to the oldest waiter, so a task that
//! calls [`Mutex::lock`] later can never overtake one that is already
//! waiting.
//!
//! # Example
//!
//! ```
//! use handoff::sync::Mutex;
//!
//! let mutex = Mutex::new(0u32);
//! futures_lite::future::block_on(async {
//!     let mut guard = mutex.lock().await;
//!     *guard += 1;
//!     guard.release();
//! });
//! assert!(!mutex.is_locked());
//! ```

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::AcquireError;
use super::queue::{AcquireSlot, Gate};
use crate::cancel::CancelToken;

/// Error returned when trying to lock without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLockError {
    /// The mutex is held, or other tasks are already waiting for it.
    Locked,
}

impl std::fmt::Display for TryLockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "mutex is locked"),
        }
    }
}

impl std::error::Error for TryLockError {}

/// An async mutex for mutual exclusion.
#[derive(Debug)]
pub struct Mutex<T> {
    /// The protected data.
    data: UnsafeCell<T>,
    /// One permit: held means locked.
    gate: Gate,
}

// Safety: access to `data` is serialized by the single-permit gate.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            data: UnsafeCell::new(value),
            gate: Gate::new(1, None),
        }
    }

    /// Creates an unlocked mutex whose log events carry `label`.
    #[must_use]
    pub fn with_label(value: T, label: impl Into<Arc<str>>) -> Self {
        Self {
            data: UnsafeCell::new(value),
            gate: Gate::new(1, Some(label.into())),
        }
    }

    /// Returns the label given at construction, or `"unnamed"`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.gate.label()
    }

    /// Returns true if a guard is currently outstanding (including one
    /// handed to a waiter that has not been polled yet).
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.gate.available() == 0
    }

    /// Returns the number of tasks currently waiting for the lock.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.gate.waiters()
    }

    /// Acquires the mutex, waiting behind earlier callers if it is held.
    ///
    /// The returned future never fails. Dropping it before completion
    /// withdraws from the queue.
    pub fn lock(&self) -> LockFuture<'_, T> {
        LockFuture {
            mutex: self,
            slot: AcquireSlot::default(),
        }
    }

    /// Like [`lock`](Self::lock), but stops waiting with
    /// [`AcquireError::Cancelled`] once `token` is cancelled.
    pub fn lock_with(&self, token: &CancelToken) -> CancellableLockFuture<'_, T> {
        CancellableLockFuture {
            mutex: self,
            token: token.clone(),
            slot: AcquireSlot::default(),
        }
    }

    /// Tries to acquire the mutex without waiting.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, TryLockError> {
        if self.gate.try_acquire() {
            Ok(MutexGuard { mutex: self })
        } else {
            Err(TryLockError::Locked)
        }
    }

    /// Acquires the mutex through an `Arc`, returning a guard that owns a
    /// reference to it and can be moved into another task.
    pub fn lock_owned(self: Arc<Self>) -> OwnedLockFuture<T> {
        OwnedLockFuture {
            mutex: Some(self),
            slot: AcquireSlot::default(),
        }
    }

    /// Tries to acquire the mutex through an `Arc` without waiting.
    pub fn try_lock_owned(self: Arc<Self>) -> Result<OwnedMutexGuard<T>, TryLockError> {
        if self.gate.try_acquire() {
            Ok(OwnedMutexGuard { mutex: self })
        } else {
            Err(TryLockError::Locked)
        }
    }

    /// Returns a mutable reference to the underlying data.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Future returned by [`Mutex::lock`].
#[must_use = "futures do nothing unless polled"]
pub struct LockFuture<'a, T> {
    mutex: &'a Mutex<T>,
    slot: AcquireSlot,
}

impl<'a, T> Future for LockFuture<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this.slot.poll_grant(&this.mutex.gate, context) {
            Poll::Ready(()) => Poll::Ready(MutexGuard { mutex: this.mutex }),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for LockFuture<'_, T> {
    fn drop(&mut self) {
        self.slot.abandon(&self.mutex.gate);
    }
}

/// Future returned by [`Mutex::lock_with`].
#[must_use = "futures do nothing unless polled"]
pub struct CancellableLockFuture<'a, T> {
    mutex: &'a Mutex<T>,
    token: CancelToken,
    slot: AcquireSlot,
}

impl<'a, T> Future for CancellableLockFuture<'a, T> {
    type Output = Result<MutexGuard<'a, T>, AcquireError>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this
            .slot
            .poll_grant_or_cancel(&this.mutex.gate, &this.token, context)
        {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(MutexGuard { mutex: this.mutex })),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for CancellableLockFuture<'_, T> {
    fn drop(&mut self) {
        self.slot.abandon_cancellable(&self.mutex.gate, &self.token);
    }
}

/// Future returned by [`Mutex::lock_owned`].
#[must_use = "futures do nothing unless polled"]
pub struct OwnedLockFuture<T> {
    /// Taken when the guard is built.
    mutex: Option<Arc<Mutex<T>>>,
    slot: AcquireSlot,
}

impl<T> Future for OwnedLockFuture<T> {
    type Output = OwnedMutexGuard<T>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let Some(mutex) = this.mutex.as_ref() else {
            return Poll::Pending;
        };
        match this.slot.poll_grant(&mutex.gate, context) {
            Poll::Ready(()) => match this.mutex.take() {
                Some(mutex) => Poll::Ready(OwnedMutexGuard { mutex }),
                None => Poll::Pending,
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for OwnedLockFuture<T> {
    fn drop(&mut self) {
        if let Some(mutex) = &self.mutex {
            self.slot.abandon(&mutex.gate);
        }
    }
}

/// Exclusive access to the data of a [`Mutex`].
///
/// The guard is the release capability: [`release`](Self::release) or drop
/// unlocks the mutex exactly once.
#[must_use = "guard will be immediately released if not held"]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T> MutexGuard<'_, T> {
    /// Unlocks the mutex, handing it to the next waiter if there is one.
    pub fn release(self) {
        drop(self);
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard").field("data", &**self).finish()
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: the guard holds the only permit.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the only permit.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.gate.release();
    }
}

/// An owned guard that releases the mutex when dropped.
#[must_use = "guard will be immediately released if not held"]
pub struct OwnedMutexGuard<T> {
    mutex: Arc<Mutex<T>>,
}

unsafe impl<T: Sync> Sync for OwnedMutexGuard<T> {}

impl<T> OwnedMutexGuard<T> {
    /// Unlocks the mutex, handing it to the next waiter if there is one.
    pub fn release(self) {
        drop(self);
    }

    /// Returns the mutex this guard locks.
    #[must_use]
    pub fn mutex(&self) -> &Arc<Mutex<T>> {
        &self.mutex
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for OwnedMutexGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedMutexGuard")
            .field("data", &**self)
            .finish()
    }
}

impl<T> Deref for OwnedMutexGuard<T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        // Safety: the guard holds the only permit.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for OwnedMutexGuard<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the guard holds the only permit.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for OwnedMutexGuard<T> {
    fn drop(&mut self) {
        self.mutex.gate.release();
    }
}
