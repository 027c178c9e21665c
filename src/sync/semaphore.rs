//! Counting semaphore with FIFO handoff.
//!
//! A semaphore limits how many tasks may hold a permit at once. The capacity
//! is fixed at construction. When every permit is out, acquirers queue in
//! arrival order, and a released permit goes directly to the oldest waiter
//! without ever being counted as available in between.
//!
//! # Example
//!
//! ```
//! use handoff::sync::Semaphore;
//!
//! let sem = Semaphore::new(2)?;
//! futures_lite::future::block_on(async {
//!     let a = sem.acquire().await;
//!     let _b = sem.acquire().await;
//!     assert_eq!(sem.available_permits(), 0);
//!     a.release();
//!     assert_eq!(sem.available_permits(), 1);
//! });
//! # Ok::<(), handoff::Error>(())
//! ```

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::AcquireError;
use super::queue::{AcquireSlot, Gate};
use crate::cancel::CancelToken;
use crate::error::Error;

/// Error returned when no permit can be taken without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAcquireError {
    /// Every permit is out, or other tasks are already waiting.
    NoPermits,
}

impl std::fmt::Display for TryAcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPermits => write!(f, "no semaphore permits available"),
        }
    }
}

impl std::error::Error for TryAcquireError {}

/// A counting semaphore for limiting concurrent access.
#[derive(Debug)]
pub struct Semaphore {
    gate: Gate,
}

impl Semaphore {
    /// Creates a semaphore allowing `capacity` concurrent holders.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Ok(Self::with_capacity(validate_capacity(capacity, None)?))
    }

    /// Creates a semaphore from a capacity that is known to be positive.
    #[must_use]
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            gate: Gate::new(capacity.get(), None),
        }
    }

    /// Creates a semaphore whose log events carry `label`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `capacity` is zero.
    pub fn with_label(capacity: usize, label: impl Into<Arc<str>>) -> Result<Self, Error> {
        let label = label.into();
        let capacity = validate_capacity(capacity, Some(&*label))?;
        Ok(Self {
            gate: Gate::new(capacity.get(), Some(label)),
        })
    }

    /// Returns the label given at construction, or `"unnamed"`.
    #[must_use]
    pub fn label(&self) -> &str {
        self.gate.label()
    }

    /// Returns the number of permits not currently issued.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.gate.available()
    }

    /// Returns the total number of permits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.gate.capacity()
    }

    /// Returns the number of tasks waiting for a permit.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.gate.waiters()
    }

    /// Acquires a permit, waiting behind earlier callers if none is free.
    ///
    /// The returned future never fails. Dropping it before completion
    /// withdraws from the queue.
    pub fn acquire(&self) -> AcquireFuture<'_> {
        AcquireFuture {
            semaphore: self,
            slot: AcquireSlot::default(),
        }
    }

    /// Like [`acquire`](Self::acquire), but stops waiting with
    /// [`AcquireError::Cancelled`] once `token` is cancelled.
    pub fn acquire_with(&self, token: &CancelToken) -> CancellableAcquireFuture<'_> {
        CancellableAcquireFuture {
            semaphore: self,
            token: token.clone(),
            slot: AcquireSlot::default(),
        }
    }

    /// Tries to acquire a permit without waiting.
    pub fn try_acquire(&self) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        if self.gate.try_acquire() {
            Ok(SemaphorePermit { semaphore: self })
        } else {
            Err(TryAcquireError::NoPermits)
        }
    }

    /// Acquires a permit through an `Arc`, returning a permit that can be
    /// moved into another task.
    pub fn acquire_owned(self: Arc<Self>) -> OwnedAcquireFuture {
        OwnedAcquireFuture {
            semaphore: Some(self),
            slot: AcquireSlot::default(),
        }
    }

    /// Tries to acquire an owned permit without waiting.
    pub fn try_acquire_owned(self: Arc<Self>) -> Result<OwnedSemaphorePermit, TryAcquireError> {
        if self.gate.try_acquire() {
            Ok(OwnedSemaphorePermit { semaphore: self })
        } else {
            Err(TryAcquireError::NoPermits)
        }
    }
}

fn validate_capacity(capacity: usize, label: Option<&str>) -> Result<NonZeroUsize, Error> {
    NonZeroUsize::new(capacity).ok_or_else(|| {
        Error::invalid_argument(format!(
            "semaphore `{}` capacity must be positive",
            label.unwrap_or("unnamed")
        ))
    })
}

/// Future returned by [`Semaphore::acquire`].
#[must_use = "futures do nothing unless polled"]
pub struct AcquireFuture<'a> {
    semaphore: &'a Semaphore,
    slot: AcquireSlot,
}

impl<'a> Future for AcquireFuture<'a> {
    type Output = SemaphorePermit<'a>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this.slot.poll_grant(&this.semaphore.gate, context) {
            Poll::Ready(()) => Poll::Ready(SemaphorePermit {
                semaphore: this.semaphore,
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for AcquireFuture<'_> {
    fn drop(&mut self) {
        self.slot.abandon(&self.semaphore.gate);
    }
}

/// Future returned by [`Semaphore::acquire_with`].
#[must_use = "futures do nothing unless polled"]
pub struct CancellableAcquireFuture<'a> {
    semaphore: &'a Semaphore,
    token: CancelToken,
    slot: AcquireSlot,
}

impl<'a> Future for CancellableAcquireFuture<'a> {
    type Output = Result<SemaphorePermit<'a>, AcquireError>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match this
            .slot
            .poll_grant_or_cancel(&this.semaphore.gate, &this.token, context)
        {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(SemaphorePermit {
                semaphore: this.semaphore,
            })),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for CancellableAcquireFuture<'_> {
    fn drop(&mut self) {
        self.slot.abandon_cancellable(&self.semaphore.gate, &self.token);
    }
}

/// Future returned by [`Semaphore::acquire_owned`].
#[must_use = "futures do nothing unless polled"]
pub struct OwnedAcquireFuture {
    /// Taken when the permit is built.
    semaphore: Option<Arc<Semaphore>>,
    slot: AcquireSlot,
}

impl Future for OwnedAcquireFuture {
    type Output = OwnedSemaphorePermit;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let Some(semaphore) = this.semaphore.as_ref() else {
            return Poll::Pending;
        };
        match this.slot.poll_grant(&semaphore.gate, context) {
            Poll::Ready(()) => match this.semaphore.take() {
                Some(semaphore) => Poll::Ready(OwnedSemaphorePermit { semaphore }),
                None => Poll::Pending,
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for OwnedAcquireFuture {
    fn drop(&mut self) {
        if let Some(semaphore) = &self.semaphore {
            self.slot.abandon(&semaphore.gate);
        }
    }
}

/// A permit from a [`Semaphore`].
///
/// The permit is the release capability: [`release`](Self::release) or drop
/// returns it exactly once.
#[must_use = "permit will be immediately released if not held"]
#[derive(Debug)]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl SemaphorePermit<'_> {
    /// Returns the permit, handing it to the next waiter if there is one.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.gate.release();
    }
}

/// An owned permit from a [`Semaphore`].
#[derive(Debug)]
#[must_use = "permit will be immediately released if not held"]
pub struct OwnedSemaphorePermit {
    semaphore: Arc<Semaphore>,
}

impl OwnedSemaphorePermit {
    /// Returns the permit, handing it to the next waiter if there is one.
    pub fn release(self) {
        drop(self);
    }

    /// Returns the semaphore this permit was taken from.
    #[must_use]
    pub fn semaphore(&self) -> &Arc<Semaphore> {
        &self.semaphore
    }
}

impl Drop for OwnedSemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.gate.release();
    }
}
