//! Asynchronous mutual-exclusion primitives with FIFO handoff.
//!
//! # Primitives
//!
//! - [`Mutex`]: at most one holder at a time
//! - [`Semaphore`]: at most `capacity` holders at a time
//!
//! # Handoff
//!
//! Both primitives share one queueing discipline. An acquire that cannot be
//! satisfied immediately joins a FIFO queue. Releasing a guard or permit
//! while waiters are queued transfers it directly to the head waiter: the
//! mutex stays locked and the semaphore's available count is untouched, so
//! a newcomer can never overtake a waiter.
//!
//! # Release
//!
//! The guard or permit returned by an acquire is the release capability. It
//! is released exactly once, either through its `release` method or when it
//! is dropped, which also covers early returns and unwinding.
//!
//! # Cancellation
//!
//! `lock`/`acquire` wait indefinitely. Callers that need to give up pass a
//! [`CancelToken`](crate::cancel::CancelToken) to `lock_with`/`acquire_with`.
//! Dropping a pending acquire future also withdraws it from the queue.

mod mutex;
mod queue;
mod semaphore;

pub use mutex::{
    CancellableLockFuture, LockFuture, Mutex, MutexGuard, OwnedLockFuture, OwnedMutexGuard,
    TryLockError,
};
pub use semaphore::{
    AcquireFuture, CancellableAcquireFuture, OwnedAcquireFuture, OwnedSemaphorePermit, Semaphore,
    SemaphorePermit, TryAcquireError,
};

/// Error returned when a cancellable acquire gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// The cancel token fired while waiting.
    Cancelled,
}

impl std::fmt::Display for AcquireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "acquire cancelled"),
        }
    }
}

impl std::error::Error for AcquireError {}
