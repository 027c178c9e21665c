//! Asynchronous FIFO mutual exclusion.
//!
//! `handoff` provides an async [`Mutex`](sync::Mutex) and
//! [`Semaphore`](sync::Semaphore) for serializing or bounding access to a
//! shared resource from async code. Both grant strictly in arrival order and
//! hand a released permit directly to the oldest waiter.
//!
//! # Modules
//!
//! - [`sync`]: the primitives, their guards and futures
//! - [`cancel`]: opt-in cancellation for waiting acquirers
//! - [`config`]: named capacity limits with layered loading
//! - [`error`]: crate error types
//!
//! # Example
//!
//! ```
//! use handoff::sync::Semaphore;
//! use std::sync::Arc;
//!
//! let uploads = Arc::new(Semaphore::new(2)?);
//! futures_lite::future::block_on(async {
//!     let permit = Arc::clone(&uploads).acquire_owned().await;
//!     // ... talk to the upload endpoint ...
//!     permit.release();
//! });
//! # Ok::<(), handoff::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod sync;

#[cfg(test)]
#[macro_use]
pub(crate) mod test_utils;

pub use cancel::CancelToken;
pub use config::{ConfigError, ConfigLoader, LimitsConfig};
pub use error::{Error, Result};
pub use sync::{AcquireError, Mutex, MutexGuard, Semaphore, SemaphorePermit};
