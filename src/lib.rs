// SPDX-License-Identifier: MIT

//! Named locks for mutual exclusion across processes and database sessions.
//!
//! An [`ExLock`] serializes access to a shared resource identified by a
//! string name. Acquisition attempts take a timeout and an optional
//! [`CancelToken`]; success yields a release handle, and disposing that
//! handle is the only way to release the lock. At most one holder exists per
//! name within the lock's scope at any instant.
//!
//! Two backend families ship with the crate:
//!
//! - [`KernelLock`]: a machine-style scope over a named binary semaphore,
//!   provided through [`SemaphoreProvider`]. [`MemorySemaphores`] is the
//!   built-in process-scoped provider.
//! - [`SessionLock`]: a database-server scope over a session-bound advisory
//!   lock, provided through [`SessionProvider`]. The engine carries the
//!   savepoint protocol that lets a held lock survive command cancellation
//!   and statement timeouts.
//!
//! # Examples
//!
//! Blocking:
//! ```
//! use exlock::{CancelToken, ExLock, KernelLock, MemorySemaphores};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), exlock::LockError> {
//! let namespace = MemorySemaphores::new();
//! let lock = ExLock::builder()
//!     .provider(KernelLock::new(namespace, "reindex")?)
//!     .build();
//!
//! let guard = lock.acquire(Some(Duration::from_secs(1)), &CancelToken::never())?;
//! // exclusive work
//! guard.release()?;
//! # Ok(())
//! # }
//! ```
//!
//! Async, with cancellation:
//! ```
//! use exlock::{CancelToken, ExLock, KernelLock, LockError, MemorySemaphores};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), LockError> {
//!     let namespace = MemorySemaphores::new();
//!     let lock = ExLock::builder()
//!         .provider(KernelLock::new(namespace, "reindex")?)
//!         .build();
//!
//!     let cancel = CancelToken::new();
//!     match lock
//!         .try_acquire_async(Duration::from_millis(100), &cancel)
//!         .await?
//!     {
//!         Some(guard) => guard.release()?,
//!         None => println!("lock is busy"),
//!     }
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use bon::Builder;

pub mod cancel;
pub mod error;
pub mod name;
pub mod providers;
pub mod timeout;

mod bridge;

pub use cancel::{CancelRegistration, CancelToken};
pub use error::{BackendError, LockError};
pub use name::{LockName, NameRules};
pub use providers::kernel::{
    CreationAccess, KERNEL_NAME_RULES, KernelGuard, KernelLock, SemaphoreHandle, SemaphoreProvider,
    WaitVerdict,
};
pub use providers::memory::MemorySemaphores;
pub use providers::session::{
    AbortReason, LockReply, SESSION_NAME_RULES, Session, SessionGuard, SessionLock,
    SessionProvider,
};
pub use providers::{Acquisition, BlockingProvider, Provider};
pub use timeout::Timeout;

/// Uniform acquisition surface over any lock backend.
///
/// `try_acquire*` report timeout as `Ok(None)`; `acquire*` turn it into
/// [`LockError::Timeout`]. Cancellation always surfaces as
/// [`LockError::Canceled`]. Timeouts are validated before any resource is
/// created.
#[derive(Builder)]
pub struct ExLock<P>
where
    P: Provider,
{
    provider: P,
}

impl<P> ExLock<P>
where
    P: Provider,
{
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// One suspending acquisition attempt; `None` means the lock was not
    /// obtained within `timeout`.
    pub async fn try_acquire_async(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<P::Guard>, LockError> {
        let timeout = Timeout::from_duration(timeout)?;
        flatten(self.provider.try_acquire_async(timeout, cancel).await?)
    }

    /// Suspending acquisition that fails with [`LockError::Timeout`] when
    /// the lock is not obtained in time. `None` waits indefinitely.
    pub async fn acquire_async(
        &self,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<P::Guard, LockError> {
        let timeout = Timeout::from_option(timeout)?;
        flatten(self.provider.try_acquire_async(timeout, cancel).await?)?
            .ok_or(LockError::Timeout)
    }

    /// Acquire, run `work`, release (by dropping the guard).
    pub async fn with_async<R>(
        &self,
        timeout: Option<Duration>,
        cancel: &CancelToken,
        work: impl AsyncFnOnce() -> R,
    ) -> Result<R, LockError> {
        let guard = self.acquire_async(timeout, cancel).await?;
        let result = work().await;
        drop(guard);
        Ok(result)
    }
}

impl<P> ExLock<P>
where
    P: BlockingProvider,
{
    /// One blocking acquisition attempt; may block the calling thread for up
    /// to `timeout`.
    pub fn try_acquire(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Option<P::Guard>, LockError> {
        let timeout = Timeout::from_duration(timeout)?;
        flatten(self.provider.try_acquire(timeout, cancel)?)
    }

    /// Blocking acquisition that fails with [`LockError::Timeout`] when the
    /// lock is not obtained in time. `None` waits indefinitely.
    pub fn acquire(
        &self,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<P::Guard, LockError> {
        let timeout = Timeout::from_option(timeout)?;
        flatten(self.provider.try_acquire(timeout, cancel)?)?.ok_or(LockError::Timeout)
    }

    /// Acquire, run `work`, release (by dropping the guard).
    pub fn with<R>(
        &self,
        timeout: Option<Duration>,
        cancel: &CancelToken,
        work: impl FnOnce() -> R,
    ) -> Result<R, LockError> {
        let guard = self.acquire(timeout, cancel)?;
        let result = work();
        drop(guard);
        Ok(result)
    }
}

/// Outer conversion of the three-way outcome: cancellation becomes an error,
/// timeout becomes `None`.
fn flatten<G>(outcome: Acquisition<G>) -> Result<Option<G>, LockError> {
    match outcome {
        Acquisition::Acquired(guard) => Ok(Some(guard)),
        Acquisition::TimedOut => Ok(None),
        Acquisition::Canceled => Err(LockError::Canceled),
    }
}
