// SPDX-License-Identifier: MIT

use crate::cancel::CancelToken;
use crate::error::LockError;
use crate::timeout::Timeout;

pub mod kernel;
pub mod memory;
pub mod session;

/// Three-way result of one acquisition attempt.
///
/// Exactly one variant is produced per attempt. `TimedOut` and `Canceled`
/// both mean no guard was obtained; only the facade decides whether they
/// surface as `None` or as an error, per entry point.
#[derive(Debug)]
pub enum Acquisition<G> {
    Acquired(G),
    TimedOut,
    Canceled,
}

impl<G> Acquisition<G> {
    pub fn acquired(self) -> Option<G> {
        match self {
            Acquisition::Acquired(guard) => Some(guard),
            Acquisition::TimedOut | Acquisition::Canceled => None,
        }
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, Acquisition::Acquired(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Acquisition::TimedOut)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Acquisition::Canceled)
    }
}

/// `Provider` is a trait that abstracts the backend specific details of the
/// lock acquisition mechanism.
///
/// One call is one attempt: bounded by `timeout`, interruptible through
/// `cancel`, yielding a tagged [`Acquisition`]. Errors are reserved for
/// backend failures; contention and cancellation are outcomes, not errors.
pub trait Provider {
    /// Release handle returned on success. Dropping it releases the lock;
    /// release happens at most once no matter how often it is requested.
    type Guard;

    #[allow(async_fn_in_trait)]
    async fn try_acquire_async(
        &self,
        timeout: Timeout,
        cancel: &CancelToken,
    ) -> Result<Acquisition<Self::Guard>, LockError>;
}

/// Backends whose wait primitive can block the calling thread directly.
///
/// Session-bound backends are typically async-only and do not implement this.
pub trait BlockingProvider: Provider {
    fn try_acquire(
        &self,
        timeout: Timeout,
        cancel: &CancelToken,
    ) -> Result<Acquisition<Self::Guard>, LockError>;
}
