// SPDX-License-Identifier: MIT

use std::time::{Duration, Instant};

use crate::error::LockError;

/// Maximum wait expressible to a backend, in milliseconds.
///
/// Matches the bound of OS-level wait primitives; anything longer must be
/// requested as [`Timeout::Infinite`].
pub const MAX_TIMEOUT_MILLIS: u128 = u32::MAX as u128;

/// How long an acquisition attempt may wait.
///
/// Validated before any resource is created; an unrepresentable duration
/// fails fast with [`LockError::InvalidTimeout`] and no side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait up to the given duration. `Duration::ZERO` means a single
    /// attempt with no wait.
    Finite(Duration),
    /// Wait until the lock is acquired or the attempt is canceled.
    Infinite,
}

impl Timeout {
    pub const IMMEDIATE: Timeout = Timeout::Finite(Duration::ZERO);

    /// Validate an optional duration; `None` means wait indefinitely.
    pub fn from_option(timeout: Option<Duration>) -> Result<Self, LockError> {
        match timeout {
            None => Ok(Timeout::Infinite),
            Some(duration) => Timeout::from_duration(duration),
        }
    }

    pub fn from_duration(duration: Duration) -> Result<Self, LockError> {
        if duration.as_millis() > MAX_TIMEOUT_MILLIS {
            return Err(LockError::InvalidTimeout(duration));
        }
        Ok(Timeout::Finite(duration))
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Timeout::Finite(d) if d.is_zero())
    }

    /// The instant at which a wait started now would expire, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Timeout::Finite(duration) => Some(Instant::now() + *duration),
            Timeout::Infinite => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Timeout::Finite(duration) => Some(*duration),
            Timeout::Infinite => None,
        }
    }
}
