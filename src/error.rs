// SPDX-License-Identifier: MIT

use std::error::Error;
use std::time::Duration;

use thiserror::Error as ThisError;

/// Opaque failure reported by a backend collaborator (a semaphore provider or
/// a session provider).
pub type BackendError = Box<dyn Error + Send + Sync>;

#[derive(ThisError, Debug)]
pub enum LockError {
    #[error("lock name must not be empty")]
    EmptyName,

    #[error("lock name exceeds the maximum of {max} bytes")]
    NameTooLong { max: usize },

    #[error("lock name must not contain the reserved separator {separator:?}")]
    ReservedSeparator { separator: char },

    #[error("timeout of {0:?} is not representable as a bounded millisecond count")]
    InvalidTimeout(Duration),

    #[error("timed out waiting for lock")]
    Timeout,

    #[error("lock acquisition was canceled")]
    Canceled,

    #[error("backend error: {0}")]
    Backend(#[source] BackendError),
}

impl LockError {
    pub(crate) fn backend(error: impl Into<BackendError>) -> Self {
        LockError::Backend(error.into())
    }
}
