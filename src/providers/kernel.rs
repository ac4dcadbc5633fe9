// SPDX-License-Identifier: MIT

//! Machine-scoped lock over a named binary semaphore.
//!
//! The semaphore namespace is an external capability injected through
//! [`SemaphoreProvider`] rather than hidden global state. The object starts
//! available, is atomically claimed by exactly one waiter per signal, and is
//! explicitly re-signaled on release. Access control is fixed when the named
//! object is first created; whichever access the creating process chose is
//! what every later opener gets, and the opener's own choice is ignored.
//! That is a property of the primitive, not something this backend tries to
//! repair.

use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::bridge;
use crate::cancel::CancelToken;
use crate::error::{BackendError, LockError};
use crate::name::{LockName, NameRules};
use crate::providers::{Acquisition, BlockingProvider, Provider};
use crate::timeout::Timeout;

/// Naming constraints for the machine-wide object namespace.
pub const KERNEL_NAME_RULES: NameRules = NameRules {
    backend_limit: 260,
    reserved_prefix: "Global\\",
    separator: '\\',
};

/// Access granted to other principals when the named object is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationAccess {
    /// Any principal on the machine may wait on and signal the object.
    ///
    /// The default: unrelated processes and users must be able to both
    /// acquire and release the same named lock.
    #[default]
    Everyone,
    /// Only the creating principal.
    Creator,
}

/// Which source completed a multi-wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitVerdict {
    /// The semaphore was claimed by this waiter.
    Signaled,
    /// The bound elapsed before anything completed.
    TimedOut,
    /// The cancellation signal completed first.
    Canceled,
}

/// One-shot completion callback for a registered wait; `true` means the
/// semaphore was claimed, `false` that the timeout elapsed.
pub type WaitCallback = Box<dyn FnOnce(bool) + Send>;

/// Handle to a registered wait.
///
/// Deregistration is synchronous: once `deregister` (or drop) returns, the
/// callback either already ran or never will, and if it never ran the
/// semaphore was not claimed on this registration's behalf.
#[must_use = "dropping the registration deregisters the wait"]
pub struct WaitRegistration {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl WaitRegistration {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn deregister(self) {}
}

impl Drop for WaitRegistration {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Namespace of named, machine-visible binary semaphores.
pub trait SemaphoreProvider {
    type Handle: SemaphoreHandle;

    /// Open the named object, creating it in the available state with the
    /// given access when it does not exist yet. `access` is ignored when the
    /// object already exists.
    fn create_or_open(
        &self,
        name: &LockName,
        access: CreationAccess,
    ) -> Result<Self::Handle, BackendError>;
}

/// A live reference to one named semaphore. Dropping the handle closes it.
pub trait SemaphoreHandle: Send + Sync + 'static {
    /// Block until the semaphore is claimed (`true`) or `timeout` elapses
    /// (`false`).
    fn wait(&self, timeout: Timeout) -> Result<bool, BackendError>;

    /// Block on the semaphore and the cancellation signal at once, bounded by
    /// `timeout`. Exactly one verdict is produced; when both sources are
    /// ready in the same instant the semaphore wins.
    fn wait_any(&self, timeout: Timeout, cancel: &CancelToken) -> Result<WaitVerdict, BackendError>;

    /// Register a one-shot wait completing within `timeout`. A callback
    /// invoked with `true` has already claimed the semaphore.
    fn register_wait(&self, timeout: Timeout, done: WaitCallback) -> WaitRegistration;

    /// Return the semaphore to the available state, waking one waiter.
    fn signal(&self) -> Result<(), BackendError>;
}

/// A named machine-wide lock backed by a [`SemaphoreProvider`].
///
/// Stateless beyond its validated name; safe to share across threads and to
/// construct many times for the same name.
#[derive(Debug)]
pub struct KernelLock<P>
where
    P: SemaphoreProvider,
{
    name: LockName,
    access: CreationAccess,
    provider: P,
}

impl<P> KernelLock<P>
where
    P: SemaphoreProvider,
{
    /// Validate `name` and build a lock object. No resource is touched until
    /// an acquisition attempt.
    pub fn new(provider: P, name: &str) -> Result<Self, LockError> {
        Ok(Self {
            name: LockName::validate(name, &KERNEL_NAME_RULES)?,
            access: CreationAccess::default(),
            provider,
        })
    }

    /// Access applied if an attempt ends up creating the named object.
    pub fn creation_access(mut self, access: CreationAccess) -> Self {
        self.access = access;
        self
    }

    pub fn name(&self) -> &LockName {
        &self.name
    }

    fn open(&self) -> Result<P::Handle, LockError> {
        self.provider
            .create_or_open(&self.name, self.access)
            .map_err(LockError::Backend)
    }
}

impl<P> Provider for KernelLock<P>
where
    P: SemaphoreProvider,
{
    type Guard = KernelGuard<P::Handle>;

    async fn try_acquire_async(
        &self,
        timeout: Timeout,
        cancel: &CancelToken,
    ) -> Result<Acquisition<Self::Guard>, LockError> {
        let handle = self.open()?;
        // An error from the bridge drops (closes) the handle before it
        // propagates.
        let verdict = bridge::await_claim(&handle, timeout, cancel).await?;
        Ok(finish(self.name.as_str(), handle, verdict))
    }
}

impl<P> BlockingProvider for KernelLock<P>
where
    P: SemaphoreProvider,
{
    fn try_acquire(
        &self,
        timeout: Timeout,
        cancel: &CancelToken,
    ) -> Result<Acquisition<Self::Guard>, LockError> {
        let handle = self.open()?;
        let verdict = if cancel.can_cancel() {
            handle.wait_any(timeout, cancel)
        } else {
            handle.wait(timeout).map(|claimed| {
                if claimed {
                    WaitVerdict::Signaled
                } else {
                    WaitVerdict::TimedOut
                }
            })
        }
        .map_err(LockError::Backend)?;
        Ok(finish(self.name.as_str(), handle, verdict))
    }
}

fn finish<H>(name: &str, handle: H, verdict: WaitVerdict) -> Acquisition<KernelGuard<H>>
where
    H: SemaphoreHandle,
{
    match verdict {
        WaitVerdict::Signaled => Acquisition::Acquired(KernelGuard::new(handle)),
        WaitVerdict::TimedOut => {
            debug!(name, "semaphore wait timed out");
            Acquisition::TimedOut
        }
        WaitVerdict::Canceled => {
            debug!(name, "semaphore wait canceled");
            Acquisition::Canceled
        }
    }
}

/// Release handle for a held kernel-object lock.
///
/// The handle occupies a single-owner slot that is atomically claimed on the
/// first release, so concurrent or repeated release calls signal the
/// semaphore exactly once. Dropping an unreleased guard releases it.
#[derive(Debug)]
pub struct KernelGuard<H>
where
    H: SemaphoreHandle,
{
    slot: Mutex<Option<H>>,
}

impl<H> KernelGuard<H>
where
    H: SemaphoreHandle,
{
    fn new(handle: H) -> Self {
        Self {
            slot: Mutex::new(Some(handle)),
        }
    }

    /// Signal the semaphore and close the handle. Calls after the first are
    /// no-ops.
    pub fn release(&self) -> Result<(), LockError> {
        let claimed = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match claimed {
            Some(handle) => handle.signal().map_err(LockError::Backend),
            None => Ok(()),
        }
    }

    pub fn is_released(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<H> Drop for KernelGuard<H>
where
    H: SemaphoreHandle,
{
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            if let Err(error) = handle.signal() {
                debug!(%error, "failed to signal semaphore on drop");
            }
        }
    }
}
