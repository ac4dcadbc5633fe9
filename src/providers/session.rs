// SPDX-License-Identifier: MIT

//! Lock backend pattern for server-side advisory locks bound to a session.
//!
//! Ownership of an advisory lock is inseparable from the liveness of the
//! session that claimed it: closing the session releases the lock. The
//! session is therefore opened for the attempt, exclusively reserved for the
//! lock's whole lifetime, and never handed back to a pool while held.
//!
//! Commands execute inside whatever transaction is currently open on the
//! session. When a command is aborted mid-flight -- by the cancellation
//! signal or by a server-enforced statement timeout -- the server marks the
//! enclosing transaction failed even though the connection stays up. The
//! remediation is always the same regardless of the trigger: establish a
//! savepoint immediately before any abortable command, and on abort roll
//! back to it. That restores the transaction as of the savepoint, keeping
//! everything claimed earlier (including the advisory lock) while discarding
//! only the aborted command.

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::{BackendError, LockError};
use crate::name::{LockName, NameRules};
use crate::providers::{Acquisition, Provider};
use crate::timeout::Timeout;

/// Naming constraints for session-scoped advisory locks.
pub const SESSION_NAME_RULES: NameRules = NameRules {
    backend_limit: 255,
    reserved_prefix: "exlock:",
    separator: '/',
};

/// Why the server aborted an in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The server-enforced statement timeout elapsed.
    StatementTimeout,
    /// The cancellation signal reached the server.
    Canceled,
}

/// Server's answer to a lock-request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReply {
    /// The advisory lock is now held by this session.
    Granted,
    /// Not granted within a no-wait request.
    Busy,
    /// The command was aborted; the enclosing transaction is now failed
    /// until rolled back to a savepoint.
    Aborted(AbortReason),
}

/// Opens dedicated sessions against the lock server.
pub trait SessionProvider {
    type Session: Session;

    #[allow(async_fn_in_trait)]
    async fn open(&self) -> Result<Self::Session, BackendError>;
}

/// One exclusive connection/session. Dropping it closes the session, which
/// implicitly releases every advisory lock it holds.
pub trait Session: Send + 'static {
    #[allow(async_fn_in_trait)]
    async fn begin(&mut self) -> Result<(), BackendError>;

    #[allow(async_fn_in_trait)]
    async fn savepoint(&mut self, name: &str) -> Result<(), BackendError>;

    /// Restore a failed transaction to its state as of the savepoint.
    #[allow(async_fn_in_trait)]
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), BackendError>;

    /// Discard the savepoint (and any established after it), keeping every
    /// effect since. Valid only in a usable transaction.
    #[allow(async_fn_in_trait)]
    async fn release_savepoint(&mut self, name: &str) -> Result<(), BackendError>;

    /// Request the advisory lock. The server waits up to `timeout` (a
    /// statement timeout); `cancel` aborts the command in flight. `Err` is
    /// reserved for session failures, aborts are a reply.
    #[allow(async_fn_in_trait)]
    async fn request_lock(
        &mut self,
        name: &str,
        timeout: Timeout,
        cancel: &CancelToken,
    ) -> Result<LockReply, BackendError>;

    /// Release the advisory lock previously granted on this session.
    #[allow(async_fn_in_trait)]
    async fn release_lock(&mut self, name: &str) -> Result<(), BackendError>;
}

/// A session plus the ordered stack of savepoints established on it.
///
/// Invariant: a savepoint pushed immediately before an abortable command can
/// always undo that command's abort, restoring the session without
/// reconnecting.
pub struct SessionState<S>
where
    S: Session,
{
    session: S,
    savepoints: Vec<String>,
}

impl<S> SessionState<S>
where
    S: Session,
{
    pub fn new(session: S) -> Self {
        Self {
            session,
            savepoints: Vec::new(),
        }
    }

    pub async fn begin(&mut self) -> Result<(), BackendError> {
        self.session.begin().await
    }

    /// Establish a fresh uniquely-named savepoint and push it on the stack.
    pub async fn push_savepoint(&mut self) -> Result<(), BackendError> {
        let name = format!("exlock_sp_{}", Uuid::new_v4().simple());
        self.session.savepoint(&name).await?;
        self.savepoints.push(name);
        Ok(())
    }

    /// Roll back to the most recent savepoint, restoring a failed
    /// transaction to a usable state. The savepoint itself survives and can
    /// be rolled back to again.
    pub async fn recover(&mut self) -> Result<(), BackendError> {
        let name = self
            .savepoints
            .last()
            .ok_or("no savepoint established before the aborted command")?;
        self.session.rollback_to_savepoint(name).await
    }

    /// Discard the most recent savepoint, keeping everything done since it.
    pub async fn pop_savepoint(&mut self) -> Result<(), BackendError> {
        let name = self.savepoints.pop().ok_or("no savepoint to release")?;
        self.session.release_savepoint(&name).await
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

/// A server-wide advisory lock backed by a [`SessionProvider`].
///
/// Async-only: the session protocol has no blocking wait primitive, so this
/// backend implements [`Provider`] but not `BlockingProvider`.
pub struct SessionLock<P>
where
    P: SessionProvider,
{
    name: LockName,
    provider: P,
}

impl<P> SessionLock<P>
where
    P: SessionProvider,
{
    /// Validate `name` and build a lock object. No session is opened until
    /// an acquisition attempt.
    pub fn new(provider: P, name: &str) -> Result<Self, LockError> {
        Ok(Self {
            name: LockName::validate(name, &SESSION_NAME_RULES)?,
            provider,
        })
    }

    pub fn name(&self) -> &LockName {
        &self.name
    }
}

impl<P> Provider for SessionLock<P>
where
    P: SessionProvider,
{
    type Guard = SessionGuard<P::Session>;

    async fn try_acquire_async(
        &self,
        timeout: Timeout,
        cancel: &CancelToken,
    ) -> Result<Acquisition<Self::Guard>, LockError> {
        // Every early return below drops `state`, closing the session and
        // releasing anything it claimed.
        let session = self.provider.open().await.map_err(LockError::Backend)?;
        let mut state = SessionState::new(session);
        state.begin().await.map_err(LockError::Backend)?;
        state.push_savepoint().await.map_err(LockError::Backend)?;

        let reply = state
            .session_mut()
            .request_lock(self.name.as_str(), timeout, cancel)
            .await
            .map_err(LockError::Backend)?;
        match reply {
            LockReply::Granted => Ok(Acquisition::Acquired(SessionGuard {
                name: self.name.clone(),
                slot: Mutex::new(Some(state)),
            })),
            LockReply::Busy => {
                debug!(name = %self.name, "advisory lock busy");
                Ok(Acquisition::TimedOut)
            }
            LockReply::Aborted(reason) => {
                // Restore the transaction before letting the session go, so
                // a provider that recycles connections gets a usable one.
                state.recover().await.map_err(LockError::Backend)?;
                debug!(name = %self.name, ?reason, "lock request aborted");
                match reason {
                    AbortReason::StatementTimeout => Ok(Acquisition::TimedOut),
                    AbortReason::Canceled => Ok(Acquisition::Canceled),
                }
            }
        }
    }
}

/// Release handle for a held session lock.
///
/// Owns the session for the lock's lifetime. Explicit [`release`]
/// (`SessionGuard::release`) issues the unlock command and closes the
/// session; dropping the guard closes the session, which releases the lock
/// implicitly. Either way the session leaves the slot at most once.
pub struct SessionGuard<S>
where
    S: Session,
{
    name: LockName,
    slot: Mutex<Option<SessionState<S>>>,
}

impl<S> SessionGuard<S>
where
    S: Session,
{
    /// Issue the unlock command and close the session. Calls after the
    /// first are no-ops.
    pub async fn release(&self) -> Result<(), LockError> {
        let taken = self.slot.lock().await.take();
        match taken {
            Some(mut state) => {
                state
                    .session_mut()
                    .release_lock(self.name.as_str())
                    .await
                    .map_err(LockError::Backend)
                // `state` drops here, closing the session.
            }
            None => Ok(()),
        }
    }

    pub async fn is_released(&self) -> bool {
        self.slot.lock().await.is_none()
    }

    /// Run a command against the held session with a savepoint established
    /// immediately before it.
    ///
    /// If the command fails -- typically because it was canceled or hit the
    /// statement timeout -- the transaction is rolled back to that
    /// savepoint before the error is returned, so the session stays usable
    /// and the lock stays held. Either way the savepoint is released
    /// afterwards, so a long-held guard never accumulates savepoints.
    pub async fn with_savepoint<R>(
        &self,
        op: impl AsyncFnOnce(&mut S) -> Result<R, BackendError>,
    ) -> Result<R, LockError> {
        let mut slot = self.slot.lock().await;
        let state = slot
            .as_mut()
            .ok_or_else(|| LockError::backend("session lock already released"))?;
        state.push_savepoint().await.map_err(LockError::Backend)?;
        match op(state.session_mut()).await {
            Ok(value) => {
                state.pop_savepoint().await.map_err(LockError::Backend)?;
                Ok(value)
            }
            Err(error) => {
                state.recover().await.map_err(LockError::Backend)?;
                state.pop_savepoint().await.map_err(LockError::Backend)?;
                Err(LockError::Backend(error))
            }
        }
    }
}

impl<S> Drop for SessionGuard<S>
where
    S: Session,
{
    fn drop(&mut self) {
        // Closing the session is the release; contention here means another
        // release is already in flight.
        if let Ok(mut slot) = self.slot.try_lock() {
            drop(slot.take());
        }
    }
}
