// SPDX-License-Identifier: MIT

//! Cooperative cancellation signal.
//!
//! A [`CancelToken`] is handed to an acquisition attempt and observed at the
//! wait point. Backends consume it three ways: polling [`is_canceled`]
//! (`CancelToken::is_canceled`) inside a blocking multi-wait, registering a
//! one-shot callback with [`on_cancel`](CancelToken::on_cancel) to poke a
//! blocked waiter, and awaiting [`cancelled`](CancelToken::cancelled) from
//! async code.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use tokio::sync::Notify;

type Callback = Box<dyn FnOnce() + Send>;

struct State {
    canceled: bool,
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
    // Thread currently invoking the drained callback batch, if any.
    invoker: Option<ThreadId>,
}

struct Inner {
    cancellable: bool,
    state: Mutex<State>,
    // Signals that the callback batch has finished running.
    done: Condvar,
    notify: Notify,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A clonable cancellation signal; all clones observe the same state.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::with_cancellable(true)
    }

    /// A token that can never fire. Backends skip their cancellation
    /// machinery entirely for such a token.
    pub fn never() -> Self {
        Self::with_cancellable(false)
    }

    fn with_cancellable(cancellable: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancellable,
                state: Mutex::new(State {
                    canceled: false,
                    next_id: 0,
                    callbacks: Vec::new(),
                    invoker: None,
                }),
                done: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    pub fn can_cancel(&self) -> bool {
        self.inner.cancellable
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.cancellable && lock(&self.inner.state).canceled
    }

    /// Fire the signal. Idempotent; a no-op on a [`never`](Self::never)
    /// token. Pending callbacks run on the calling thread, exactly once.
    pub fn cancel(&self) {
        if !self.inner.cancellable {
            return;
        }
        let fired = {
            let mut state = lock(&self.inner.state);
            if state.canceled {
                return;
            }
            state.canceled = true;
            state.invoker = Some(std::thread::current().id());
            std::mem::take(&mut state.callbacks)
        };
        for (_, callback) in fired {
            callback();
        }
        lock(&self.inner.state).invoker = None;
        self.inner.done.notify_all();
        self.inner.notify.notify_waiters();
    }

    /// Register a one-shot callback that runs when the token fires.
    ///
    /// If the token is already canceled the callback runs immediately on the
    /// calling thread. Dropping the returned registration deregisters the
    /// callback; once `deregister` (or drop) returns, the callback either
    /// already ran or never will. A drop that races an in-flight `cancel`
    /// therefore blocks until that invocation has finished, except when it
    /// happens on the canceling thread itself (a callback dropping
    /// registrations for its own token must not deadlock).
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static) -> CancelRegistration {
        if !self.inner.cancellable {
            return CancelRegistration { token: None, id: 0 };
        }
        let id = {
            let mut state = lock(&self.inner.state);
            if state.canceled {
                drop(state);
                callback();
                return CancelRegistration { token: None, id: 0 };
            }
            let id = state.next_id;
            state.next_id += 1;
            state.callbacks.push((id, Box::new(callback)));
            id
        };
        CancelRegistration {
            token: Some(Arc::clone(&self.inner)),
            id,
        }
    }

    /// Resolves when the token fires; pends forever on a
    /// [`never`](Self::never) token.
    pub async fn cancelled(&self) {
        if !self.inner.cancellable {
            std::future::pending::<()>().await;
        }
        loop {
            // Register interest before checking, so a cancel between the
            // check and the await still wakes us.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if lock(&self.inner.state).canceled {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancellable", &self.inner.cancellable)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Handle to a pending [`CancelToken::on_cancel`] callback.
#[must_use = "dropping the registration deregisters the callback"]
pub struct CancelRegistration {
    token: Option<Arc<Inner>>,
    id: u64,
}

impl CancelRegistration {
    /// Explicitly deregister the callback.
    pub fn deregister(self) {}
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some(inner) = self.token.take() {
            let mut state = lock(&inner.state);
            state.callbacks.retain(|(id, _)| *id != self.id);
            // A cancel in flight on another thread has already drained the
            // list and may be running this callback right now; wait until
            // its batch finishes. The invoking thread itself skips the wait.
            while state
                .invoker
                .is_some_and(|invoker| invoker != std::thread::current().id())
            {
                state = inner
                    .done
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}
