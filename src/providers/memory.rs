// SPDX-License-Identifier: MIT

//! In-process named semaphore namespace.
//!
//! Stands in for the machine-wide kernel object namespace: every clone of a
//! [`MemorySemaphores`] addresses the same set of named binary semaphores, so
//! independent components of one process contend exactly like independent
//! processes would against the real thing. Scope is the process, not the
//! machine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::error::BackendError;
use crate::name::LockName;
use crate::providers::kernel::{
    CreationAccess, SemaphoreHandle, SemaphoreProvider, WaitCallback, WaitRegistration, WaitVerdict,
};
use crate::timeout::Timeout;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct SemState {
    available: bool,
    access: CreationAccess,
}

#[derive(Debug)]
struct Semaphore {
    state: Mutex<SemState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct Registry {
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// A process-scoped [`SemaphoreProvider`].
#[derive(Debug, Clone, Default)]
pub struct MemorySemaphores {
    registry: Arc<Registry>,
}

impl MemorySemaphores {
    /// A fresh, empty namespace.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SemaphoreProvider for MemorySemaphores {
    type Handle = MemoryHandle;

    fn create_or_open(
        &self,
        name: &LockName,
        access: CreationAccess,
    ) -> Result<Self::Handle, BackendError> {
        let mut semaphores = lock(&self.registry.semaphores);
        let semaphore = semaphores
            .entry(name.as_str().to_owned())
            .or_insert_with(|| {
                // Access is fixed here, by whoever creates the object first;
                // later openers' choices are ignored.
                Arc::new(Semaphore {
                    state: Mutex::new(SemState {
                        available: true,
                        access,
                    }),
                    cond: Condvar::new(),
                })
            });
        Ok(MemoryHandle {
            semaphore: Arc::clone(semaphore),
        })
    }
}

/// A live reference to one named in-process semaphore.
#[derive(Debug)]
pub struct MemoryHandle {
    semaphore: Arc<Semaphore>,
}

impl MemoryHandle {
    /// The access recorded when the object was created.
    pub fn creation_access(&self) -> CreationAccess {
        lock(&self.semaphore.state).access
    }
}

impl SemaphoreHandle for MemoryHandle {
    fn wait(&self, timeout: Timeout) -> Result<bool, BackendError> {
        let deadline = timeout.deadline();
        let mut state = lock(&self.semaphore.state);
        loop {
            if state.available {
                state.available = false;
                return Ok(true);
            }
            state = match deadline {
                None => self
                    .semaphore
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    self.semaphore
                        .cond
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn wait_any(&self, timeout: Timeout, cancel: &CancelToken) -> Result<WaitVerdict, BackendError> {
        // Poke our condvar when the token fires so a blocked waiter wakes.
        let waker = Arc::clone(&self.semaphore);
        let _registration = cancel.on_cancel(move || {
            let _state = lock(&waker.state);
            waker.cond.notify_all();
        });

        let deadline = timeout.deadline();
        let mut state = lock(&self.semaphore.state);
        loop {
            // Availability is checked before cancellation on every wakeup:
            // the semaphore wins ties.
            if state.available {
                state.available = false;
                return Ok(WaitVerdict::Signaled);
            }
            if cancel.is_canceled() {
                return Ok(WaitVerdict::Canceled);
            }
            state = match deadline {
                None => self
                    .semaphore
                    .cond
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(WaitVerdict::TimedOut);
                    }
                    self.semaphore
                        .cond
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn register_wait(&self, timeout: Timeout, done: WaitCallback) -> WaitRegistration {
        let semaphore = Arc::clone(&self.semaphore);
        let deregistered = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&deregistered);
        let deadline = timeout.deadline();

        std::thread::spawn(move || {
            let mut state = lock(&semaphore.state);
            let mut done = Some(done);
            loop {
                if flag.load(Ordering::SeqCst) {
                    return;
                }
                if state.available {
                    state.available = false;
                    // Fires while the state lock is held, so deregistration
                    // can never observe a claimed-but-unreported wait.
                    if let Some(callback) = done.take() {
                        callback(true);
                    }
                    return;
                }
                state = match deadline {
                    None => semaphore
                        .cond
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner),
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            if let Some(callback) = done.take() {
                                callback(false);
                            }
                            return;
                        }
                        semaphore
                            .cond
                            .wait_timeout(state, remaining)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                };
            }
        });

        let semaphore = Arc::clone(&self.semaphore);
        WaitRegistration::new(move || {
            let _state = lock(&semaphore.state);
            deregistered.store(true, Ordering::SeqCst);
            semaphore.cond.notify_all();
        })
    }

    fn signal(&self) -> Result<(), BackendError> {
        let mut state = lock(&self.semaphore.state);
        if state.available {
            return Err("semaphore signaled while already available".into());
        }
        state.available = true;
        // No fairness promised; whichever waiter wins the wakeup claims it.
        self.semaphore.cond.notify_all();
        Ok(())
    }
}
