// SPDX-License-Identifier: MIT

//! Bridges a blocking-capable wait primitive into an awaitable completion.
//!
//! The suspension point has exactly one resolution source among {semaphore
//! claimed, timeout elapsed, cancellation fired}. A single-assignment
//! completion cell (a oneshot channel) carries the wait verdict; the losing
//! watcher is deregistered before the result is observed, so a dangling
//! callback can never fire against a handle the caller has already disposed.

use tokio::sync::oneshot;
use tracing::trace;

use crate::cancel::CancelToken;
use crate::error::LockError;
use crate::providers::kernel::{SemaphoreHandle, WaitVerdict};
use crate::timeout::Timeout;

/// Await the semaphore without blocking a worker thread for the duration.
///
/// Cancellation is observed while suspended; if the wait physically completed
/// before the registration could be torn down, acquisition takes precedence
/// over cancellation.
pub(crate) async fn await_claim<H>(
    handle: &H,
    timeout: Timeout,
    cancel: &CancelToken,
) -> Result<WaitVerdict, LockError>
where
    H: SemaphoreHandle,
{
    let (sender, mut receiver) = oneshot::channel();
    let registration = handle.register_wait(
        timeout,
        Box::new(move |claimed| {
            // The receiver may be gone when cancellation won; the claim is
            // then undone by the registration teardown having never happened
            // -- a callback that ran is always observed via try_recv below.
            let _ = sender.send(claimed);
        }),
    );

    tokio::select! {
        completed = &mut receiver => {
            registration.deregister();
            match completed {
                Ok(true) => Ok(WaitVerdict::Signaled),
                Ok(false) => Ok(WaitVerdict::TimedOut),
                // The provider dropped the registration without completing
                // the wait; nothing was claimed.
                Err(_) => Err(LockError::backend("wait registration abandoned")),
            }
        }
        _ = cancel.cancelled() => {
            // Tear the wait down first: after deregister returns, the
            // callback either already ran or never will.
            registration.deregister();
            match receiver.try_recv() {
                Ok(true) => {
                    trace!("wait completed in the same instant as cancellation; acquisition wins");
                    Ok(WaitVerdict::Signaled)
                }
                _ => Ok(WaitVerdict::Canceled),
            }
        }
    }
}
