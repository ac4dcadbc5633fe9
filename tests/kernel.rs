// SPDX-License-Identifier: MIT

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use exlock::{CancelToken, ExLock, KernelLock, LockError, MemorySemaphores};
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::sleep;

fn lock(namespace: &MemorySemaphores, name: &str) -> ExLock<KernelLock<MemorySemaphores>> {
    ExLock::builder()
        .provider(KernelLock::new(namespace.clone(), name).expect("valid name"))
        .build()
}

#[test]
fn mutual_exclusion_between_independent_lock_objects() {
    let namespace = MemorySemaphores::new();
    let first = lock(&namespace, "resource");
    let second = lock(&namespace, "resource");

    let guard = first
        .acquire(None, &CancelToken::never())
        .expect("lock should be free");
    assert!(
        second
            .try_acquire(Duration::ZERO, &CancelToken::never())
            .expect("no backend error")
            .is_none()
    );

    guard.release().expect("release should succeed");
    let guard = second
        .acquire(Some(Duration::from_secs(1)), &CancelToken::never())
        .expect("released lock should be acquirable");
    guard.release().expect("release should succeed");
}

#[test]
fn distinct_names_do_not_contend() {
    let namespace = MemorySemaphores::new();
    let first = lock(&namespace, "alpha");
    let second = lock(&namespace, "beta");

    let _alpha = first
        .acquire(None, &CancelToken::never())
        .expect("lock should be free");
    let _beta = second
        .acquire(Some(Duration::ZERO), &CancelToken::never())
        .expect("different name should be free");
}

#[test]
fn invalid_names_are_rejected_at_construction() {
    let namespace = MemorySemaphores::new();
    assert!(matches!(
        KernelLock::new(namespace.clone(), ""),
        Err(LockError::EmptyName)
    ));
    assert!(matches!(
        KernelLock::new(namespace.clone(), "a\\b"),
        Err(LockError::ReservedSeparator { .. })
    ));
    let too_long = "x".repeat(exlock::KERNEL_NAME_RULES.max_name_len() + 1);
    assert!(matches!(
        KernelLock::new(namespace, &too_long),
        Err(LockError::NameTooLong { .. })
    ));
}

#[test]
fn timeout_is_observed_against_a_held_lock() {
    let namespace = MemorySemaphores::new();
    let holder = lock(&namespace, "resource");
    let _guard = holder
        .acquire(None, &CancelToken::never())
        .expect("lock should be free");

    let contender = lock(&namespace, "resource");
    let wait = Duration::from_millis(80);
    let start = Instant::now();
    assert!(matches!(
        contender.acquire(Some(wait), &CancelToken::never()),
        Err(LockError::Timeout)
    ));
    assert!(start.elapsed() >= wait);
}

#[tokio::test]
async fn cancellation_interrupts_an_async_wait() {
    let namespace = MemorySemaphores::new();
    let holder = lock(&namespace, "resource");
    let _guard = holder
        .acquire_async(None, &CancelToken::never())
        .await
        .expect("lock should be free");

    let token = CancelToken::new();
    let canceler = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(30)).await;
        canceler.cancel();
    });

    let start = Instant::now();
    let result = lock(&namespace, "resource")
        .acquire_async(Some(Duration::from_secs(30)), &token)
        .await;
    assert!(matches!(result, Err(LockError::Canceled)));
    assert!(start.elapsed() < Duration::from_secs(30));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_counter_stays_consistent() {
    let namespace = MemorySemaphores::new();
    let value = Arc::new(AtomicUsize::new(0));
    let mut set = JoinSet::new();

    const TASKS: usize = 16;
    for _ in 0..TASKS {
        let namespace = namespace.clone();
        let value = Arc::clone(&value);
        let hold = Duration::from_micros(rand::rng().random_range(0..500));
        set.spawn(async move {
            let lock = lock(&namespace, "counter");
            lock.with_async(None, &CancelToken::never(), async move || {
                let snapshot = value.load(Ordering::SeqCst);
                sleep(hold).await;
                // Nobody else may have advanced the counter while we hold
                // the lock.
                assert_eq!(
                    value.swap(snapshot + 1, Ordering::SeqCst),
                    snapshot,
                    "exclusive access should be guaranteed by the lock"
                );
            })
            .await
            .expect("acquisition should succeed");
        });
    }

    set.join_all().await;
    assert_eq!(value.load(Ordering::SeqCst), TASKS);
}
