use super::*;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_shares_one_lock() {
    let locks = Arc::new(SendLocks::new());
    let sender = UserId::from("@alice:example.org");

    let handles = (0..16)
        .map(|_| {
            let locks = locks.clone();
            let sender = sender.clone();
            tokio::spawn(async move { locks.lock_for(&sender).await })
        })
        .collect::<Vec<_>>();

    let mut created = Vec::new();
    for handle in handles {
        created.push(handle.await.expect("join"));
    }

    assert_eq!(locks.len().await, 1);
    assert!(created.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn serializes_work_for_the_same_sender() {
    let locks = Arc::new(SendLocks::new());
    let sender = UserId::from("@alice:example.org");
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));

    let handles = (0..8)
        .map(|_| {
            let locks = locks.clone();
            let sender = sender.clone();
            let active = active.clone();
            let max_active = max_active.clone();
            tokio::spawn(async move {
                locks
                    .with_sender_lock(&sender, || async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.await.expect("join");
    }
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_senders_run_in_parallel() {
    let locks = Arc::new(SendLocks::new());
    let alice = UserId::from("@alice:example.org");
    let bob = UserId::from("@bob:example.org");

    let _alice_guard = locks.acquire(&alice).await;
    let bob_done = tokio::time::timeout(
        Duration::from_secs(1),
        locks.with_sender_lock(&bob, || async { "bob" }),
    )
    .await
    .expect("bob must not wait on alice");
    assert_eq!(bob_done, "bob");
    assert_eq!(locks.len().await, 2);
}

#[tokio::test]
async fn lock_is_released_when_work_fails() {
    let locks = SendLocks::new();
    let sender = UserId::from("@alice:example.org");

    let result: Result<(), &str> = locks
        .with_sender_lock(&sender, || async { Err("send failed") })
        .await;
    assert!(result.is_err());

    let reacquired = tokio::time::timeout(Duration::from_secs(1), locks.acquire(&sender)).await;
    assert!(reacquired.is_ok());
}

#[tokio::test]
async fn lock_is_released_when_work_panics() {
    let locks = Arc::new(SendLocks::new());
    let sender = UserId::from("@alice:example.org");

    let panicking = {
        let locks = locks.clone();
        let sender = sender.clone();
        tokio::spawn(async move {
            locks
                .with_sender_lock(&sender, || async { panic!("boom"); })
                .await
        })
    };
    assert!(panicking.await.is_err());

    let reacquired = tokio::time::timeout(Duration::from_secs(1), locks.acquire(&sender)).await;
    assert!(reacquired.is_ok());
}
