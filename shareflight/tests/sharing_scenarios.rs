//! End-to-end sharing scenarios for the single-instance factory.
//!
//! These tests exercise the reference-counting core: concurrent acquires
//! deduplicating onto one creation, teardown waiting for the last lease,
//! serialization of successive create/destroy cycles, and recovery after a
//! failed creation.

#![allow(clippy::similar_names)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shareflight::{BoxError, CloseReason, ResourceManager, ShareError, SharedResource};
use tokio_util::sync::CancellationToken;

/// A manager with configurable create/dispose latency and call counters.
struct SlowManager {
    create_delay: Duration,
    dispose_delay: Duration,
    creates: AtomicUsize,
    disposes: AtomicUsize,
    fail_creation: bool,
}

impl SlowManager {
    fn new(create_delay: Duration, dispose_delay: Duration) -> Self {
        Self {
            create_delay,
            dispose_delay,
            creates: AtomicUsize::new(0),
            disposes: AtomicUsize::new(0),
            fail_creation: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail_creation: true,
            ..Self::new(Duration::ZERO, Duration::ZERO)
        }
    }
}

#[async_trait]
impl ResourceManager for SlowManager {
    type Resource = &'static str;

    async fn create(&self, _cancel: CancellationToken) -> Result<&'static str, BoxError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.create_delay).await;
        if self.fail_creation {
            return Err("boom".into());
        }
        Ok("R")
    }

    async fn dispose(
        &self,
        _resource: &&'static str,
        _reason: &CloseReason,
    ) -> Result<(), BoxError> {
        tokio::time::sleep(self.dispose_delay).await;
        self.disposes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Delegating wrapper so tests can keep an outside handle on the counters
/// while the factory owns the manager.
struct SharedCounting(Arc<SlowManager>);

#[async_trait]
impl ResourceManager for SharedCounting {
    type Resource = &'static str;

    async fn create(&self, cancel: CancellationToken) -> Result<&'static str, BoxError> {
        self.0.create(cancel).await
    }

    async fn dispose(
        &self,
        resource: &&'static str,
        reason: &CloseReason,
    ) -> Result<(), BoxError> {
        self.0.dispose(resource, reason).await
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_acquires_share_one_creation() {
    let manager = Arc::new(SlowManager::new(Duration::from_millis(10), Duration::ZERO));
    let share = SharedResource::new(SharedCounting(Arc::clone(&manager)));

    let (a, b) = tokio::join!(share.acquire(), share.acquire());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(*a.resource(), "R");
    assert_eq!(*b.resource(), "R");
    assert_eq!(manager.creates.load(Ordering::SeqCst), 1);

    a.release().await.unwrap();
    b.release().await.unwrap();
}

#[tokio::test]
async fn teardown_waits_for_the_last_lease() {
    let manager = Arc::new(SlowManager::new(Duration::ZERO, Duration::ZERO));
    let share = SharedResource::new(SharedCounting(Arc::clone(&manager)));

    let a = share.acquire().await.unwrap();
    let b = share.acquire().await.unwrap();

    a.release().await.unwrap();
    assert_eq!(
        manager.disposes.load(Ordering::SeqCst),
        0,
        "resource must stay alive while b holds a lease"
    );

    b.release().await.unwrap();
    assert_eq!(manager.disposes.load(Ordering::SeqCst), 1);
    assert_eq!(manager.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn acquire_during_teardown_waits_and_starts_a_fresh_cycle() {
    let manager = Arc::new(SlowManager::new(
        Duration::ZERO,
        Duration::from_millis(50),
    ));
    let share = SharedResource::new(SharedCounting(Arc::clone(&manager)));

    let a = share.acquire().await.unwrap();
    let closer = tokio::spawn(async move { a.release().await });

    // Let the teardown begin, then come knocking mid-teardown.
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = share.acquire().await.unwrap();

    // The new cycle only started once the old teardown had fully completed.
    assert_eq!(manager.disposes.load(Ordering::SeqCst), 1);
    assert_eq!(manager.creates.load(Ordering::SeqCst), 2);

    closer.await.unwrap().unwrap();
    b.release().await.unwrap();
    assert_eq!(manager.disposes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_release_of_a_lease_fails() {
    let manager = Arc::new(SlowManager::new(Duration::ZERO, Duration::ZERO));
    let share = SharedResource::new(SharedCounting(Arc::clone(&manager)));

    let lease = share.acquire().await.unwrap();
    lease.release().await.unwrap();

    assert!(matches!(
        lease.release().await,
        Err(ShareError::AlreadyReleased)
    ));
    assert_eq!(
        manager.disposes.load(Ordering::SeqCst),
        1,
        "the failed second release must not reach the manager"
    );
}

#[tokio::test]
async fn failed_creation_is_retried_by_the_next_acquire() {
    let manager = Arc::new(SlowManager::failing());
    let share = SharedResource::new(SharedCounting(Arc::clone(&manager)));

    let err = share.acquire().await.unwrap_err();
    assert!(matches!(err, ShareError::Creation(_)));
    assert!(err.to_string().contains("boom"));
    assert_eq!(share.usage(), 0, "the failed acquire must roll back fully");

    // A fresh acquire starts a brand-new creation attempt.
    let err = share.acquire().await.unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert_eq!(manager.creates.load(Ordering::SeqCst), 2);
    assert_eq!(
        manager.disposes.load(Ordering::SeqCst),
        0,
        "nothing was created, so nothing must be disposed"
    );
}

#[tokio::test(start_paused = true)]
async fn every_waiter_of_a_failed_creation_observes_the_error() {
    let manager = Arc::new(SlowManager {
        fail_creation: true,
        ..SlowManager::new(Duration::from_millis(10), Duration::ZERO)
    });
    let share = SharedResource::new(SharedCounting(Arc::clone(&manager)));

    let (a, b, c) = tokio::join!(share.acquire(), share.acquire(), share.acquire());

    for result in [a, b, c] {
        let err = result.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
    assert_eq!(manager.creates.load(Ordering::SeqCst), 1);
    assert_eq!(share.usage(), 0);
}

#[tokio::test]
async fn cycles_are_fully_independent() {
    let manager = Arc::new(SlowManager::new(Duration::ZERO, Duration::ZERO));
    let share = SharedResource::new(SharedCounting(Arc::clone(&manager)));

    for expected_cycle in 1_usize..=3 {
        let lease = share.acquire().await.unwrap();
        assert_eq!(manager.creates.load(Ordering::SeqCst), expected_cycle);
        lease.release().await.unwrap();
        assert_eq!(manager.disposes.load(Ordering::SeqCst), expected_cycle);
    }
}
