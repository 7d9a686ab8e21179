//! The reference-counting core: one shared instance, many concurrent users.
//!
//! [`SharedResource`] multiplexes any number of concurrent acquires onto a
//! single creation call and any number of releases onto a single teardown
//! call, serializing successive create/destroy cycles. The state machine
//! lives behind one mutex; the external create/dispose calls run in spawned
//! drivers and are awaited through `tokio::sync::watch` channels, so no
//! caller ever holds the lock across a suspension point.
//!
//! Cancellation is per caller: a cancelled waiter detaches and rolls its
//! increment back without disturbing the others. Only when the last waiter
//! abandons an in-flight creation is the creation itself cancelled, through
//! the internal token handed to [`ResourceManager::create`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{ShareError, ShareResult};
use crate::lease::ResourceLease;
use crate::manager::ResourceManager;
use crate::types::CloseReason;

/// Outcome of an in-flight creation, broadcast to every waiter.
type CreateOutcome<R> = Result<Arc<R>, ShareError>;

/// Multiplexes concurrent acquires of one underlying resource instance.
///
/// Cloning a `SharedResource` is cheap and yields another handle on the same
/// factory; all clones share one usage count and one instance.
///
/// # Example
///
/// ```rust,ignore
/// let share = SharedResource::new(BrokerManager::new(endpoint));
///
/// // The broker is dialed once; both leases see the same connection.
/// let (a, b) = tokio::join!(share.acquire(), share.acquire());
/// let (a, b) = (a?, b?);
///
/// a.release().await?;   // still alive, b holds a lease
/// b.release().await?;   // last lease out: the connection is shut down
/// ```
pub struct SharedResource<M: ResourceManager> {
    inner: Arc<Inner<M>>,
}

impl<M: ResourceManager> Clone for SharedResource<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ResourceManager> std::fmt::Debug for SharedResource<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedResource")
            .field("usage", &self.usage())
            .finish_non_exhaustive()
    }
}

struct Inner<M: ResourceManager> {
    manager: M,
    state: Mutex<State<M::Resource>>,
}

/// The per-instance state machine. Mutated only under the mutex, inside the
/// acquire/release critical sections.
struct State<R> {
    /// Outstanding leases plus in-flight acquires.
    usage: usize,
    /// Creation-cycle stamp; bumped when a cycle starts and when it dies.
    epoch: u64,
    /// The live instance. Present iff `usage > 0` and creation completed.
    shared: Option<Arc<R>>,
    /// Internal controller for the in-flight creation, present only while
    /// the 0->1 creation call is outstanding.
    create_cancel: Option<CancellationToken>,
    /// Shared completion of the in-flight creation. After a failure this
    /// stays in place, holding the error, until the last waiter's rollback
    /// clears it - an acquire landing in the drain window observes the same
    /// failure instead of starting a doomed cycle.
    create_done: Option<watch::Receiver<Option<CreateOutcome<R>>>>,
    /// Shared completion of the in-flight teardown.
    teardown_done: Option<watch::Receiver<Option<ShareResult<()>>>>,
}

impl<M: ResourceManager> SharedResource<M> {
    /// Creates a factory for one shared instance managed by `manager`.
    ///
    /// Nothing is created until the first acquire.
    pub fn new(manager: M) -> Self {
        Self {
            inner: Arc::new(Inner {
                manager,
                state: Mutex::new(State {
                    usage: 0,
                    epoch: 0,
                    shared: None,
                    create_cancel: None,
                    create_done: None,
                    teardown_done: None,
                }),
            }),
        }
    }

    /// Acquires a lease on the shared instance, creating it if this caller
    /// is the first of a new cycle.
    pub async fn acquire(&self) -> ShareResult<ResourceLease<M::Resource>> {
        self.acquire_with(&CancellationToken::new()).await
    }

    /// Acquires a lease, racing the whole operation against `cancel`.
    ///
    /// Cancellation affects only this call: a detached waiter's increment is
    /// rolled back, while the shared creation keeps running for the other
    /// waiters. If the detaching waiter is the last one, the in-flight
    /// creation itself is cancelled. Timeouts are composed by the caller
    /// cancelling the token after a deadline; there is no built-in timeout.
    pub async fn acquire_with(
        &self,
        cancel: &CancellationToken,
    ) -> ShareResult<ResourceLease<M::Resource>> {
        if cancel.is_cancelled() {
            return Err(ShareError::Aborted);
        }

        let mut rx = loop {
            let mut state = self.inner.state.lock();

            // A teardown from a previous cycle may still be completing. Wait
            // it out without joining the cycle: cancelling here leaves the
            // usage count untouched.
            if let Some(pending) = state.teardown_done.clone() {
                drop(state);
                let mut pending = pending;
                tokio::select! {
                    biased;
                    settled = pending.wait_for(Option::is_some) => {
                        if settled.is_err() {
                            // The driver died without reporting; reset the
                            // marker so the factory does not wedge.
                            self.inner.state.lock().teardown_done = None;
                        }
                        continue;
                    }
                    () = cancel.cancelled() => return Err(ShareError::Aborted),
                }
            }

            state.usage += 1;

            if state.usage == 1 {
                // First caller of a fresh cycle: start the creation driver.
                let token = CancellationToken::new();
                let (tx, rx) = watch::channel(None);
                state.epoch += 1;
                let epoch = state.epoch;
                state.create_cancel = Some(token.clone());
                state.create_done = Some(rx.clone());
                drop(state);
                self.spawn_create(token, tx, epoch);
                break rx;
            }

            if let Some(resource) = state.shared.clone() {
                drop(state);
                return Ok(self.mint(resource));
            }

            // usage > 1 without a live instance: a creation is in flight, or
            // its failure is still draining. Join it either way.
            let rx = state
                .create_done
                .clone()
                .expect("usage > 1 with neither a live resource nor a creation in flight");
            break rx;
        };

        let outcome = tokio::select! {
            biased;
            settled = rx.wait_for(Option::is_some) => match settled {
                Ok(value) => (*value)
                    .clone()
                    .expect("wait_for only returns settled outcomes"),
                Err(_) => Err(ShareError::Internal(
                    "creation driver terminated without reporting".to_string(),
                )),
            },
            () = cancel.cancelled() => Err(ShareError::Aborted),
        };

        match outcome {
            Ok(resource) => {
                if cancel.is_cancelled() {
                    // The creation won the race, but this caller's signal
                    // fired while it ran.
                    drop(resource);
                    self.rollback(ShareError::Aborted).await;
                    return Err(ShareError::Aborted);
                }
                Ok(self.mint(resource))
            }
            Err(err) => {
                self.rollback(err.clone()).await;
                Err(err)
            }
        }
    }

    /// Snapshot of the current usage count: outstanding leases plus
    /// in-flight acquires.
    pub fn usage(&self) -> usize {
        self.inner.state.lock().usage
    }

    /// Wraps `resource` in a lease whose release runs this factory's
    /// decrement/teardown path.
    fn mint(&self, resource: Arc<M::Resource>) -> ResourceLease<M::Resource> {
        let inner = Arc::clone(&self.inner);
        ResourceLease::new(
            resource,
            Box::new(move |reason| Box::pin(async move { Inner::release(&inner, reason).await })),
        )
    }

    /// Undoes this caller's increment after a failed acquire. The triggering
    /// error is what the caller sees; a teardown failure during rollback is
    /// only logged.
    async fn rollback(&self, err: ShareError) {
        if let Err(release_err) = Inner::release(&self.inner, CloseReason::Failed(err)).await {
            warn!(error = %release_err, "teardown during acquire rollback failed");
        }
    }

    /// Runs the external creation call in a background driver so that
    /// detaching waiters cannot tear the call down with them.
    fn spawn_create(
        &self,
        token: CancellationToken,
        tx: watch::Sender<Option<CreateOutcome<M::Resource>>>,
        epoch: u64,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            debug!("creating shared resource");
            let outcome = match inner.manager.create(token).await {
                Ok(resource) => {
                    let resource = Arc::new(resource);
                    let installed = {
                        let mut state = inner.state.lock();
                        if state.epoch == epoch {
                            state.shared = Some(Arc::clone(&resource));
                            state.create_cancel = None;
                            state.create_done = None;
                            true
                        } else {
                            false
                        }
                    };
                    if installed {
                        Ok(resource)
                    } else {
                        // Every waiter left while the creation ran; the
                        // fresh instance is disposed of, never installed.
                        debug!("disposing resource created after all waiters left");
                        if let Err(err) = inner
                            .manager
                            .dispose(&resource, &CloseReason::Abandoned)
                            .await
                        {
                            warn!(error = %err, "failed to dispose abandoned resource");
                        }
                        Err(ShareError::Aborted)
                    }
                }
                Err(err) => {
                    let err = ShareError::Creation(Arc::new(err));
                    let mut state = inner.state.lock();
                    if state.epoch == epoch {
                        // Keep `create_done` holding the failure for
                        // acquires landing while the waiters drain.
                        state.create_cancel = None;
                    }
                    drop(state);
                    Err(err)
                }
            };
            let _ = tx.send(Some(outcome));
        });
    }
}

impl<M: ResourceManager> Inner<M> {
    /// The decrement/teardown path, shared by lease releases and acquire
    /// rollbacks. The usage count always nets back correctly: every
    /// increment is paired with exactly one pass through here.
    async fn release(inner: &Arc<Self>, reason: CloseReason) -> ShareResult<()> {
        let pending = {
            let mut state = inner.state.lock();
            debug_assert!(state.usage > 0, "release without a matching acquire");
            state.usage -= 1;
            if state.usage > 0 {
                return Ok(());
            }

            // Last holder out: the cycle is over.
            state.epoch += 1;
            if let Some(token) = state.create_cancel.take() {
                // The final opener is abandoning a creation still in
                // flight. Cancelling the internal token unblocks the
                // external call; the driver converges through the stale
                // epoch check.
                token.cancel();
            }
            state.create_done = None;

            state.shared.take().map(|resource| {
                let (tx, rx) = watch::channel(None);
                state.teardown_done = Some(rx.clone());
                (resource, tx, rx)
            })
        };

        let Some((resource, tx, mut rx)) = pending else {
            return Ok(());
        };

        let driver = Arc::clone(inner);
        tokio::spawn(async move {
            debug!(reason = %reason, "disposing shared resource");
            let outcome = driver
                .manager
                .dispose(&resource, &reason)
                .await
                .map_err(ShareError::disposal);
            // Reset before broadcasting, so an opener woken by the
            // broadcast observes a factory ready for a new cycle.
            driver.state.lock().teardown_done = None;
            let _ = tx.send(Some(outcome));
        });

        let result = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value)
                .clone()
                .expect("wait_for only returns settled outcomes"),
            Err(_) => Err(ShareError::Internal(
                "teardown driver terminated without reporting".to_string(),
            )),
        };
        result
    }
}
