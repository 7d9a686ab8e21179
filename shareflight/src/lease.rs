//! Per-caller leases on a shared resource.
//!
//! A [`ResourceLease`] is the unit every successful acquire returns: a
//! reference to the shared resource plus that caller's single release
//! operation. Leases are single-use - the release slot is taken on the
//! first release, and a second release fails with
//! [`ShareError::AlreadyReleased`].

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::errors::{ShareError, ShareResult};
use crate::types::CloseReason;

/// The type-erased release operation bound into a lease at mint time.
pub(crate) type ReleaseFn =
    Box<dyn FnOnce(CloseReason) -> BoxFuture<'static, ShareResult<()>> + Send>;

/// A single caller's handle on a shared resource.
///
/// The resource reference stays valid for the lease's whole life. Releasing
/// the lease gives up this caller's share of the underlying instance; the
/// instance itself is torn down only when the last lease of the cycle is
/// released.
///
/// Dropping a lease without releasing it is a usage bug, but it must not
/// strand the shared refcount: the drop glue logs a warning and performs the
/// release in the background on the current runtime.
pub struct ResourceLease<R> {
    resource: Arc<R>,
    slot: Mutex<Option<ReleaseFn>>,
}

impl<R> ResourceLease<R> {
    pub(crate) fn new(resource: Arc<R>, release: ReleaseFn) -> Self {
        Self {
            resource,
            slot: Mutex::new(Some(release)),
        }
    }

    /// The shared resource value.
    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Releases this lease's share of the underlying resource.
    ///
    /// Fails with [`ShareError::AlreadyReleased`] if the lease was already
    /// released. If this was the last outstanding lease, the underlying
    /// teardown runs and its outcome is returned.
    pub async fn release(&self) -> ShareResult<()> {
        self.release_with(CloseReason::Finished).await
    }

    /// Releases with an explicit reason.
    ///
    /// The reason reaches the external
    /// [`dispose`](crate::ResourceManager::dispose) call only if this
    /// release empties the factory.
    pub async fn release_with(&self, reason: CloseReason) -> ShareResult<()> {
        let release = self
            .slot
            .lock()
            .take()
            .ok_or(ShareError::AlreadyReleased)?;
        release(reason).await
    }

    /// Converts this lease into one whose release is deferred by `delay`.
    ///
    /// Releasing the returned lease schedules the real release to run after
    /// `delay` and returns immediately; a failure of the deferred release is
    /// reported through `tracing` since no caller is left waiting for it.
    /// Useful for keeping a resource alive briefly after last use in case of
    /// imminent reuse, without making every caller pay for the grace period.
    ///
    /// A zero `delay` returns a lease that behaves as the original.
    pub fn with_linger(self, delay: Duration) -> Self {
        if delay.is_zero() {
            return self;
        }

        let resource = Arc::clone(&self.resource);
        let Some(release) = self.slot.lock().take() else {
            // Already released: the lingering lease mirrors that state.
            return Self {
                resource,
                slot: Mutex::new(None),
            };
        };

        let deferred: ReleaseFn = Box::new(move |reason| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = release(reason).await {
                    tracing::error!(error = %err, "deferred release failed");
                }
            });
            Box::pin(futures::future::ready(Ok(())))
        });

        Self {
            resource,
            slot: Mutex::new(Some(deferred)),
        }
    }

    fn is_released(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<R> Deref for ResourceLease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R> fmt::Debug for ResourceLease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLease")
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl<R> Drop for ResourceLease<R> {
    fn drop(&mut self) {
        let Some(release) = self.slot.get_mut().take() else {
            return;
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tracing::warn!("resource lease dropped without release; releasing in the background");
            handle.spawn(async move {
                if let Err(err) = release(CloseReason::Finished).await {
                    tracing::error!(error = %err, "background release of dropped lease failed");
                }
            });
        } else {
            tracing::error!("resource lease dropped outside a runtime; resource may leak");
        }
    }
}
