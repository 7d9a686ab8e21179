//! Lifecycle seams for the resources being shared.
//!
//! Callers plug their concrete resource logic in through these traits: how
//! to create an instance, how to dispose of it, and (for the keyed variant)
//! how to derive the cache key from call arguments. The engine never touches
//! the resource itself; it only coordinates when these calls run.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::BoxError;
use crate::types::{CloseReason, ResourceKey};

/// Lifecycle of a single shared resource instance.
///
/// [`SharedResource`](crate::SharedResource) guarantees that for each
/// contiguous interval of use, `create` runs exactly once before any lease
/// is handed out and `dispose` runs exactly once after the last lease is
/// released.
///
/// The `cancel` token handed to `create` is the engine's internal controller
/// for that creation: it fires when every waiter has abandoned the call.
/// Implementations should honor it promptly, but a create that ignores it
/// and succeeds anyway is tolerated - the stray instance is disposed of
/// immediately instead of installed.
///
/// # Example
///
/// ```rust,ignore
/// struct BrokerManager { endpoint: String }
///
/// #[async_trait]
/// impl ResourceManager for BrokerManager {
///     type Resource = BrokerConnection;
///
///     async fn create(&self, cancel: CancellationToken) -> Result<Self::Resource, BoxError> {
///         tokio::select! {
///             conn = BrokerConnection::dial(&self.endpoint) => Ok(conn?),
///             () = cancel.cancelled() => Err("dial abandoned".into()),
///         }
///     }
///
///     async fn dispose(&self, conn: &Self::Resource, _reason: &CloseReason) -> Result<(), BoxError> {
///         conn.shutdown().await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    /// The caller-visible resource value.
    type Resource: Send + Sync + 'static;

    /// Creates the underlying instance.
    async fn create(&self, cancel: CancellationToken) -> Result<Self::Resource, BoxError>;

    /// Tears the underlying instance down.
    ///
    /// `reason` says why the instance is going away; the reason supplied by
    /// the final release of the cycle is passed through verbatim.
    async fn dispose(
        &self,
        resource: &Self::Resource,
        reason: &CloseReason,
    ) -> Result<(), BoxError>;
}

#[async_trait]
impl<M: ResourceManager + ?Sized> ResourceManager for Arc<M> {
    type Resource = M::Resource;

    async fn create(&self, cancel: CancellationToken) -> Result<Self::Resource, BoxError> {
        (**self).create(cancel).await
    }

    async fn dispose(
        &self,
        resource: &Self::Resource,
        reason: &CloseReason,
    ) -> Result<(), BoxError> {
        (**self).dispose(resource, reason).await
    }
}

/// Lifecycle of a family of shared resources selected by call arguments.
///
/// [`SharedResourceMap`](crate::SharedResourceMap) derives a [`ResourceKey`]
/// from the arguments of each acquire and multiplexes every call with the
/// same key onto one underlying instance.
///
/// `key` must be pure and deterministic; distinguishable resources mapping
/// to the same key is a bug in the implementation, not something the engine
/// detects.
#[async_trait]
pub trait KeyedResourceManager: Send + Sync + 'static {
    /// Arguments a caller passes to each acquire.
    type Args: Clone + Send + Sync + 'static;

    /// The caller-visible resource value.
    type Resource: Send + Sync + 'static;

    /// Derives the cache key for a set of arguments.
    fn key(&self, args: &Self::Args) -> ResourceKey;

    /// Creates the underlying instance for `args`.
    async fn create(
        &self,
        args: Self::Args,
        cancel: CancellationToken,
    ) -> Result<Self::Resource, BoxError>;

    /// Tears the underlying instance down.
    async fn dispose(
        &self,
        resource: &Self::Resource,
        reason: &CloseReason,
    ) -> Result<(), BoxError>;
}

#[async_trait]
impl<M: KeyedResourceManager + ?Sized> KeyedResourceManager for Arc<M> {
    type Args = M::Args;
    type Resource = M::Resource;

    fn key(&self, args: &Self::Args) -> ResourceKey {
        (**self).key(args)
    }

    async fn create(
        &self,
        args: Self::Args,
        cancel: CancellationToken,
    ) -> Result<Self::Resource, BoxError> {
        (**self).create(args, cancel).await
    }

    async fn dispose(
        &self,
        resource: &Self::Resource,
        reason: &CloseReason,
    ) -> Result<(), BoxError> {
        (**self).dispose(resource, reason).await
    }
}
