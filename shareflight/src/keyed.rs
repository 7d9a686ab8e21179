//! Keyed multiplexing: many distinct shared resources through one map.
//!
//! [`SharedResourceMap`] derives a [`ResourceKey`] from each acquire's
//! arguments and forwards the call to a per-key [`SharedResource`],
//! constructing one on first sight of a key and evicting the entry once its
//! instance starts tearing down or fails to create. The registry is an
//! explicit per-map field guarded by the same mutual-exclusion discipline as
//! the per-key counters - never a process-wide singleton.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{BoxError, ShareError, ShareResult};
use crate::lease::ResourceLease;
use crate::manager::{KeyedResourceManager, ResourceManager};
use crate::share::SharedResource;
use crate::types::{CloseReason, ResourceKey};

/// Multiplexes many distinct resources, one per derived key, through a
/// single factory map.
///
/// Acquires with the same key share one underlying instance; acquires with
/// different keys are fully independent. Cloning the map is cheap and yields
/// another handle on the same registry.
///
/// # Example
///
/// ```rust,ignore
/// let map = SharedResourceMap::new(SessionManager::new(config));
///
/// // One session per DSN, however many concurrent callers there are.
/// let primary = map.acquire(dsn_primary.clone()).await?;
/// let replica = map.acquire(dsn_replica.clone()).await?;
/// ```
pub struct SharedResourceMap<M: KeyedResourceManager> {
    manager: Arc<M>,
    registry: Arc<Mutex<RegistryState<M>>>,
}

impl<M: KeyedResourceManager> Clone for SharedResourceMap<M> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<M: KeyedResourceManager> std::fmt::Debug for SharedResourceMap<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedResourceMap")
            .field("keys", &self.len())
            .finish_non_exhaustive()
    }
}

struct RegistryState<M: KeyedResourceManager> {
    /// Source of per-factory identities, so eviction can verify it is
    /// removing the factory that requested it rather than a successor
    /// registered under the same key.
    next_id: u64,
    entries: HashMap<ResourceKey, RegistryEntry<M>>,
}

struct RegistryEntry<M: KeyedResourceManager> {
    id: u64,
    share: SharedResource<BoundManager<M>>,
}

impl<M: KeyedResourceManager> SharedResourceMap<M> {
    /// Creates an empty map over `manager`.
    pub fn new(manager: M) -> Self {
        Self {
            manager: Arc::new(manager),
            registry: Arc::new(Mutex::new(RegistryState {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }

    /// Acquires a lease on the instance identified by `args`' derived key,
    /// creating both the per-key factory and the instance as needed.
    pub async fn acquire(&self, args: M::Args) -> ShareResult<ResourceLease<M::Resource>> {
        self.acquire_with(args, &CancellationToken::new()).await
    }

    /// Acquires a lease, racing the whole operation against `cancel`.
    ///
    /// The same per-call semantics as
    /// [`SharedResource::acquire_with`]: cancellation detaches only this
    /// caller.
    pub async fn acquire_with(
        &self,
        args: M::Args,
        cancel: &CancellationToken,
    ) -> ShareResult<ResourceLease<M::Resource>> {
        if cancel.is_cancelled() {
            return Err(ShareError::Aborted);
        }

        let key = self.manager.key(&args);
        let share = {
            let mut registry = self.registry.lock();
            if let Some(entry) = registry.entries.get(&key) {
                entry.share.clone()
            } else {
                registry.next_id += 1;
                let id = registry.next_id;
                debug!(key = %key, "registering shared resource factory");
                let share = SharedResource::new(BoundManager {
                    manager: Arc::clone(&self.manager),
                    args,
                    key: key.clone(),
                    id,
                    registry: Arc::downgrade(&self.registry),
                });
                registry.entries.insert(
                    key.clone(),
                    RegistryEntry {
                        id,
                        share: share.clone(),
                    },
                );
                share
            }
        };

        share.acquire_with(cancel).await
    }

    /// Whether a factory is currently registered under `key`.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.registry.lock().entries.contains_key(key)
    }

    /// Number of keys with a registered factory.
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Whether no factory is currently registered.
    pub fn is_empty(&self) -> bool {
        self.registry.lock().entries.is_empty()
    }
}

/// Adapter binding a set of call arguments (and a registry slot) onto the
/// single-instance lifecycle.
struct BoundManager<M: KeyedResourceManager> {
    manager: Arc<M>,
    args: M::Args,
    key: ResourceKey,
    id: u64,
    registry: Weak<Mutex<RegistryState<M>>>,
}

impl<M: KeyedResourceManager> BoundManager<M> {
    /// Removes this factory's registry entry, if it still owns it.
    fn evict(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock();
            if registry
                .entries
                .get(&self.key)
                .is_some_and(|entry| entry.id == self.id)
            {
                debug!(key = %self.key, "evicting shared resource factory");
                registry.entries.remove(&self.key);
            }
        }
    }
}

#[async_trait]
impl<M: KeyedResourceManager> ResourceManager for BoundManager<M> {
    type Resource = M::Resource;

    async fn create(&self, cancel: CancellationToken) -> Result<Self::Resource, BoxError> {
        match self.manager.create(self.args.clone(), cancel).await {
            Ok(resource) => Ok(resource),
            Err(err) => {
                // A failed entry must not linger: the next acquire with this
                // key retries creation from scratch.
                self.evict();
                Err(err)
            }
        }
    }

    async fn dispose(
        &self,
        resource: &Self::Resource,
        reason: &CloseReason,
    ) -> Result<(), BoxError> {
        // Evict before the real teardown: once this instance is going away,
        // a new caller under the same key must start a fresh one.
        self.evict();
        self.manager.dispose(resource, reason).await
    }
}
