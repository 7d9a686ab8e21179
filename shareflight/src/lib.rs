//! Shareflight - reference-counted sharing of expensive async resources.
//!
//! This library turns N concurrent "open" calls into exactly one underlying
//! creation, hands every caller its own single-use lease on the shared
//! instance, and tears the instance down only after the last lease is
//! released. A keyed variant multiplexes many distinct resources, one per
//! derived key, through a single factory map.
//!
//! # Guarantees
//!
//! - Creation runs exactly once per contiguous interval of use; it strictly
//!   precedes any lease being handed out.
//! - Teardown runs exactly once per interval, strictly after every lease of
//!   the interval is released; a new cycle for the same instance strictly
//!   follows the prior cycle's teardown completing.
//! - Cancellation is per caller: a cancelled waiter detaches with its
//!   accounting intact, and only a sole remaining waiter abandoning an
//!   in-flight creation cancels the creation itself.
//!
//! # Getting started
//!
//! Implement [`ResourceManager`] (or [`KeyedResourceManager`]) for your
//! resource's lifecycle, wrap it in a [`SharedResource`] (or
//! [`SharedResourceMap`]), and acquire leases:
//!
//! ```rust,ignore
//! let share = SharedResource::new(BrokerManager::new(endpoint));
//!
//! let (a, b) = tokio::join!(share.acquire(), share.acquire());
//! let (a, b) = (a?, b?);           // one dial, two leases
//!
//! a.release().await?;              // connection still alive
//! b.release().await?;              // last lease out: connection closed
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod keyed;
pub mod lease;
pub mod manager;
pub mod share;
pub mod types;

pub use errors::{BoxError, ShareError, ShareResult};
pub use keyed::SharedResourceMap;
pub use lease::ResourceLease;
pub use manager::{KeyedResourceManager, ResourceManager};
pub use share::SharedResource;
pub use types::{CloseReason, ResourceKey};
