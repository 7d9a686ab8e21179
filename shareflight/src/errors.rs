//! Error types for Shareflight.
//!
//! This module provides the error types for all failure scenarios in the
//! resource-sharing engine. The error design follows these principles:
//!
//! - **Cloneable**: a single creation failure must fan out to every waiter
//!   that joined the in-flight creation, so errors are cheap to clone
//!   (external failures are held behind an `Arc`).
//! - **Transparent**: whatever the external create/dispose call raised is
//!   carried verbatim and surfaced to the caller that triggered or awaited
//!   that call.
//! - **Actionable**: callers can distinguish their own cancellation from a
//!   real lifecycle failure and decide whether to retry on the next acquire.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use shareflight::{ShareError, ShareResult};
//!
//! async fn fetch(share: &SharedResource<ConnManager>) -> ShareResult<Bytes> {
//!     let lease = match share.acquire().await {
//!         Ok(lease) => lease,
//!         Err(ShareError::Aborted) => return Err(ShareError::Aborted),
//!         Err(err) => {
//!             // Creation failed; the next acquire will retry from scratch.
//!             return Err(err);
//!         }
//!     };
//!     // ... use the lease
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// The error type external lifecycle calls may return.
///
/// `create` and `dispose` implementations report failures as any boxed
/// error; the engine wraps them without inspecting them.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by acquire and release operations.
///
/// # Error Handling Strategy
///
/// - **Aborted**: the caller's own cancellation token fired; shared state is
///   untouched and other waiters are unaffected.
/// - **AlreadyReleased**: a lease was released twice - a usage bug in the
///   caller.
/// - **Creation**: the external creation call failed; every waiter of that
///   creation observes the same error, and the next acquire retries from
///   scratch.
/// - **Disposal**: the external teardown call failed; surfaced to the
///   releaser that triggered it, but the factory still resets.
/// - **Internal**: a lifecycle driver terminated without reporting - log
///   and investigate, this indicates a bug such as a panicking `create`.
#[derive(Debug, Clone, Error)]
pub enum ShareError {
    /// A cancellation signal fired before or during the operation.
    #[error("operation aborted by cancellation signal")]
    Aborted,

    /// The lease was already released by an earlier call.
    #[error("lease already released")]
    AlreadyReleased,

    /// The external creation call failed.
    #[error("resource creation failed: {0}")]
    Creation(Arc<BoxError>),

    /// The external teardown call failed.
    #[error("resource disposal failed: {0}")]
    Disposal(Arc<BoxError>),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ShareError {
    /// Wraps an external creation failure.
    pub fn creation(err: impl Into<BoxError>) -> Self {
        Self::Creation(Arc::new(err.into()))
    }

    /// Wraps an external teardown failure.
    pub fn disposal(err: impl Into<BoxError>) -> Self {
        Self::Disposal(Arc::new(err.into()))
    }
}

/// Type alias for results of acquire and release operations.
pub type ShareResult<T> = Result<T, ShareError>;
