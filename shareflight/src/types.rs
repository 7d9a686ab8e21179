//! Core types for the Shareflight resource-sharing library.
//!
//! This module defines the fundamental types used throughout the library.
//! Validated types use smart constructors to ensure validity at construction
//! time, following the "parse, don't validate" principle.

use nutype::nutype;

use crate::errors::ShareError;

/// A key identifying which underlying resource instance to multiplex onto.
///
/// `ResourceKey` values are derived from caller-supplied arguments by a
/// [`KeyedResourceManager::key`](crate::KeyedResourceManager::key)
/// implementation. They are guaranteed non-empty after trimming; keeping
/// distinguishable resources from colliding on one key is the deriving
/// function's responsibility.
#[nutype(
    sanitize(trim),
    validate(not_empty),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ResourceKey(String);

/// Why a resource is being torn down.
///
/// A reason accompanies every release; only the reason given by the release
/// that drops the usage count to zero reaches the external
/// [`dispose`](crate::ResourceManager::dispose) call.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// The last lease was released normally.
    Finished,

    /// Every opener abandoned the creation before it settled; the instance
    /// (if one materialized) was never handed out.
    Abandoned,

    /// An acquire failed or was aborted, and its rollback emptied the
    /// factory. Carries the error that triggered the rollback.
    Failed(ShareError),

    /// A caller-supplied reason.
    Other(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished => write!(f, "finished"),
            Self::Abandoned => write!(f, "abandoned before creation settled"),
            Self::Failed(err) => write!(f, "rolled back: {err}"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}
