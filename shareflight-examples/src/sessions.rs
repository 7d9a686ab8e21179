//! Shared backend sessions, one per connection string.
//!
//! `FakeBackend` stands in for a database or message broker: opening a
//! session is slow and stateful, so concurrent parts of an application
//! should share one session per DSN instead of each opening their own.
//! [`SessionManager`] plugs that lifecycle into a
//! [`SharedResourceMap`](shareflight::SharedResourceMap), which guarantees a
//! single live session per DSN and closes it when the last user lets go.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shareflight::{BoxError, CloseReason, KeyedResourceManager, ResourceKey};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Errors the fake backend can raise.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The connection string was refused.
    #[error("backend refused dsn '{0}'")]
    Refused(String),

    /// The session was not known to the backend at close time.
    #[error("session {0} is not open")]
    UnknownSession(u64),
}

/// An in-process stand-in for a session-oriented backend.
#[derive(Debug, Default)]
pub struct FakeBackend {
    next_id: AtomicU64,
    open: Mutex<HashSet<u64>>,
}

impl FakeBackend {
    /// Creates a backend with no open sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.open.lock().len()
    }

    async fn connect(&self, dsn: &str) -> Result<Session, BackendError> {
        // Session setup is the expensive part being shared.
        tokio::time::sleep(Duration::from_millis(10)).await;
        if dsn.starts_with("refused://") {
            return Err(BackendError::Refused(dsn.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.lock().insert(id);
        Ok(Session {
            id,
            dsn: dsn.to_string(),
        })
    }

    fn close(&self, session: &Session) -> Result<(), BackendError> {
        if self.open.lock().remove(&session.id) {
            Ok(())
        } else {
            Err(BackendError::UnknownSession(session.id))
        }
    }
}

/// A live backend session.
#[derive(Debug)]
pub struct Session {
    id: u64,
    dsn: String,
}

impl Session {
    /// The session's backend-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The connection string this session serves.
    pub fn dsn(&self) -> &str {
        &self.dsn
    }
}

/// Session lifecycle for [`SharedResourceMap`]: the key is the DSN itself.
///
/// [`SharedResourceMap`]: shareflight::SharedResourceMap
pub struct SessionManager {
    backend: Arc<FakeBackend>,
}

impl SessionManager {
    /// Creates a manager dialing `backend`.
    pub fn new(backend: Arc<FakeBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl KeyedResourceManager for SessionManager {
    type Args = String;
    type Resource = Session;

    fn key(&self, args: &Self::Args) -> ResourceKey {
        ResourceKey::try_new(args.clone()).expect("a dsn is never empty")
    }

    async fn create(
        &self,
        args: Self::Args,
        cancel: CancellationToken,
    ) -> Result<Session, BoxError> {
        let session = tokio::select! {
            session = self.backend.connect(&args) => session?,
            () = cancel.cancelled() => return Err("connect abandoned".into()),
        };
        info!(dsn = %args, session = session.id(), "session opened");
        Ok(session)
    }

    async fn dispose(&self, session: &Session, reason: &CloseReason) -> Result<(), BoxError> {
        info!(session = session.id(), %reason, "session closed");
        self.backend.close(session)?;
        Ok(())
    }
}
