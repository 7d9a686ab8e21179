//! Demo: a burst of concurrent workers sharing one backend session per DSN.
//!
//! Run with:
//! ```bash
//! cargo run --example session_burst
//! ```

use std::sync::Arc;
use std::time::Duration;

use shareflight::SharedResourceMap;
use shareflight_examples::sessions::{FakeBackend, SessionManager};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let backend = Arc::new(FakeBackend::new());
    let sessions = SharedResourceMap::new(SessionManager::new(Arc::clone(&backend)));

    // Ten workers hammer the same DSN; the backend sees a single session.
    let mut workers = Vec::new();
    for worker in 0..10 {
        let sessions = sessions.clone();
        workers.push(tokio::spawn(async move {
            let lease = sessions
                .acquire("pg://primary".to_string())
                .await
                .expect("backend accepts the primary dsn");
            info!(worker, session = lease.id(), "worker got a session");
            tokio::time::sleep(Duration::from_millis(20)).await;

            // A short linger keeps the session up between bursts.
            lease
                .with_linger(Duration::from_millis(100))
                .release()
                .await
                .expect("first release always succeeds");
        }));
    }
    for worker in workers {
        worker.await?;
    }

    info!(
        open_sessions = backend.open_sessions(),
        "burst done; session lingers briefly"
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(
        open_sessions = backend.open_sessions(),
        "grace period over; session closed"
    );

    Ok(())
}
