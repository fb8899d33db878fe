//! Periodic removal of expired document sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use docent_core::sessions::SessionManager;
use docent_core::store::Store;

/// Run one cleanup pass and log the outcome.
pub async fn run_once<S: Store + ?Sized>(manager: &SessionManager<S>) -> docent_core::Result<u64> {
    let removed = manager.cleanup_now().await?;
    if removed > 0 {
        tracing::info!(removed, "expired document sessions removed");
    } else {
        tracing::debug!("no expired document sessions");
    }
    Ok(removed)
}

/// Spawn a task that runs [`run_once`] every `interval` until `shutdown`
/// flips to `true` or its sender is dropped.
///
/// A failed pass is logged and retried on the next tick.
pub fn spawn_cleanup_task<S>(
    manager: Arc<SessionManager<S>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: Store + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = run_once(manager.as_ref()).await {
                        tracing::error!(error = %e, "document cleanup failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("cleanup task stopping");
                        break;
                    }
                }
            }
        }
    })
}
