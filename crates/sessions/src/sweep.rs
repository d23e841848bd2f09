//! Optional background expiry sweep.
//!
//! Expiry is enforced on access, so a record nobody looks up again stays in
//! memory.  The sweeper periodically evicts those and prunes their rows from
//! persistence.  Nothing a caller can observe changes: an expired record is
//! already reported as absent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use ks_domain::trace::TraceEvent;
use ks_domain::Clock;

use crate::persist::SessionPersistence;

/// A manager whose expired records can be evicted in bulk.
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evict everything expired.  Returns the number of records evicted.
    fn sweep_expired(&self) -> usize;
}

/// Sweep every manager once.  Returns the total evicted.
pub fn sweep_all(managers: &[Arc<dyn Sweep>]) -> usize {
    managers
        .iter()
        .map(|m| {
            let evicted = m.sweep_expired();
            if evicted > 0 {
                tracing::debug!(manager = m.name(), evicted, "expired sessions swept");
            }
            evicted
        })
        .sum()
}

/// Sweep `managers` and prune `persistence` every `interval` until
/// `shutdown` is notified.  A failed prune is logged and retried on the
/// next tick.
pub fn spawn_sweeper(
    managers: Vec<Arc<dyn Sweep>>,
    persistence: Arc<dyn SessionPersistence>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = sweep_all(&managers);
                    let pruned = match persistence.prune_expired(clock.now()).await {
                        Ok(pruned) => pruned,
                        Err(e) => {
                            tracing::warn!(error = %e, "pruning persisted sessions failed");
                            0
                        }
                    };
                    if evicted > 0 || pruned > 0 {
                        TraceEvent::SweepCompleted { evicted, pruned }.emit();
                    }
                }
                _ = shutdown.notified() => {
                    tracing::debug!("session sweeper stopping");
                    break;
                }
            }
        }
    })
}
