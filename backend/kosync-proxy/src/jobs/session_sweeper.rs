use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::services::{Clock, SessionTracker};

/// Background job that closes idle reading sessions on a fixed cadence.
///
/// One ticker serves every session; a session lingers at most one interval
/// past its inactivity timeout before it is flushed.
pub struct SessionSweepJob {
    tracker: Arc<SessionTracker>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl SessionSweepJob {
    pub fn new(tracker: Arc<SessionTracker>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            tracker,
            clock,
            interval,
        }
    }

    /// Run the sweep loop until a shutdown message arrives (or the sender is
    /// dropped).
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Session sweep job started (interval: {:?})", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tracker.sweep(self.clock.now()).await;
                    if report.is_empty() {
                        debug!(active = self.tracker.active_count(), "Session sweep: nothing idle");
                    } else {
                        info!(
                            expired = report.expired,
                            persisted = report.persisted,
                            discarded = report.discarded,
                            requeued = report.requeued,
                            retried = report.retried,
                            dropped = report.dropped,
                            "Session sweep finished"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Session sweep job stopping");
                    break;
                }
            }
        }
    }

    /// Spawn the sweep loop as a Tokio task.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
