//! Periodic sweep scheduling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument};

use crate::collector::Collector;
use crate::ledger::UsageLedger;

/// Runs the collector at a fixed interval until shutdown.
///
/// A sweep is awaited before the next tick is considered, so sweeps never
/// overlap; ticks missed while a sweep runs are delayed rather than
/// fired in a burst.
pub struct SweepScheduler {
    collector: Collector,
    ledger: Arc<Mutex<UsageLedger>>,
    interval: Duration,
}

impl SweepScheduler {
    pub fn new(collector: Collector, ledger: Arc<Mutex<UsageLedger>>, interval: Duration) -> Self {
        Self {
            collector,
            ledger,
            interval,
        }
    }

    /// Run until shutdown. Returns the number of sweeps performed.
    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            interval = %humantime::format_duration(self.interval),
            retention = %humantime::format_duration(self.collector.retention()),
            "Starting sweep scheduler"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        let mut sweeps = 0u64;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.collector.sweep(&self.ledger).await;
                    sweeps += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(sweeps, "Sweep scheduler shutting down");
                        break;
                    }
                }
            }
        }

        sweeps
    }
}
