//! Image collector.
//!
//! One sweep runs three steps against the runtime:
//!
//! 1. Remove every dangling image and forget its usage record.
//! 2. Build the set of image IDs referenced by any container, running or
//!    stopped.
//! 3. Remove every listed image whose last use is older than the
//!    retention cutoff and which no container references.
//!
//! Images without a usage record are never removed by age. Removal
//! failures are logged and skipped; listing failures skip the steps that
//! depend on them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use imagegc_id::ImageId;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::ledger::UsageLedger;
use crate::runtime::{ImageFilter, RuntimeError, RuntimeObserver};

/// Counters describing one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Dangling images removed.
    pub dangling_removed: usize,
    /// Images removed for exceeding the retention window.
    pub expired_removed: usize,
    /// Removals the runtime refused or failed.
    pub removal_failures: usize,
    /// Expired images kept because a container references them.
    pub protected: usize,
    /// Listed images with no usage record.
    pub untracked: usize,
    /// Usage records dropped because their image no longer exists.
    pub stale_pruned: usize,
    /// Containers whose image could not be resolved.
    pub unresolved_containers: usize,
    /// Runtime listings that failed.
    pub listing_failures: usize,
}

impl SweepReport {
    /// Total images removed.
    pub fn removed(&self) -> usize {
        self.dangling_removed + self.expired_removed
    }
}

/// Removes dangling and expired images.
pub struct Collector {
    runtime: Arc<dyn RuntimeObserver>,
    retention: Duration,
}

impl Collector {
    pub fn new(runtime: Arc<dyn RuntimeObserver>, retention: Duration) -> Self {
        Self { runtime, retention }
    }

    /// Retention window.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Run one sweep, holding the ledger lock for its whole duration.
    pub async fn sweep(&self, ledger: &Mutex<UsageLedger>) -> SweepReport {
        let mut ledger = ledger.lock().await;
        self.collect(&mut ledger).await
    }

    /// Run one sweep against an already locked ledger.
    pub async fn collect(&self, ledger: &mut UsageLedger) -> SweepReport {
        self.collect_at(ledger, Utc::now()).await
    }

    /// Run one sweep with an explicit notion of "now".
    #[instrument(skip(self, ledger), fields(retention = ?self.retention))]
    pub async fn collect_at(&self, ledger: &mut UsageLedger, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        self.remove_dangling(ledger, &mut report).await;

        match self.images_in_use(&mut report).await {
            Some(in_use) => {
                self.remove_expired(ledger, &in_use, now, &mut report).await;
            }
            None => {
                warn!("Skipping age-based eviction, containers could not be listed");
            }
        }

        info!(
            dangling_removed = report.dangling_removed,
            expired_removed = report.expired_removed,
            removal_failures = report.removal_failures,
            protected = report.protected,
            untracked = report.untracked,
            stale_pruned = report.stale_pruned,
            tracked = ledger.len(),
            "Sweep complete"
        );

        report
    }

    async fn remove_dangling(&self, ledger: &mut UsageLedger, report: &mut SweepReport) {
        let images = match self.runtime.list_images(ImageFilter::dangling()).await {
            Ok(images) => images,
            Err(e) => {
                warn!(error = %e, "Failed to list dangling images");
                report.listing_failures += 1;
                return;
            }
        };

        for image in images {
            if self.remove(ledger, &image.id, report).await {
                debug!(image_id = %image.id, "Removed dangling image");
                report.dangling_removed += 1;
            }
        }
    }

    async fn images_in_use(&self, report: &mut SweepReport) -> Option<HashSet<ImageId>> {
        let containers = match self.runtime.list_containers(true).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Failed to list containers");
                report.listing_failures += 1;
                return None;
            }
        };

        let mut in_use = HashSet::with_capacity(containers.len());
        for container in &containers {
            match self.runtime.image_of(container).await {
                Ok(image_id) => {
                    in_use.insert(image_id);
                }
                Err(e) => {
                    warn!(
                        container_id = %container.id,
                        image_ref = %container.image_ref,
                        error = %e,
                        "Cannot resolve container image"
                    );
                    report.unresolved_containers += 1;
                }
            }
        }

        Some(in_use)
    }

    async fn remove_expired(
        &self,
        ledger: &mut UsageLedger,
        in_use: &HashSet<ImageId>,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) {
        let images = match self.runtime.list_images(ImageFilter::all()).await {
            Ok(images) => images,
            Err(e) => {
                warn!(error = %e, "Failed to list images");
                report.listing_failures += 1;
                return;
            }
        };

        let cutoff = self.cutoff(now);
        let present: HashSet<ImageId> = images.iter().map(|i| i.id.clone()).collect();

        for image in &images {
            let Some(last_used_at) = ledger.get(&image.id) else {
                report.untracked += 1;
                continue;
            };

            if last_used_at >= cutoff {
                continue;
            }

            if in_use.contains(&image.id) {
                debug!(image_id = %image.id, %last_used_at, "Expired image is in use, keeping");
                report.protected += 1;
                continue;
            }

            if self.remove(ledger, &image.id, report).await {
                info!(
                    image_id = %image.id,
                    tags = ?image.tags,
                    %last_used_at,
                    "Removed expired image"
                );
                report.expired_removed += 1;
            }
        }

        for image_id in ledger.image_ids() {
            if !present.contains(&image_id) {
                debug!(image_id = %image_id, "Pruning record of vanished image");
                ledger.delete(&image_id);
                report.stale_pruned += 1;
            }
        }
    }

    /// Remove an image and forget it. Returns true if the runtime removed it.
    async fn remove(
        &self,
        ledger: &mut UsageLedger,
        image_id: &ImageId,
        report: &mut SweepReport,
    ) -> bool {
        match self.runtime.remove_image(image_id).await {
            Ok(()) => {
                ledger.delete(image_id);
                true
            }
            Err(RuntimeError::NotFound(_)) => {
                debug!(image_id = %image_id, "Image already gone");
                ledger.delete(image_id);
                false
            }
            Err(e) => {
                warn!(image_id = %image_id, error = %e, "Failed to remove image");
                report.removal_failures += 1;
                false
            }
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
