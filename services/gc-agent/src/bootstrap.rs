//! Startup reconciliation.
//!
//! Before the first sweep the ledger is brought up to date with what the
//! runtime already knows: persisted records are restored, every existing
//! container contributes its image's last use, and images that still have
//! no record are assumed to be in use right now. Nothing is ever moved
//! backwards; the ledger's only-if-newer rule applies throughout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use imagegc_id::ImageId;
use tracing::{debug, info, instrument, warn};

use crate::ledger::UsageLedger;
use crate::runtime::{ContainerDescriptor, ImageFilter, RuntimeError, RuntimeObserver};

/// Summary of a bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Persisted records that changed the in-memory ledger.
    pub loaded: usize,
    /// Containers whose image use moved the ledger forward.
    pub containers_applied: usize,
    /// Containers whose implied use was not newer than the existing record.
    pub containers_unchanged: usize,
    /// Containers skipped because their image or finish time was unknown.
    pub containers_skipped: usize,
    /// Images with no record that were seeded with the current time.
    pub images_seeded: usize,
}

/// Reconciles the ledger against the runtime at startup.
pub struct Bootstrapper {
    runtime: Arc<dyn RuntimeObserver>,
}

impl Bootstrapper {
    pub fn new(runtime: Arc<dyn RuntimeObserver>) -> Self {
        Self { runtime }
    }

    /// Run reconciliation with the current time.
    pub async fn run(&self, ledger: &mut UsageLedger) -> BootstrapReport {
        self.run_at(ledger, Utc::now()).await
    }

    /// Run reconciliation with an explicit notion of "now".
    #[instrument(skip(self, ledger))]
    pub async fn run_at(&self, ledger: &mut UsageLedger, now: DateTime<Utc>) -> BootstrapReport {
        let mut report = BootstrapReport::default();

        match ledger.restore_persisted() {
            Ok(loaded) => report.loaded = loaded,
            Err(e) => warn!(error = %e, "Failed to load persisted usage records"),
        }

        match self.runtime.list_containers(true).await {
            Ok(containers) => {
                for container in &containers {
                    match self.last_use_of(container, now).await {
                        Ok(Some((image_id, at))) => {
                            debug!(
                                container_id = %container.id,
                                image_id = %image_id,
                                last_used_at = %at,
                                "Applying container image use"
                            );
                            if ledger.set(&image_id, at).changed() {
                                report.containers_applied += 1;
                            } else {
                                report.containers_unchanged += 1;
                            }
                        }
                        Ok(None) => {
                            debug!(
                                container_id = %container.id,
                                "Exited container has no finish time, skipping"
                            );
                            report.containers_skipped += 1;
                        }
                        Err(e) => {
                            warn!(
                                container_id = %container.id,
                                image_ref = %container.image_ref,
                                error = %e,
                                "Cannot reconcile container, skipping"
                            );
                            report.containers_skipped += 1;
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list containers during bootstrap"),
        }

        match self.runtime.list_images(ImageFilter::all()).await {
            Ok(images) => {
                for image in images {
                    if ledger.get(&image.id).is_none() {
                        ledger.set(&image.id, now);
                        report.images_seeded += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list images during bootstrap"),
        }

        info!(
            loaded = report.loaded,
            containers_applied = report.containers_applied,
            containers_unchanged = report.containers_unchanged,
            containers_skipped = report.containers_skipped,
            images_seeded = report.images_seeded,
            tracked = ledger.len(),
            "Bootstrap complete"
        );

        report
    }

    /// Image and last-use time a container implies. `None` means an
    /// exited container whose finish time is unknown.
    async fn last_use_of(
        &self,
        container: &ContainerDescriptor,
        now: DateTime<Utc>,
    ) -> Result<Option<(ImageId, DateTime<Utc>)>, RuntimeError> {
        let image_id = self.runtime.image_of(container).await?;

        if !container.status.is_exited() {
            return Ok(Some((image_id, now)));
        }

        let finished_at = match container.exited_at {
            Some(at) => Some(at),
            None => {
                self.runtime
                    .inspect_container(&container.id)
                    .await?
                    .finished_at
            }
        };

        Ok(finished_at.map(|at| (image_id, at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerStatus, MockRuntime};
    use crate::state::StateStore;
    use chrono::{Duration, TimeZone};
    use imagegc_id::ContainerId;

    fn image(id: &str) -> ImageId {
        ImageId::parse(id).unwrap()
    }

    fn container(id: &str) -> ContainerId {
        ContainerId::parse(id).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_running_container_uses_now() {
        let runtime = Arc::new(MockRuntime::new());
        let id = image("sha256:web");
        runtime.add_image(&id, &["web:1"]);
        runtime.add_running_container(&container("c1"), "web:1");

        let mut ledger = UsageLedger::memory_only();
        let report = Bootstrapper::new(runtime).run_at(&mut ledger, now()).await;

        assert_eq!(report.containers_applied, 1);
        assert_eq!(report.images_seeded, 0);
        assert_eq!(ledger.get(&id), Some(now()));
    }

    #[tokio::test]
    async fn test_exited_container_uses_finish_time() {
        let runtime = Arc::new(MockRuntime::new());
        let id = image("sha256:job");
        let finished = now() - Duration::hours(30);
        runtime.add_image(&id, &["job:1"]);
        runtime.add_exited_container(&container("c1"), "job:1", finished);

        let mut ledger = UsageLedger::memory_only();
        Bootstrapper::new(runtime).run_at(&mut ledger, now()).await;

        assert_eq!(ledger.get(&id), Some(finished));
    }

    #[tokio::test]
    async fn test_listed_exit_time_skips_inspection() {
        let runtime = Arc::new(MockRuntime::new());
        let id = image("sha256:job");
        let exited = now() - Duration::hours(2);
        runtime.add_image(&id, &["job:1"]);
        runtime.add_container(&container("c1"), "job:1", ContainerStatus::Exited, Some(exited));

        let mut ledger = UsageLedger::memory_only();
        Bootstrapper::new(runtime).run_at(&mut ledger, now()).await;

        assert_eq!(ledger.get(&id), Some(exited));
    }

    #[tokio::test]
    async fn test_exited_without_finish_time_is_skipped() {
        let runtime = Arc::new(MockRuntime::new());
        let id = image("sha256:job");
        runtime.add_image(&id, &["job:1"]);
        runtime.add_container(&container("c1"), "job:1", ContainerStatus::Dead, None);

        let mut ledger = UsageLedger::memory_only();
        let report = Bootstrapper::new(runtime).run_at(&mut ledger, now()).await;

        assert_eq!(report.containers_skipped, 1);
        // Still seeded as an image with no record
        assert_eq!(report.images_seeded, 1);
        assert_eq!(ledger.get(&id), Some(now()));
    }

    #[tokio::test]
    async fn test_unresolvable_container_is_skipped() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.add_running_container(&container("c1"), "ghost:1");

        let mut ledger = UsageLedger::memory_only();
        let report = Bootstrapper::new(runtime).run_at(&mut ledger, now()).await;

        assert_eq!(report.containers_skipped, 1);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn test_persisted_record_is_not_regressed() {
        let runtime = Arc::new(MockRuntime::new());
        let id = image("sha256:job");
        let persisted = now() - Duration::hours(1);
        runtime.add_image(&id, &["job:1"]);
        runtime.add_exited_container(&container("c1"), "job:1", now() - Duration::hours(50));

        let store = StateStore::open_in_memory().unwrap();
        store.put_usage(&id, persisted).unwrap();

        let mut ledger = UsageLedger::with_store(store);
        let report = Bootstrapper::new(runtime).run_at(&mut ledger, now()).await;

        assert_eq!(report.loaded, 1);
        assert_eq!(report.containers_applied, 0);
        assert_eq!(report.containers_unchanged, 1);
        assert_eq!(ledger.get(&id), Some(persisted));
    }

    #[tokio::test]
    async fn test_container_counts_follow_ledger_changes() {
        let runtime = Arc::new(MockRuntime::new());
        let older = image("sha256:older");
        let newer = image("sha256:newer");
        runtime.add_image(&older, &["older:1"]);
        runtime.add_image(&newer, &["newer:1"]);
        runtime.add_exited_container(&container("c1"), "older:1", now() - Duration::hours(30));
        runtime.add_exited_container(&container("c2"), "older:1", now() - Duration::hours(40));
        runtime.add_exited_container(&container("c3"), "newer:1", now() - Duration::hours(2));

        let mut ledger = UsageLedger::memory_only();
        ledger.set(&older, now() - Duration::hours(10));

        let report = Bootstrapper::new(runtime).run_at(&mut ledger, now()).await;

        assert_eq!(report.containers_applied, 1);
        assert_eq!(report.containers_unchanged, 2);
        assert_eq!(report.images_seeded, 0);
        assert_eq!(ledger.get(&older), Some(now() - Duration::hours(10)));
        assert_eq!(ledger.get(&newer), Some(now() - Duration::hours(2)));
    }

    #[tokio::test]
    async fn test_listing_failures_are_not_fatal() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.set_fail_list_containers(true);
        runtime.set_fail_list_images(true);

        let mut ledger = UsageLedger::memory_only();
        let report = Bootstrapper::new(runtime).run_at(&mut ledger, now()).await;

        assert_eq!(report, BootstrapReport::default());
    }
}
