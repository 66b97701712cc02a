//! Runtime event ingestion.
//!
//! Every "container destroyed" event marks the container's image as used
//! at the time the event is observed. Everything else on the stream is
//! ignored. Events are handled strictly in arrival order; a failure to
//! handle one event never ends the stream.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use imagegc_events::RuntimeEvent;
use imagegc_id::ImageId;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::ledger::{PersistOutcome, UsageLedger};
use crate::runtime::RuntimeObserver;

/// Default delay before re-subscribing after the event stream ends.
pub const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Result of handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not a container destroy event.
    Ignored,
    /// A destroy event whose image could not be determined.
    Dropped,
    /// The image's use was handed to the ledger.
    Recorded {
        image_id: ImageId,
        outcome: PersistOutcome,
    },
}

/// Consumes the runtime's event stream and feeds the usage ledger.
pub struct EventIngestor {
    runtime: Arc<dyn RuntimeObserver>,
    ledger: Arc<Mutex<UsageLedger>>,
    resubscribe_delay: Duration,
}

impl EventIngestor {
    pub fn new(runtime: Arc<dyn RuntimeObserver>, ledger: Arc<Mutex<UsageLedger>>) -> Self {
        Self {
            runtime,
            ledger,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    /// Override the re-subscription delay.
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Consume events until shutdown, re-subscribing whenever the stream
    /// ends or cannot be opened.
    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            resubscribe_delay_ms = self.resubscribe_delay.as_millis() as u64,
            "Starting event ingestor"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.runtime.subscribe_events().await {
                Ok(mut events) => {
                    debug!("Subscribed to runtime events");
                    loop {
                        tokio::select! {
                            next = events.next() => match next {
                                Some(Ok(event)) => {
                                    self.handle_event(event).await;
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "Error on runtime event stream");
                                }
                                None => {
                                    warn!("Runtime event stream ended");
                                    break;
                                }
                            },
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    info!("Event ingestor shutting down");
                                    return;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to subscribe to runtime events");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Event ingestor shutting down");
    }

    /// Handle a single event.
    pub async fn handle_event(&self, event: RuntimeEvent) -> IngestOutcome {
        if !event.is_container_destroyed() {
            return IngestOutcome::Ignored;
        }

        let Some(image_ref) = event.image_ref.as_deref() else {
            warn!(
                container_id = %event.resource_ref,
                "Destroy event carries no image reference, dropping"
            );
            return IngestOutcome::Dropped;
        };

        // Resolve before taking the lock so a slow runtime never blocks sweeps
        let image_id = match self.runtime.inspect_image(image_ref).await {
            Ok(image) => image.id,
            Err(e) => {
                warn!(
                    container_id = %event.resource_ref,
                    image_ref = %image_ref,
                    error = %e,
                    "Cannot resolve image of destroyed container, dropping event"
                );
                return IngestOutcome::Dropped;
            }
        };

        let outcome = self.ledger.lock().await.set(&image_id, Utc::now());
        debug!(
            container_id = %event.resource_ref,
            image_id = %image_id,
            outcome = ?outcome,
            "Recorded image use from destroyed container"
        );

        IngestOutcome::Recorded { image_id, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use imagegc_events::EventKind;

    fn image(id: &str) -> ImageId {
        ImageId::parse(id).unwrap()
    }

    fn setup() -> (Arc<MockRuntime>, Arc<Mutex<UsageLedger>>, EventIngestor) {
        let runtime = Arc::new(MockRuntime::new());
        let ledger = Arc::new(Mutex::new(UsageLedger::memory_only()));
        let ingestor = EventIngestor::new(runtime.clone(), ledger.clone())
            .with_resubscribe_delay(Duration::from_millis(10));
        (runtime, ledger, ingestor)
    }

    #[tokio::test]
    async fn test_destroy_event_records_use() {
        let (runtime, ledger, ingestor) = setup();
        let id = image("sha256:app");
        runtime.add_image(&id, &["app:v1"]);

        let before = Utc::now();
        let outcome = ingestor
            .handle_event(RuntimeEvent::container_destroyed("c1", "app:v1"))
            .await;

        assert_eq!(
            outcome,
            IngestOutcome::Recorded {
                image_id: id.clone(),
                outcome: PersistOutcome::MemoryOnly,
            }
        );
        let recorded = ledger.lock().await.get(&id).unwrap();
        assert!(recorded >= before);
    }

    #[tokio::test]
    async fn test_other_events_ignored() {
        let (runtime, ledger, ingestor) = setup();
        runtime.add_image(&image("sha256:app"), &["app:v1"]);

        for kind in [EventKind::ContainerCreated, EventKind::ContainerDied, EventKind::ImageDeleted] {
            let event = RuntimeEvent::new(kind, "c1").with_image_ref("app:v1");
            assert_eq!(ingestor.handle_event(event).await, IngestOutcome::Ignored);
        }
        assert!(ledger.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_image_dropped() {
        let (_runtime, ledger, ingestor) = setup();

        let outcome = ingestor
            .handle_event(RuntimeEvent::container_destroyed("c1", "gone:1"))
            .await;
        assert_eq!(outcome, IngestOutcome::Dropped);
        assert!(ledger.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_ref_dropped() {
        let (_runtime, _ledger, ingestor) = setup();

        let event = RuntimeEvent::new(EventKind::ContainerDestroyed, "c1");
        assert_eq!(ingestor.handle_event(event).await, IngestOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_run_consumes_stream_and_resubscribes() {
        let (runtime, ledger, ingestor) = setup();
        let id = image("sha256:app");
        runtime.add_image(&id, &["app:v1"]);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { ingestor.run(shutdown_rx).await });

        wait_for(|| runtime.subscription_count() == 1).await;
        runtime.emit_error("transient");
        runtime.emit(RuntimeEvent::container_destroyed("c1", "app:v1"));
        runtime.close_event_streams();

        wait_for(|| runtime.subscription_count() >= 2).await;
        assert!(ledger.lock().await.get(&id).is_some());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_retries_failed_subscribe() {
        let (runtime, _ledger, ingestor) = setup();
        runtime.set_fail_subscribe(true);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { ingestor.run(shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runtime.subscription_count(), 0);
        runtime.set_fail_subscribe(false);

        wait_for(|| runtime.subscription_count() == 1).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }
}
