//! Integration tests for the running agent.
//!
//! These drive `GcAgent::start` with the mock runtime: bootstrap, event
//! ingestion and periodic sweeps running together, persistence across a
//! restart, and shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use imagegc_agent::{AgentConfig, Collector, GcAgent, MockRuntime, PersistOutcome, UsageLedger};
use imagegc_events::RuntimeEvent;
use imagegc_id::{ContainerId, ImageId};
use tokio::sync::{watch, Mutex};

fn image(id: &str) -> ImageId {
    ImageId::parse(id).unwrap()
}

fn test_config(db_path: Option<std::path::PathBuf>) -> AgentConfig {
    AgentConfig {
        db_path,
        max_age: Duration::from_secs(3600),
        purge_frequency: Duration::from_millis(20),
        resubscribe_delay: Duration::from_millis(10),
        ..AgentConfig::default()
    }
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

#[tokio::test]
async fn test_agent_runs_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(MockRuntime::new());
    let app = image("sha256:app");
    let dangling = image("sha256:dangling");
    runtime.add_image(&app, &["app:1"]);
    runtime.add_dangling_image(&dangling);

    let agent = Arc::new(GcAgent::open(
        runtime.clone(),
        test_config(Some(dir.path().join("state.db"))),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn({
        let agent = agent.clone();
        async move { agent.start(shutdown_rx).await }
    });

    // Bootstrap seeds, the ingestor subscribes, and a sweep removes the dangling image
    wait_for(|| runtime.subscription_count() >= 1).await;
    wait_for(|| !runtime.has_image(&dangling)).await;

    let ledger = agent.ledger();
    let seeded = ledger.lock().await.get(&app).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    runtime.emit(RuntimeEvent::container_destroyed("c1", "app:1"));
    wait_for(|| {
        ledger
            .try_lock()
            .map(|ledger| ledger.get(&app).is_some_and(|at| at > seeded))
            .unwrap_or(false)
    })
    .await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("agent did not stop")
        .unwrap();

    assert!(runtime.has_image(&app));
}

#[tokio::test]
async fn test_usage_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("state").join("state.db");
    let runtime = Arc::new(MockRuntime::new());
    let kept = image("sha256:kept");
    let removed = image("sha256:removed");
    runtime.add_image(&kept, &["kept:1"]);
    runtime.add_image(&removed, &["removed:1"]);

    let recent = Utc::now() - ChronoDuration::minutes(5);
    let stale = Utc::now() - ChronoDuration::hours(5);
    {
        let agent = GcAgent::open(runtime.clone(), test_config(Some(db.clone())));
        let ledger = agent.ledger();
        let mut ledger = ledger.lock().await;
        assert_eq!(ledger.set(&kept, recent), PersistOutcome::Persisted);
        assert_eq!(ledger.set(&removed, stale), PersistOutcome::Persisted);
    }

    // Second process: restored records drive eviction
    let agent = GcAgent::open(runtime.clone(), test_config(Some(db.clone())));
    agent.bootstrap().await;
    let report = agent.collect().await;

    assert_eq!(report.expired_removed, 1);
    assert!(runtime.has_image(&kept));
    assert!(!runtime.has_image(&removed));

    // Third process: the removed image's row is gone
    let mut ledger = UsageLedger::open_or_memory(Some(&db));
    ledger.restore_persisted().unwrap();
    assert_eq!(ledger.get(&kept), Some(recent));
    assert!(ledger.get(&removed).is_none());
}

#[tokio::test]
async fn test_ingest_and_sweep_share_the_ledger() {
    let runtime = Arc::new(MockRuntime::new());
    let ledger = Arc::new(Mutex::new(UsageLedger::memory_only()));
    let collector = Collector::new(runtime.clone(), Duration::from_secs(3600));
    let ingestor = imagegc_agent::EventIngestor::new(runtime.clone(), ledger.clone());

    let images: Vec<ImageId> = (0..20).map(|i| image(&format!("sha256:img{i:02}"))).collect();
    for (i, id) in images.iter().enumerate() {
        let tag = format!("img:{i}");
        runtime.add_image(id, &[tag.as_str()]);
        ledger
            .lock()
            .await
            .set(id, Utc::now() - ChronoDuration::hours(10));
    }

    // Every even image is destroyed-and-refreshed while sweeps run
    let refresh = async {
        for i in (0..images.len()).step_by(2) {
            let event = RuntimeEvent::container_destroyed(format!("c{i}"), format!("img:{i}"));
            ingestor.handle_event(event).await;
            tokio::task::yield_now().await;
        }
    };
    let sweep = async {
        for _ in 0..3 {
            collector.sweep(&ledger).await;
            tokio::task::yield_now().await;
        }
    };
    tokio::join!(refresh, sweep);
    collector.sweep(&ledger).await;

    // Odd images were never refreshed and must be gone
    for (i, id) in images.iter().enumerate() {
        if i % 2 == 1 {
            assert!(!runtime.has_image(id), "image {i} should be evicted");
        }
    }

    // Images still present have a fresh record
    let ledger = ledger.lock().await;
    for id in images.iter().filter(|id| runtime.has_image(id)) {
        let last = ledger.get(id).unwrap();
        assert!(last > Utc::now() - ChronoDuration::minutes(1));
    }
}

#[tokio::test]
async fn test_container_list_failure_protects_everything() {
    let runtime = Arc::new(MockRuntime::new());
    let id = image("sha256:old");
    runtime.add_image(&id, &["old:1"]);
    runtime.add_running_container(&ContainerId::parse("c1").unwrap(), "old:1");
    runtime.set_fail_list_containers(true);

    let mut ledger = UsageLedger::memory_only();
    ledger.set(&id, Utc::now() - ChronoDuration::days(10));
    let agent = GcAgent::new(runtime.clone(), ledger, test_config(None));

    let report = agent.collect().await;
    assert_eq!(report.listing_failures, 1);
    assert!(runtime.has_image(&id));

    runtime.set_fail_list_containers(false);
    let report = agent.collect().await;
    assert_eq!(report.protected, 1);
    assert!(runtime.has_image(&id));
}
