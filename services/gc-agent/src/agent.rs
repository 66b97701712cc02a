//! The gc agent: owns the shared ledger and wires the components.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::bootstrap::{BootstrapReport, Bootstrapper};
use crate::collector::{Collector, SweepReport};
use crate::config::AgentConfig;
use crate::ingest::EventIngestor;
use crate::ledger::UsageLedger;
use crate::runtime::RuntimeObserver;
use crate::scheduler::SweepScheduler;

/// Image garbage collection agent.
pub struct GcAgent {
    runtime: Arc<dyn RuntimeObserver>,
    ledger: Arc<Mutex<UsageLedger>>,
    config: AgentConfig,
}

impl GcAgent {
    /// Create an agent around an existing ledger.
    pub fn new(runtime: Arc<dyn RuntimeObserver>, ledger: UsageLedger, config: AgentConfig) -> Self {
        Self {
            runtime,
            ledger: Arc::new(Mutex::new(ledger)),
            config,
        }
    }

    /// Create an agent, opening the ledger configured in `config`.
    ///
    /// A store that cannot be opened leaves the agent memory-only.
    pub fn open(runtime: Arc<dyn RuntimeObserver>, config: AgentConfig) -> Self {
        let ledger = UsageLedger::open_or_memory(config.db_path.as_deref());
        Self::new(runtime, ledger, config)
    }

    /// Shared handle to the ledger.
    pub fn ledger(&self) -> Arc<Mutex<UsageLedger>> {
        self.ledger.clone()
    }

    /// Agent configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Reconcile the ledger against the runtime.
    pub async fn bootstrap(&self) -> BootstrapReport {
        let mut ledger = self.ledger.lock().await;
        Bootstrapper::new(self.runtime.clone()).run(&mut ledger).await
    }

    /// Run one sweep now.
    pub async fn collect(&self) -> SweepReport {
        self.collector().sweep(&self.ledger).await
    }

    /// Bootstrap, then ingest events and sweep periodically until shutdown.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) {
        let persistent = self.ledger.lock().await.is_persistent();
        info!(
            persistent,
            max_age = %humantime::format_duration(self.config.max_age),
            purge_frequency = %humantime::format_duration(self.config.purge_frequency),
            "Starting gc agent"
        );

        self.bootstrap().await;

        let ingestor = EventIngestor::new(self.runtime.clone(), self.ledger.clone())
            .with_resubscribe_delay(self.config.resubscribe_delay);
        let scheduler = SweepScheduler::new(
            self.collector(),
            self.ledger.clone(),
            self.config.purge_frequency,
        );

        let ((), sweeps) = tokio::join!(ingestor.run(shutdown.clone()), scheduler.run(shutdown));

        info!(sweeps, "Gc agent stopped");
    }

    fn collector(&self) -> Collector {
        Collector::new(self.runtime.clone(), self.config.max_age)
    }
}
