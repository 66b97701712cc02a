//! imagegc Agent Library
//!
//! The gc agent runs on a container host and reclaims images that no
//! container references and that have not been used for longer than a
//! retention window.
//!
//! ## Architecture
//!
//! ```text
//! GcAgent
//! ├── Bootstrapper    (startup reconciliation against the runtime)
//! ├── EventIngestor   (container destroy events -> ledger)
//! └── SweepScheduler  (periodic Collector runs)
//!         └── Collector (dangling + age-based eviction)
//! ```
//!
//! All components share one [`UsageLedger`] behind an async mutex. The
//! runtime is injected as an `Arc<dyn RuntimeObserver>`.
//!
//! ## Modules
//!
//! - `docker`: Docker Engine API runtime
//! - `ledger`: In-memory usage ledger with write-through persistence
//! - `state`: Local SQLite state persistence

pub mod agent;
pub mod bootstrap;
pub mod collector;
pub mod config;
pub mod docker;
pub mod ingest;
pub mod ledger;
pub mod runtime;
pub mod scheduler;
pub mod state;

// Re-export commonly used types
pub use agent::GcAgent;
pub use bootstrap::{BootstrapReport, Bootstrapper};
pub use collector::{Collector, SweepReport};
pub use config::{AgentConfig, Args, LogFormat};
pub use docker::DockerClient;
pub use ingest::{EventIngestor, IngestOutcome};
pub use ledger::{PersistOutcome, UsageLedger};
pub use runtime::{MockRuntime, RuntimeError, RuntimeObserver};
pub use scheduler::SweepScheduler;
