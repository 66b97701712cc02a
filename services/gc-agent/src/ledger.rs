//! In-memory usage ledger with optional write-through persistence.
//!
//! The ledger maps image IDs to the last time the image was known to be
//! in use. Updates are monotonic: a record only ever moves forward in
//! time. When a [`StateStore`] is attached every change is written
//! through; a failed write is logged and the in-memory value is kept, so
//! persistence problems degrade durability but never correctness.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use imagegc_id::ImageId;
use tracing::{debug, info, warn};

use crate::state::{StateStore, StateStoreError};

/// What happened to a ledger change with respect to the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Written to memory and to the store.
    Persisted,
    /// Written to memory; no store is attached.
    MemoryOnly,
    /// Written to memory; the store write failed.
    Degraded,
    /// Nothing changed.
    Unchanged,
}

impl PersistOutcome {
    /// Returns true if the in-memory ledger was modified.
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Image usage ledger.
#[derive(Debug, Default)]
pub struct UsageLedger {
    records: HashMap<ImageId, DateTime<Utc>>,
    store: Option<StateStore>,
}

impl UsageLedger {
    /// A ledger that keeps records in memory only.
    pub fn memory_only() -> Self {
        Self::default()
    }

    /// A ledger mirrored to the given store. Call
    /// [`restore_persisted`](Self::restore_persisted) to load existing rows.
    pub fn with_store(store: StateStore) -> Self {
        Self {
            records: HashMap::new(),
            store: Some(store),
        }
    }

    /// Open the store at `path`, falling back to a memory-only ledger if
    /// it cannot be opened. `None` disables persistence.
    pub fn open_or_memory(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("Persistence disabled, usage ledger is memory-only");
            return Self::memory_only();
        };

        match StateStore::open(path) {
            Ok(store) => {
                info!(path = %path.display(), "Opened usage store");
                Self::with_store(store)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Cannot open usage store, continuing without persistence"
                );
                Self::memory_only()
            }
        }
    }

    /// Returns true if a store is attached.
    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Load persisted records into memory.
    ///
    /// Persisted values never move an in-memory record backwards. Nothing
    /// is written back. Returns the number of records that changed memory.
    pub fn restore_persisted(&mut self) -> Result<usize, StateStoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut applied = 0;
        for record in store.list_usage()? {
            if Self::advance(&mut self.records, &record.image_id, record.last_used_at) {
                applied += 1;
            }
        }

        debug!(applied, "Restored persisted usage records");
        Ok(applied)
    }

    /// Last known use of an image.
    pub fn get(&self, image_id: &ImageId) -> Option<DateTime<Utc>> {
        self.records.get(image_id).copied()
    }

    /// Record a use of an image at `at`.
    ///
    /// A no-op unless `at` is strictly newer than the existing record.
    pub fn set(&mut self, image_id: &ImageId, at: DateTime<Utc>) -> PersistOutcome {
        if !Self::advance(&mut self.records, image_id, at) {
            return PersistOutcome::Unchanged;
        }

        debug!(image_id = %image_id, last_used_at = %at, "Recorded image use");
        self.persist(image_id, |store| store.put_usage(image_id, at))
    }

    /// Forget an image. Removing an unknown image is not an error; the
    /// store row is deleted regardless so stale rows cannot linger.
    pub fn delete(&mut self, image_id: &ImageId) -> PersistOutcome {
        let existed = self.records.remove(image_id).is_some();
        let outcome = self.persist(image_id, |store| store.delete_usage(image_id));

        if existed {
            debug!(image_id = %image_id, "Forgot image");
            outcome
        } else {
            PersistOutcome::Unchanged
        }
    }

    /// Number of tracked images.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no image is tracked.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// IDs of all tracked images.
    pub fn image_ids(&self) -> Vec<ImageId> {
        self.records.keys().cloned().collect()
    }

    fn advance(
        records: &mut HashMap<ImageId, DateTime<Utc>>,
        image_id: &ImageId,
        at: DateTime<Utc>,
    ) -> bool {
        match records.get_mut(image_id) {
            Some(existing) if *existing >= at => false,
            Some(existing) => {
                *existing = at;
                true
            }
            None => {
                records.insert(image_id.clone(), at);
                true
            }
        }
    }

    fn persist<F>(&self, image_id: &ImageId, write: F) -> PersistOutcome
    where
        F: FnOnce(&StateStore) -> Result<(), StateStoreError>,
    {
        let Some(store) = &self.store else {
            return PersistOutcome::MemoryOnly;
        };

        match write(store) {
            Ok(()) => PersistOutcome::Persisted,
            Err(e) => {
                warn!(image_id = %image_id, error = %e, "Failed to persist usage record");
                PersistOutcome::Degraded
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> Option<&StateStore> {
        self.store.as_ref()
    }
}
