//! Local state persistence for the gc agent.
//!
//! This module provides SQLite-based storage for image usage records:
//! one row per image ID holding the last time the image was known to be
//! in use.
//!
//! The store lets the agent keep usage history across restarts. It is
//! strictly a mirror of the in-memory ledger; the agent keeps working
//! without it.

mod store;

pub use store::{StateStore, StateStoreError, UsageRecord};
