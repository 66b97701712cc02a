//! # imagegc-id
//!
//! Typed identifiers for container runtime resources.
//!
//! ## Design Principles
//!
//! - Identifiers are assigned by the container runtime; we never mint them
//! - Image identifiers name image *content*, never a mutable tag
//! - Identifiers are typed so an image ID cannot be passed where a
//!   container ID is expected
//! - Parsing is strict: empty strings, whitespace and control characters
//!   are rejected
//!
//! ## Formats
//!
//! Identifiers are opaque strings as reported by the runtime:
//! - `sha256:4bcff63911fcb4448bd4fdacec207030997caf25e9bea4045fa6c8c44de311d1`
//! - `d3adb33fcafe0123456789abcdef0123456789abcdef0123456789abcdef0123`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
