//! # imagegc-events
//!
//! Container runtime lifecycle events as consumed by imagegc.
//!
//! ## Design Principles
//!
//! - Events are observations, not commands: consumers decide what to do
//! - The time an event was *observed* is recorded separately from the
//!   time the runtime claims it *occurred*; ordering decisions use the
//!   former
//! - Unknown actions are preserved as [`EventKind::Other`] rather than
//!   rejected, so new runtime versions never break the stream
//!
//! ## Wire Format
//!
//! The runtime streams one JSON [`EventMessage`] per line. Each message is
//! decoded and converted into a [`RuntimeEvent`]:
//!
//! ```text
//! {"Type":"container","Action":"destroy","Actor":{"ID":"d3adb33f","Attributes":{"image":"nginx:1.27"}},"timeNano":1700000000000000000}
//!   -> RuntimeEvent { kind: ContainerDestroyed, resource_ref: "d3adb33f", image_ref: Some("nginx:1.27"), .. }
//! ```

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
