//! Typed ID definitions for runtime resources.

use crate::define_id;

// =============================================================================
// Images
// =============================================================================

define_id!(ImageId, "image");

impl ImageId {
    /// Returns true if this ID carries a `sha256:` content digest.
    #[must_use]
    pub fn is_content_addressed(&self) -> bool {
        self.as_str().starts_with("sha256:")
    }
}

// =============================================================================
// Containers
// =============================================================================

define_id!(ContainerId, "container");

// =============================================================================
// Tests
// =============================================================================
