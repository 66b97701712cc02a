//! Runtime event kinds and the normalized event record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Action Constants
// =============================================================================

/// Resource type names as reported by the runtime.
pub mod resource_types {
    pub const CONTAINER: &str = "container";
    pub const IMAGE: &str = "image";
}

/// Action names as reported by the runtime.
pub mod actions {
    // Container
    pub const CONTAINER_CREATE: &str = "create";
    pub const CONTAINER_START: &str = "start";
    pub const CONTAINER_DIE: &str = "die";
    pub const CONTAINER_DESTROY: &str = "destroy";

    // Image
    pub const IMAGE_DELETE: &str = "delete";
}

// =============================================================================
// Event Kind
// =============================================================================

/// Normalized kind of a runtime lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A container was created.
    ContainerCreated,
    /// A container started.
    ContainerStarted,
    /// A container's main process exited.
    ContainerDied,
    /// A container was removed.
    ContainerDestroyed,
    /// An image was removed.
    ImageDeleted,
    /// Any other `<type>.<action>` pair.
    Other(String),
}

impl EventKind {
    /// Classify a runtime `(type, action)` pair.
    ///
    /// Actions may carry a suffix after a colon (e.g. `exec_start: sh`);
    /// only the part before the colon is matched.
    pub fn from_action(resource_type: &str, action: &str) -> Self {
        let verb = action.split(':').next().unwrap_or(action).trim();

        match (resource_type, verb) {
            (resource_types::CONTAINER, actions::CONTAINER_CREATE) => Self::ContainerCreated,
            (resource_types::CONTAINER, actions::CONTAINER_START) => Self::ContainerStarted,
            (resource_types::CONTAINER, actions::CONTAINER_DIE) => Self::ContainerDied,
            (resource_types::CONTAINER, actions::CONTAINER_DESTROY) => Self::ContainerDestroyed,
            (resource_types::IMAGE, actions::IMAGE_DELETE) => Self::ImageDeleted,
            _ => Self::Other(format!("{resource_type}.{verb}")),
        }
    }

    /// Returns true for events that concern containers.
    pub fn is_container_event(&self) -> bool {
        matches!(
            self,
            Self::ContainerCreated
                | Self::ContainerStarted
                | Self::ContainerDied
                | Self::ContainerDestroyed
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::ContainerCreated => write!(f, "container.create"),
            EventKind::ContainerStarted => write!(f, "container.start"),
            EventKind::ContainerDied => write!(f, "container.die"),
            EventKind::ContainerDestroyed => write!(f, "container.destroy"),
            EventKind::ImageDeleted => write!(f, "image.delete"),
            EventKind::Other(s) => write!(f, "{}", s),
        }
    }
}

// =============================================================================
// Runtime Event
// =============================================================================

/// A normalized runtime lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    /// What happened.
    pub kind: EventKind,

    /// The resource the event is about (container or image ID).
    pub resource_ref: String,

    /// Image reference attached to container events.
    ///
    /// May be a tag (`nginx:1.27`), a digest reference, or a (partial)
    /// image ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,

    /// When the runtime says the event occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,

    /// When this process received the event.
    pub observed_at: DateTime<Utc>,
}

impl RuntimeEvent {
    /// Create an event observed now.
    pub fn new(kind: EventKind, resource_ref: impl Into<String>) -> Self {
        Self {
            kind,
            resource_ref: resource_ref.into(),
            image_ref: None,
            occurred_at: None,
            observed_at: Utc::now(),
        }
    }

    /// Shorthand for a `container.destroy` event carrying its image reference.
    pub fn container_destroyed(
        container_ref: impl Into<String>,
        image_ref: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::ContainerDestroyed, container_ref).with_image_ref(image_ref)
    }

    /// Attach an image reference.
    pub fn with_image_ref(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    /// Returns true if this event reports a container being removed.
    pub fn is_container_destroyed(&self) -> bool {
        self.kind == EventKind::ContainerDestroyed
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_action_container() {
        assert_eq!(
            EventKind::from_action("container", "destroy"),
            EventKind::ContainerDestroyed
        );
        assert_eq!(
            EventKind::from_action("container", "die"),
            EventKind::ContainerDied
        );
        assert_eq!(
            EventKind::from_action("image", "delete"),
            EventKind::ImageDeleted
        );
    }

    #[test]
    fn test_from_action_strips_suffix() {
        assert_eq!(
            EventKind::from_action("container", "exec_start: sh -c true"),
            EventKind::Other("container.exec_start".to_string())
        );
    }

    #[test]
    fn test_destroy_on_image_is_not_container_destroyed() {
        let kind = EventKind::from_action("image", "destroy");
        assert_eq!(kind, EventKind::Other("image.destroy".to_string()));
        assert!(!kind.is_container_event());
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::ContainerDestroyed.to_string(), "container.destroy");
        assert_eq!(
            EventKind::Other("network.connect".to_string()).to_string(),
            "network.connect"
        );
    }

    #[test]
    fn test_event_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&EventKind::ContainerDestroyed).unwrap(),
            "\"container_destroyed\""
        );
    }

    #[test]
    fn test_container_destroyed_builder() {
        let event = RuntimeEvent::container_destroyed("d3adb33f", "nginx:1.27");
        assert!(event.is_container_destroyed());
        assert_eq!(event.image_ref.as_deref(), Some("nginx:1.27"));
        assert!(event.occurred_at.is_none());
    }
}
