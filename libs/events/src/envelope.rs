//! Event envelope - the runtime's wire representation of an event.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::types::{resource_types, EventKind, RuntimeEvent};

/// The object that triggered an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActor {
    /// Resource ID (container ID, image ID, ...).
    #[serde(rename = "ID", default)]
    pub id: String,

    /// Free-form attributes (`image`, `name`, labels, ...).
    #[serde(rename = "Attributes", default)]
    pub attributes: HashMap<String, String>,
}

/// One event message as streamed by the runtime's events endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Resource type (`container`, `image`, `network`, ...).
    #[serde(rename = "Type", default)]
    pub resource_type: String,

    /// Action name (`destroy`, `die`, `delete`, ...).
    #[serde(rename = "Action", default)]
    pub action: String,

    /// The resource the event is about.
    #[serde(rename = "Actor", default)]
    pub actor: EventActor,

    /// Legacy image reference for container events.
    #[serde(rename = "from", default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Unix time in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,

    /// Unix time in nanoseconds.
    #[serde(rename = "timeNano", default, skip_serializing_if = "Option::is_none")]
    pub time_nano: Option<i64>,
}

impl EventMessage {
    /// Decode a single JSON line.
    pub fn from_json_line(line: &[u8]) -> Result<Self, EventError> {
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            return Err(EventError::Empty);
        }

        let message: EventMessage = serde_json::from_slice(trimmed)?;
        if message.resource_type.is_empty() || message.action.is_empty() {
            return Err(EventError::InvalidPayload(
                "missing Type or Action".to_string(),
            ));
        }
        Ok(message)
    }

    /// When the runtime says the event occurred.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        if let Some(nanos) = self.time_nano {
            return Some(Utc.timestamp_nanos(nanos));
        }
        self.time
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// The image reference for container events.
    ///
    /// Prefers the `image` attribute and falls back to the legacy `from`
    /// field.
    pub fn image_ref(&self) -> Option<&str> {
        if self.resource_type != resource_types::CONTAINER {
            return None;
        }
        self.actor
            .attributes
            .get("image")
            .map(String::as_str)
            .or(self.from.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Normalize into a [`RuntimeEvent`] observed at `observed_at`.
    pub fn into_runtime_event(self, observed_at: DateTime<Utc>) -> RuntimeEvent {
        let kind = EventKind::from_action(&self.resource_type, &self.action);
        let image_ref = self.image_ref().map(str::to_string);
        let occurred_at = self.occurred_at();

        RuntimeEvent {
            kind,
            resource_ref: self.actor.id,
            image_ref,
            occurred_at,
            observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESTROY: &str = r#"{"status":"destroy","id":"d3adb33f","from":"nginx:1.27","Type":"container","Action":"destroy","Actor":{"ID":"d3adb33f","Attributes":{"image":"nginx:1.27","name":"web"}},"scope":"local","time":1700000000,"timeNano":1700000000123456789}"#;

    #[test]
    fn test_decode_destroy_event() {
        let message = EventMessage::from_json_line(DESTROY.as_bytes()).unwrap();
        assert_eq!(message.resource_type, "container");
        assert_eq!(message.action, "destroy");
        assert_eq!(message.actor.id, "d3adb33f");
        assert_eq!(message.image_ref(), Some("nginx:1.27"));
    }

    #[test]
    fn test_into_runtime_event() {
        let observed = Utc::now();
        let event = EventMessage::from_json_line(DESTROY.as_bytes())
            .unwrap()
            .into_runtime_event(observed);

        assert_eq!(event.kind, EventKind::ContainerDestroyed);
        assert_eq!(event.resource_ref, "d3adb33f");
        assert_eq!(event.image_ref.as_deref(), Some("nginx:1.27"));
        assert_eq!(event.observed_at, observed);
        assert_eq!(
            event.occurred_at.unwrap().timestamp_nanos_opt(),
            Some(1_700_000_000_123_456_789)
        );
    }

    #[test]
    fn test_occurred_at_falls_back_to_seconds() {
        let message = EventMessage {
            time: Some(1_700_000_000),
            ..Default::default()
        };
        assert_eq!(message.occurred_at().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_legacy_from_field() {
        let line = r#"{"Type":"container","Action":"destroy","from":"redis:7","Actor":{"ID":"abc"}}"#;
        let message = EventMessage::from_json_line(line.as_bytes()).unwrap();
        assert_eq!(message.image_ref(), Some("redis:7"));
    }

    #[test]
    fn test_image_event_has_no_image_ref() {
        let line = r#"{"Type":"image","Action":"delete","Actor":{"ID":"sha256:abc","Attributes":{"image":"x"}}}"#;
        let event = EventMessage::from_json_line(line.as_bytes())
            .unwrap()
            .into_runtime_event(Utc::now());
        assert_eq!(event.kind, EventKind::ImageDeleted);
        assert!(event.image_ref.is_none());
    }

    #[test]
    fn test_empty_line_rejected() {
        assert!(matches!(
            EventMessage::from_json_line(b"  \n"),
            Err(EventError::Empty)
        ));
    }

    #[test]
    fn test_missing_action_rejected() {
        let result = EventMessage::from_json_line(br#"{"Type":"container"}"#);
        assert!(matches!(result, Err(EventError::InvalidPayload(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        let result = EventMessage::from_json_line(b"not json");
        assert!(matches!(result, Err(EventError::Serialization(_))));
    }
}
