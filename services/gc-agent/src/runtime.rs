//! Container runtime interface and mock implementation.
//!
//! The runtime interface abstracts everything the agent needs from the
//! container engine:
//! - Listing and inspecting images and containers
//! - Removing images
//! - Subscribing to lifecycle events
//!
//! The Docker Engine implementation lives in [`crate::docker`]. A mock
//! implementation is provided for testing and development.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use imagegc_events::RuntimeEvent;
use imagegc_id::{ContainerId, ImageId};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// Errors from runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The referenced image or container does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with current state (e.g. image in use).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The runtime rejected the request.
    #[error("runtime API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The runtime could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The runtime answered with something we could not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RuntimeError {
    /// Returns true if the referenced resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true if the operation conflicted with runtime state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Stream of lifecycle events. Errors are per item; the stream ending
/// means the subscription is gone.
pub type EventStream = BoxStream<'static, Result<RuntimeEvent, RuntimeError>>;

/// Filter for image listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageFilter {
    /// `Some(true)` lists only dangling images, `Some(false)` only tagged ones.
    pub dangling: Option<bool>,
}

impl ImageFilter {
    /// All top-level images.
    pub fn all() -> Self {
        Self::default()
    }

    /// Only dangling images.
    pub fn dangling() -> Self {
        Self {
            dangling: Some(true),
        }
    }

    /// Whether an image passes this filter.
    pub fn matches(&self, image: &ImageDescriptor) -> bool {
        self.dangling.map_or(true, |d| d == image.dangling)
    }
}

/// An image as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Canonical image ID.
    pub id: ImageId,
    /// Repository tags (`nginx:1.27`).
    pub tags: Vec<String>,
    /// Untagged and not a parent of any other image.
    pub dangling: bool,
}

/// Container lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    /// Parse the runtime's machine-readable state, falling back to the
    /// human-readable status line (`Exited (0) 3 hours ago`).
    pub fn parse(state: &str, status: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ if status.starts_with("Exit") => Self::Exited,
            _ if status.starts_with("Up") => Self::Running,
            _ => Self::Unknown,
        }
    }

    /// Returns true if the container's process has finished.
    pub fn is_exited(&self) -> bool {
        matches!(self, Self::Exited | Self::Dead)
    }
}

/// A container as listed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescriptor {
    /// Container ID.
    pub id: ContainerId,
    /// Image reference the container was created from (tag or ID).
    pub image_ref: String,
    /// Canonical image ID, when the runtime reports it in listings.
    pub image_id: Option<ImageId>,
    /// Lifecycle status.
    pub status: ContainerStatus,
    /// When the container exited, when known without inspection.
    pub exited_at: Option<DateTime<Utc>>,
}

/// Detailed container state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetail {
    /// Container ID.
    pub id: ContainerId,
    /// When the container's process finished, if it ever did.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Container runtime interface.
#[async_trait]
pub trait RuntimeObserver: Send + Sync {
    /// List images matching the filter.
    async fn list_images(&self, filter: ImageFilter) -> Result<Vec<ImageDescriptor>, RuntimeError>;

    /// List containers; `all` includes stopped ones.
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerDescriptor>, RuntimeError>;

    /// Resolve a tag, digest reference or (partial) ID to an image.
    async fn inspect_image(&self, reference: &str) -> Result<ImageDescriptor, RuntimeError>;

    /// Inspect a container's state.
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetail, RuntimeError>;

    /// Remove an image by ID.
    async fn remove_image(&self, id: &ImageId) -> Result<(), RuntimeError>;

    /// Subscribe to lifecycle events.
    async fn subscribe_events(&self) -> Result<EventStream, RuntimeError>;

    /// Canonical image ID of a container, inspecting its image reference
    /// when the listing did not carry it.
    async fn image_of(&self, container: &ContainerDescriptor) -> Result<ImageId, RuntimeError> {
        if let Some(id) = &container.image_id {
            return Ok(id.clone());
        }
        Ok(self.inspect_image(&container.image_ref).await?.id)
    }
}

// =============================================================================
// Mock Runtime
// =============================================================================

#[derive(Debug, Default)]
struct MockState {
    images: BTreeMap<ImageId, ImageDescriptor>,
    containers: Vec<ContainerDescriptor>,
    finished_at: BTreeMap<ContainerId, DateTime<Utc>>,
    fail_list_images: bool,
    fail_list_containers: bool,
    fail_inspect: HashSet<String>,
    fail_remove: HashSet<ImageId>,
    vanish_on_remove: HashSet<ImageId>,
    fail_subscribe: bool,
    removed: Vec<ImageId>,
    subscribers: Vec<mpsc::UnboundedSender<Result<RuntimeEvent, RuntimeError>>>,
    subscriptions: u32,
}

/// In-memory runtime for testing and development.
///
/// Behaves like the real engine where the agent depends on it: removing
/// an image still referenced by a container fails with a conflict, and
/// image references resolve by ID, tag, or ID prefix.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    /// Create an empty mock runtime.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a tagged image.
    pub fn add_image(&self, id: &ImageId, tags: &[&str]) {
        let descriptor = ImageDescriptor {
            id: id.clone(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            dangling: tags.is_empty(),
        };
        self.state().images.insert(id.clone(), descriptor);
    }

    /// Add an untagged, unreferenced image.
    pub fn add_dangling_image(&self, id: &ImageId) {
        self.add_image(id, &[]);
    }

    /// Add an untagged image that is *not* dangling (a parent layer).
    pub fn add_untagged_parent_image(&self, id: &ImageId) {
        let descriptor = ImageDescriptor {
            id: id.clone(),
            tags: Vec::new(),
            dangling: false,
        };
        self.state().images.insert(id.clone(), descriptor);
    }

    /// Add a running container.
    pub fn add_running_container(&self, id: &ContainerId, image_ref: &str) {
        self.push_container(id, image_ref, ContainerStatus::Running, None);
    }

    /// Add an exited container whose finish time is only available via inspection.
    pub fn add_exited_container(
        &self,
        id: &ContainerId,
        image_ref: &str,
        finished_at: DateTime<Utc>,
    ) {
        self.push_container(id, image_ref, ContainerStatus::Exited, None);
        self.state().finished_at.insert(id.clone(), finished_at);
    }

    /// Add a container with an explicit status.
    pub fn add_container(
        &self,
        id: &ContainerId,
        image_ref: &str,
        status: ContainerStatus,
        exited_at: Option<DateTime<Utc>>,
    ) {
        self.push_container(id, image_ref, status, exited_at);
    }

    fn push_container(
        &self,
        id: &ContainerId,
        image_ref: &str,
        status: ContainerStatus,
        exited_at: Option<DateTime<Utc>>,
    ) {
        self.state().containers.push(ContainerDescriptor {
            id: id.clone(),
            image_ref: image_ref.to_string(),
            image_id: None,
            status,
            exited_at,
        });
    }

    /// Remove a container, as `docker rm` would.
    pub fn remove_container(&self, id: &ContainerId) {
        let mut state = self.state();
        state.containers.retain(|c| &c.id != id);
        state.finished_at.remove(id);
    }

    /// Make image listings fail.
    pub fn set_fail_list_images(&self, fail: bool) {
        self.state().fail_list_images = fail;
    }

    /// Make container listings fail.
    pub fn set_fail_list_containers(&self, fail: bool) {
        self.state().fail_list_containers = fail;
    }

    /// Make `inspect_image` fail transiently for a reference.
    pub fn fail_inspect_of(&self, reference: &str) {
        self.state().fail_inspect.insert(reference.to_string());
    }

    /// Make removal of an image fail.
    pub fn fail_removal_of(&self, id: &ImageId) {
        self.state().fail_remove.insert(id.clone());
    }

    /// Make an image disappear just before its removal, as if another
    /// client deleted it between listing and removal.
    pub fn vanish_before_removal_of(&self, id: &ImageId) {
        self.state().vanish_on_remove.insert(id.clone());
    }

    /// Make event subscriptions fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.state().fail_subscribe = fail;
    }

    /// Whether the image still exists.
    pub fn has_image(&self, id: &ImageId) -> bool {
        self.state().images.contains_key(id)
    }

    /// Images removed through `remove_image`, in order.
    pub fn removed_images(&self) -> Vec<ImageId> {
        self.state().removed.clone()
    }

    /// Number of successful `subscribe_events` calls.
    pub fn subscription_count(&self) -> u32 {
        self.state().subscriptions
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: RuntimeEvent) {
        self.state()
            .subscribers
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Deliver a stream error to every live subscriber.
    pub fn emit_error(&self, message: &str) {
        self.state().subscribers.retain(|tx| {
            tx.send(Err(RuntimeError::Transport(message.to_string())))
                .is_ok()
        });
    }

    /// End every open event stream.
    pub fn close_event_streams(&self) {
        self.state().subscribers.clear();
    }

    fn resolve(state: &MockState, reference: &str) -> Option<ImageDescriptor> {
        if let Some(image) = state.images.get(reference) {
            return Some(image.clone());
        }

        if let Some(image) = state
            .images
            .values()
            .find(|i| i.tags.iter().any(|t| t == reference))
        {
            return Some(image.clone());
        }

        let prefix = reference.strip_prefix("sha256:").unwrap_or(reference);
        let mut matches = state
            .images
            .values()
            .filter(|i| i.id.digest().starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(image), None) => Some(image.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl RuntimeObserver for MockRuntime {
    async fn list_images(&self, filter: ImageFilter) -> Result<Vec<ImageDescriptor>, RuntimeError> {
        let state = self.state();
        if state.fail_list_images {
            return Err(RuntimeError::Transport("[MOCK] image listing failed".to_string()));
        }
        Ok(state
            .images
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerDescriptor>, RuntimeError> {
        let state = self.state();
        if state.fail_list_containers {
            return Err(RuntimeError::Transport(
                "[MOCK] container listing failed".to_string(),
            ));
        }
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.status == ContainerStatus::Running)
            .cloned()
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDescriptor, RuntimeError> {
        let state = self.state();
        if state.fail_inspect.contains(reference) {
            return Err(RuntimeError::Transport(format!(
                "[MOCK] inspect of {reference} failed"
            )));
        }
        Self::resolve(&state, reference)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such image: {reference}")))
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetail, RuntimeError> {
        let state = self.state();
        if !state.containers.iter().any(|c| &c.id == id) {
            return Err(RuntimeError::NotFound(format!("no such container: {id}")));
        }
        Ok(ContainerDetail {
            id: id.clone(),
            finished_at: state.finished_at.get(id).copied(),
        })
    }

    async fn remove_image(&self, id: &ImageId) -> Result<(), RuntimeError> {
        let mut state = self.state();

        if state.fail_remove.contains(id) {
            return Err(RuntimeError::Api {
                status: 500,
                message: format!("[MOCK] removal of {id} failed"),
            });
        }

        if state.vanish_on_remove.remove(id) {
            state.images.remove(id);
        }

        if !state.images.contains_key(id) {
            return Err(RuntimeError::NotFound(format!("no such image: {id}")));
        }

        let referenced = state.containers.iter().any(|c| {
            c.image_id.as_ref() == Some(id)
                || Self::resolve(&state, &c.image_ref).is_some_and(|i| &i.id == id)
        });
        if referenced {
            return Err(RuntimeError::Conflict(format!(
                "image {id} is being used by a container"
            )));
        }

        debug!(image_id = %id, "[MOCK] Removing image");
        state.images.remove(id);
        state.removed.push(id.clone());
        Ok(())
    }

    async fn subscribe_events(&self) -> Result<EventStream, RuntimeError> {
        let mut state = self.state();
        if state.fail_subscribe {
            return Err(RuntimeError::Transport("[MOCK] subscribe failed".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        state.subscriptions += 1;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
