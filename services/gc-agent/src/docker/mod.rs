//! Docker Engine runtime.
//!
//! Implements [`RuntimeObserver`] against a local Docker daemon:
//!
//! - `api` - HTTP over the daemon's Unix socket
//! - `models` - response types for the endpoints we call
//! - `stream` - incremental decoding of the `/events` stream

mod api;
mod models;
mod stream;

use std::path::Path;

use async_trait::async_trait;
use imagegc_id::{ContainerId, ImageId};
use serde_json::json;
use tracing::debug;

pub use api::DockerApi;
pub use models::parse_docker_time;
pub use stream::{decode_event_stream, LineDecoder};

use crate::runtime::{
    ContainerDescriptor, ContainerDetail, EventStream, ImageDescriptor, ImageFilter, RuntimeError,
    RuntimeObserver,
};
use api::{encode_path, encode_query};
use models::{ContainerInspect, ContainerSummary, ImageSummary};

/// Runtime backed by the Docker Engine API.
#[derive(Debug)]
pub struct DockerClient {
    api: DockerApi,
}

impl DockerClient {
    /// Create a client for the daemon listening on `socket_path`.
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            api: DockerApi::new(socket_path),
        }
    }

    /// Check that the daemon is reachable.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.api.ping().await?;
        debug!(socket = %self.api.socket_path(), "Docker daemon reachable");
        Ok(())
    }
}

#[async_trait]
impl RuntimeObserver for DockerClient {
    async fn list_images(&self, filter: ImageFilter) -> Result<Vec<ImageDescriptor>, RuntimeError> {
        let path = match filter.dangling {
            Some(dangling) => {
                let filters = json!({ "dangling": [dangling.to_string()] });
                format!("/images/json?filters={}", encode_query(&filters.to_string()))
            }
            None => "/images/json".to_string(),
        };

        let summaries: Vec<ImageSummary> = self.api.get(&path).await?;
        summaries
            .into_iter()
            .map(|s| s.into_descriptor(filter.dangling))
            .collect()
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerDescriptor>, RuntimeError> {
        let path = if all {
            "/containers/json?all=1"
        } else {
            "/containers/json"
        };

        let summaries: Vec<ContainerSummary> = self.api.get(path).await?;
        summaries
            .into_iter()
            .map(ContainerSummary::into_descriptor)
            .collect()
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDescriptor, RuntimeError> {
        let path = format!("/images/{}/json", encode_path(reference));
        let summary: ImageSummary = self.api.get(&path).await?;
        summary.into_descriptor(None)
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerDetail, RuntimeError> {
        let path = format!("/containers/{}/json", encode_path(id.as_str()));
        let inspect: ContainerInspect = self.api.get(&path).await?;
        inspect.into_detail()
    }

    async fn remove_image(&self, id: &ImageId) -> Result<(), RuntimeError> {
        let path = format!("/images/{}", encode_path(id.as_str()));
        self.api.delete(&path).await
    }

    async fn subscribe_events(&self) -> Result<EventStream, RuntimeError> {
        let filters = json!({ "type": ["container"] });
        let path = format!("/events?filters={}", encode_query(&filters.to_string()));
        let body = self.api.stream(&path).await?;
        Ok(decode_event_stream(body))
    }
}
