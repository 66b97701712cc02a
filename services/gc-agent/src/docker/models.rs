//! Docker Engine API response types.
//!
//! Only the fields the agent reads are modelled; everything else in the
//! responses is ignored.

use chrono::{DateTime, Datelike, Utc};
use imagegc_id::{ContainerId, ImageId};
use serde::Deserialize;

use crate::runtime::{ContainerDescriptor, ContainerDetail, ContainerStatus, ImageDescriptor, RuntimeError};

/// Tag Docker reports for an untagged image.
const NONE_TAG: &str = "<none>:<none>";

/// Entry of `GET /images/json`, also the subset of `GET /images/{name}/json` we use.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageSummary {
    pub id: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
}

impl ImageSummary {
    /// Real repository tags, without Docker's `<none>:<none>` placeholder.
    pub fn tags(&self) -> Vec<String> {
        self.repo_tags
            .iter()
            .flatten()
            .filter(|t| t.as_str() != NONE_TAG)
            .cloned()
            .collect()
    }

    /// Convert into a descriptor. `dangling` overrides the tag-based guess
    /// when the listing was filtered on it.
    pub fn into_descriptor(self, dangling: Option<bool>) -> Result<ImageDescriptor, RuntimeError> {
        let tags = self.tags();
        let id = ImageId::parse(&self.id)
            .map_err(|e| RuntimeError::InvalidResponse(format!("image ID {:?}: {e}", self.id)))?;
        Ok(ImageDescriptor {
            id,
            dangling: dangling.unwrap_or(tags.is_empty()),
            tags,
        })
    }
}

/// Entry of `GET /containers/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    pub id: String,
    #[serde(default)]
    pub image: String,
    #[serde(rename = "ImageID", default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub status: String,
}

impl ContainerSummary {
    pub fn into_descriptor(self) -> Result<ContainerDescriptor, RuntimeError> {
        let id = ContainerId::parse(&self.id)
            .map_err(|e| RuntimeError::InvalidResponse(format!("container ID {:?}: {e}", self.id)))?;
        let image_id = self
            .image_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|s| ImageId::parse(s).ok());

        Ok(ContainerDescriptor {
            id,
            image_ref: self.image,
            image_id,
            status: ContainerStatus::parse(&self.state, &self.status),
            // Listings carry no exit time; it comes from inspection
            exited_at: None,
        })
    }
}

/// Response of `GET /containers/{id}/json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerInspect {
    pub id: String,
    #[serde(default)]
    pub state: ContainerState,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub finished_at: Option<String>,
}

impl ContainerInspect {
    pub fn into_detail(self) -> Result<ContainerDetail, RuntimeError> {
        let id = ContainerId::parse(&self.id)
            .map_err(|e| RuntimeError::InvalidResponse(format!("container ID {:?}: {e}", self.id)))?;
        Ok(ContainerDetail {
            id,
            finished_at: self.state.finished_at.as_deref().and_then(parse_docker_time),
        })
    }
}

/// Error body returned by the Engine API.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Parse a Docker timestamp. Docker reports "never" as the zero time
/// `0001-01-01T00:00:00Z`, which maps to `None`.
pub fn parse_docker_time(value: &str) -> Option<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(value).ok()?.with_timezone(&Utc);
    (ts.year() > 1).then_some(ts)
}
