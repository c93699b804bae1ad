// file: src/sync/mod.rs
// version: 1.0.0
// guid: 5f1c9a3e-2d84-4b76-8e0a-b93c6d7f2145

//! Provider-neutral reconciliation of remote image artifacts
//!
//! Every cloud target (COS buckets, VPC images, Glance images) is an
//! [`ImageStore`]. The [`Reconciler`] lists a store per region, computes a
//! [`SyncPlan`] against the expected artifacts and applies it, deleting
//! before creating. Only artifacts a store reports as managed are ever
//! deleted, and a store may further shield managed artifacts from orphan
//! cleanup.

pub mod plan;
pub mod reconciler;
pub mod report;
pub mod retry;

pub use plan::{SyncPlan, SyncPolicy};
pub use reconciler::Reconciler;
pub use report::{SyncAction, SyncFailure, SyncReport};
pub use retry::RetryPolicy;

use crate::image::LocalImage;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Where the content of a desired artifact comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// A patched disk image in the local tree
    Local(LocalImage),
    /// An image already published elsewhere, e.g. a catalog entry
    Remote {
        image_url: String,
        md5_url: Option<String>,
    },
}

/// An artifact that should exist in a region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredArtifact {
    pub name: String,
    pub source: ArtifactSource,
}

impl DesiredArtifact {
    pub fn local(name: impl Into<String>, image: LocalImage) -> Self {
        Self {
            name: name.into(),
            source: ArtifactSource::Local(image),
        }
    }

    pub fn remote(name: impl Into<String>, image_url: impl Into<String>, md5_url: Option<String>) -> Self {
        Self {
            name: name.into(),
            source: ArtifactSource::Remote {
                image_url: image_url.into(),
                md5_url,
            },
        }
    }
}

/// Health of a listed artifact, as judged by its store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactState {
    /// Usable as is
    #[default]
    Ready,
    /// Failed or never finished; must be replaced
    Broken,
    /// Content is fine but it is not shared the way the store requires
    Unpublished,
}

/// An artifact as listed by a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArtifact {
    pub name: String,
    /// Provider id (bucket name, image id)
    pub id: String,
    /// Whether this tool may delete or replace it
    pub managed: bool,
    /// Managed, but never deleted as an orphan or duplicate
    #[serde(default)]
    pub keep_when_orphaned: bool,
    #[serde(default)]
    pub state: ArtifactState,
    pub visibility: Option<String>,
    pub status: Option<String>,
}

impl RemoteArtifact {
    pub fn new(name: impl Into<String>, id: impl Into<String>, managed: bool) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            managed,
            keep_when_orphaned: false,
            state: ArtifactState::Ready,
            visibility: None,
            status: None,
        }
    }

    pub fn with_state(mut self, state: ArtifactState) -> Self {
        self.state = state;
        self
    }

    pub fn keep_when_orphaned(mut self, keep: bool) -> Self {
        self.keep_when_orphaned = keep;
        self
    }

    /// May be removed by orphan or duplicate cleanup
    pub fn is_disposable(&self) -> bool {
        self.managed && !self.keep_when_orphaned
    }
}

/// A remote service holding image artifacts, partitioned by region
#[async_trait::async_trait]
pub trait ImageStore: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    /// Every artifact in the region, managed or not
    async fn list(&self, region: &str) -> Result<Vec<RemoteArtifact>>;

    /// Create an artifact; returns its provider id.
    ///
    /// Called at most once per planned artifact. A store must clean up
    /// whatever it half-created before returning an error.
    async fn create(&self, region: &str, desired: &DesiredArtifact) -> Result<String>;

    /// Bring an [`ArtifactState::Unpublished`] artifact back in line
    async fn repair(&self, region: &str, artifact: &RemoteArtifact) -> Result<()> {
        let _ = region;
        Err(crate::error::ImageSyncError::validation(format!(
            "{} cannot repair {}",
            self.name(),
            artifact.name
        )))
    }

    /// Delete a managed artifact
    async fn delete(&self, region: &str, artifact: &RemoteArtifact) -> Result<()>;
}
