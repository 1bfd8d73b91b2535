use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod direct;
pub mod local;
pub mod youtube;

use crate::error::MetadataError;
use crate::source::SourceIdentifier;

/// Descriptive information about a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,

    /// Uploader or channel name
    pub author: Option<String>,

    /// Tags published with the source
    pub tags: Vec<String>,

    /// Duration in seconds
    pub duration: Option<f64>,

    /// Canonical URL of the media
    pub url: String,

    /// Chapter markers, ordered by start time
    pub chapters: Vec<Chapter>,
}

/// A titled section of the source starting at `start_time` seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_time: f64,
}

/// Trait for resolving metadata of a source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, source: &SourceIdentifier) -> Result<Metadata, MetadataError>;
}

/// Dispatches to the resolver matching the source kind
pub struct SourceMetadataResolver {
    youtube: youtube::YoutubeResolver,
    direct: direct::DirectResolver,
    local: local::LocalResolver,
}

impl SourceMetadataResolver {
    pub fn new(youtube: youtube::YoutubeResolver, direct: direct::DirectResolver) -> Self {
        Self {
            youtube,
            direct,
            local: local::LocalResolver::new(),
        }
    }
}

#[async_trait]
impl MetadataResolver for SourceMetadataResolver {
    async fn resolve(&self, source: &SourceIdentifier) -> Result<Metadata, MetadataError> {
        match source {
            SourceIdentifier::Video { .. } => self.youtube.resolve(source).await,
            SourceIdentifier::Audio { .. } => self.direct.resolve(source).await,
            SourceIdentifier::Local { .. } => self.local.resolve(source).await,
        }
    }
}
