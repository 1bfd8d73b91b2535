use async_trait::async_trait;
use std::path::Path;

use super::{Metadata, MetadataResolver};
use crate::error::MetadataError;
use crate::source::SourceIdentifier;
use crate::utils::format_file_size;

/// Metadata for media files on local disk
#[derive(Default)]
pub struct LocalResolver;

impl LocalResolver {
    pub fn new() -> Self {
        Self
    }

    /// Check the file exists, is a regular file and is not empty
    async fn validate_file(&self, path: &Path) -> Result<u64, MetadataError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| MetadataError::NotFound(format!("{}: {}", path.display(), e)))?;

        if !metadata.is_file() {
            return Err(MetadataError::NotFound(format!("Path is not a file: {}", path.display())));
        }
        if metadata.len() == 0 {
            return Err(MetadataError::NotFound(format!("File is empty: {}", path.display())));
        }

        Ok(metadata.len())
    }
}

#[async_trait]
impl MetadataResolver for LocalResolver {
    async fn resolve(&self, source: &SourceIdentifier) -> Result<Metadata, MetadataError> {
        let path = match source {
            SourceIdentifier::Local { path } => path,
            other => {
                return Err(MetadataError::ParseFailure(format!("{} is not a local file", other)))
            }
        };

        let size = self.validate_file(path).await?;
        tracing::debug!("Local media {} ({})", path.display(), format_file_size(size));

        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().replace(['_', '-'], " "))
            .unwrap_or_else(|| "Local File".to_string());

        Ok(Metadata {
            title,
            author: None,
            tags: Vec::new(),
            duration: None,
            url: source.canonical_url(),
            chapters: Vec::new(),
        })
    }
}
