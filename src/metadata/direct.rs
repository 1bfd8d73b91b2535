use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use super::{Metadata, MetadataResolver};
use crate::error::MetadataError;
use crate::source::SourceIdentifier;
use crate::utils::format_file_size;

/// Metadata for audio files served directly over HTTP
pub struct DirectResolver {
    client: Client,
}

impl DirectResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Title derived from the file name: extension dropped, URL decoded,
    /// separators turned into spaces
    fn title_from_url(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        let filename = parsed.path_segments()?.last()?.to_string();
        if filename.is_empty() {
            return None;
        }

        let name = match filename.rfind('.') {
            Some(dot_pos) if dot_pos > 0 => &filename[..dot_pos],
            _ => filename.as_str(),
        };

        Some(
            urlencoding::decode(name)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| name.to_string())
                .replace(['_', '-'], " "),
        )
    }
}

#[async_trait]
impl MetadataResolver for DirectResolver {
    async fn resolve(&self, source: &SourceIdentifier) -> Result<Metadata, MetadataError> {
        let url = source.canonical_url();

        let response = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| MetadataError::NetworkFailure(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(MetadataError::NotFound(format!("{} (HTTP {})", url, response.status())))
            }
            status if !status.is_success() => {
                return Err(MetadataError::NetworkFailure(format!(
                    "Failed to access URL: HTTP {}",
                    status
                )))
            }
            _ => {}
        }

        if let Some(length) = response.content_length() {
            tracing::debug!("Audio file size: {}", format_file_size(length));
        }

        // feeds and query-style URLs have no file name
        let title = Self::title_from_url(&url)
            .or_else(|| Url::parse(&url).ok()?.host_str().map(str::to_string))
            .unwrap_or_else(|| url.clone());

        Ok(Metadata {
            title,
            author: None,
            tags: Vec::new(),
            duration: None,
            url,
            chapters: Vec::new(),
        })
    }
}

impl Default for DirectResolver {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_url() {
        assert_eq!(
            DirectResolver::title_from_url("https://example.com/media/bitcoin_dev-call%2012.mp3"),
            Some("bitcoin dev call 12".to_string())
        );
        assert_eq!(DirectResolver::title_from_url("https://example.com/"), None);
    }

    #[tokio::test]
    async fn test_resolve_existing_audio() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/talks/lightning_intro.mp3")
            .with_status(200)
            .create_async()
            .await;

        let source = SourceIdentifier::Audio {
            url: format!("{}/talks/lightning_intro.mp3", server.url()),
        };
        let metadata = DirectResolver::default().resolve(&source).await.unwrap();

        mock.assert_async().await;
        assert_eq!(metadata.title, "lightning intro");
        assert!(metadata.url.ends_with("/talks/lightning_intro.mp3"));
    }

    #[tokio::test]
    async fn test_resolve_url_without_file_name() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/feed/")
            .with_status(200)
            .create_async()
            .await;

        let source = SourceIdentifier::Audio {
            url: format!("{}/feed/", server.url()),
        };
        let metadata = DirectResolver::default().resolve(&source).await.unwrap();
        assert_eq!(metadata.title, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_resolve_missing_audio_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/gone.mp3")
            .with_status(404)
            .create_async()
            .await;

        let source = SourceIdentifier::Audio {
            url: format!("{}/gone.mp3", server.url()),
        };
        let err = DirectResolver::default().resolve(&source).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/flaky.mp3")
            .with_status(503)
            .create_async()
            .await;

        let source = SourceIdentifier::Audio {
            url: format!("{}/flaky.mp3", server.url()),
        };
        let err = DirectResolver::default().resolve(&source).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
