use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::{Chapter, Metadata, MetadataResolver};
use crate::error::MetadataError;
use crate::source::{playlist_url, SourceIdentifier};
use crate::utils::{format_duration, run_command};

/// Markers yt-dlp prints for media that does not exist or cannot be viewed
const NOT_FOUND_MARKERS: &[&str] = &[
    "video unavailable",
    "private video",
    "this video has been removed",
    "does not exist",
    "http error 404",
    "is not a valid url",
    "incomplete youtube id",
    "playlist does not exist",
];

/// YouTube metadata resolver using yt-dlp
pub struct YoutubeResolver {
    yt_dlp_path: String,
    timeout: Duration,
}

impl YoutubeResolver {
    pub fn new(yt_dlp_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            timeout,
        }
    }

    /// Get video information using yt-dlp
    async fn get_video_info(&self, url: &str) -> Result<Value, MetadataError> {
        tracing::debug!("Extracting video info for: {}", url);

        let output = run_command(
            &self.yt_dlp_path,
            &["--dump-json", "--no-playlist", "--skip-download", url],
            None,
            &[],
            self.timeout,
        )
        .await
        .map_err(|e| MetadataError::NetworkFailure(e.to_string()))?;

        if !output.success {
            return Err(classify_failure(&output.stderr));
        }

        serde_json::from_str(&output.stdout)
            .map_err(|e| MetadataError::ParseFailure(format!("yt-dlp returned invalid JSON: {}", e)))
    }
}

impl YoutubeResolver {
    /// Videos of a playlist, in playlist order
    pub async fn playlist_videos(&self, playlist_id: &str) -> Result<Vec<SourceIdentifier>, MetadataError> {
        let url = playlist_url(playlist_id);
        tracing::debug!("Listing playlist: {}", url);

        let output = run_command(
            &self.yt_dlp_path,
            &["--flat-playlist", "--dump-single-json", &url],
            None,
            &[],
            self.timeout,
        )
        .await
        .map_err(|e| MetadataError::NetworkFailure(e.to_string()))?;

        if !output.success {
            return Err(classify_failure(&output.stderr));
        }

        let info: Value = serde_json::from_str(&output.stdout)
            .map_err(|e| MetadataError::ParseFailure(format!("yt-dlp returned invalid JSON: {}", e)))?;
        let videos = parse_playlist_entries(&info)?;
        tracing::info!("Playlist {} has {} videos", playlist_id, videos.len());
        Ok(videos)
    }
}

/// Video ids listed in a flat playlist dump, duplicates removed
pub fn parse_playlist_entries(info: &Value) -> Result<Vec<SourceIdentifier>, MetadataError> {
    let entries = info["entries"]
        .as_array()
        .ok_or_else(|| MetadataError::ParseFailure("playlist has no entries".to_string()))?;

    let mut videos: Vec<SourceIdentifier> = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(id) = entry["id"].as_str() else {
            continue;
        };
        match SourceIdentifier::parse(id) {
            Ok(video @ SourceIdentifier::Video { .. }) if !videos.contains(&video) => videos.push(video),
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping playlist entry {}: {}", id, e),
        }
    }

    if videos.is_empty() {
        return Err(MetadataError::NotFound(format!(
            "playlist {} has no videos",
            info["id"].as_str().unwrap_or("?")
        )));
    }
    Ok(videos)
}

fn classify_failure(stderr: &str) -> MetadataError {
    let lower = stderr.to_lowercase();
    if NOT_FOUND_MARKERS.iter().any(|marker| lower.contains(marker)) {
        MetadataError::NotFound(stderr.trim().to_string())
    } else {
        MetadataError::NetworkFailure(format!("yt-dlp failed: {}", stderr.trim()))
    }
}

/// Map yt-dlp's JSON dump onto [`Metadata`]
pub fn parse_video_info(info: &Value, fallback_url: &str) -> Result<Metadata, MetadataError> {
    let title = info["title"]
        .as_str()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| MetadataError::ParseFailure("missing title".to_string()))?
        .to_string();

    let author = info["uploader"]
        .as_str()
        .or_else(|| info["channel"].as_str())
        .map(str::to_string);

    let tags = info["tags"]
        .as_array()
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let mut chapters: Vec<Chapter> = info["chapters"]
        .as_array()
        .map(|chapters| {
            chapters
                .iter()
                .filter_map(|c| {
                    Some(Chapter {
                        title: c["title"].as_str()?.to_string(),
                        start_time: c["start_time"].as_f64()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    chapters.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    Ok(Metadata {
        title,
        author,
        tags,
        duration: info["duration"].as_f64(),
        url: info["webpage_url"]
            .as_str()
            .unwrap_or(fallback_url)
            .to_string(),
        chapters,
    })
}

#[async_trait]
impl MetadataResolver for YoutubeResolver {
    async fn resolve(&self, source: &SourceIdentifier) -> Result<Metadata, MetadataError> {
        let url = source.canonical_url();
        let info = self.get_video_info(&url).await?;
        let metadata = parse_video_info(&info, &url)?;

        tracing::info!(
            "Resolved '{}' ({})",
            metadata.title,
            metadata
                .duration
                .map(format_duration)
                .unwrap_or_else(|| "unknown length".to_string())
        );

        Ok(metadata)
    }
}

impl Default for YoutubeResolver {
    fn default() -> Self {
        Self::new("yt-dlp", Duration::from_secs(120))
    }
}
