use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod aws;
pub mod processor;
pub mod whisper;

use crate::error::TranscriptionError;
use crate::source::SourceIdentifier;
use crate::utils::{format_file_size, run_command};

/// Individual transcript segment with timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in seconds
    pub start_time: f64,

    /// End time in seconds
    pub end_time: f64,

    /// Segment text
    pub text: String,
}

/// Engine-independent transcript content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptBody {
    /// The full transcribed text
    pub text: String,

    /// Segments with timestamps, in order
    pub segments: Vec<TranscriptSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptFormat {
    /// [`TranscriptBody`] serialized as JSON
    Json,
    /// Rendered markdown with front matter
    Markdown,
}

impl TranscriptFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptFormat::Json => "json",
            TranscriptFormat::Markdown => "md",
        }
    }
}

/// File produced by a [`Transcriber`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptFile {
    pub path: PathBuf,
    pub format: TranscriptFormat,
}

impl TranscriptFile {
    pub fn read_body(&self) -> Result<TranscriptBody, TranscriptionError> {
        let content = fs_err::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            TranscriptionError::new(format!(
                "Unreadable transcript {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Turns a source into a transcript file.
///
/// Implementations must be idempotent: the same source and output directory
/// always produce the same path, overwriting any earlier result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        source: &SourceIdentifier,
        output_dir: &Path,
    ) -> Result<TranscriptFile, TranscriptionError>;

    /// Name of the engine
    fn engine_name(&self) -> &'static str;
}

/// Where a transcriber writes its result for `source`
pub fn transcript_path(source: &SourceIdentifier, output_dir: &Path) -> PathBuf {
    output_dir.join(format!("{}.transcript.json", source.key()))
}

/// Write `body` to the deterministic transcript path
pub fn write_body(
    source: &SourceIdentifier,
    output_dir: &Path,
    body: &TranscriptBody,
) -> Result<TranscriptFile, TranscriptionError> {
    fs_err::create_dir_all(output_dir)?;
    let path = transcript_path(source, output_dir);
    let content = serde_json::to_string_pretty(body)
        .map_err(|e| TranscriptionError::new(format!("Failed to serialize transcript: {}", e)))?;
    fs_err::write(&path, content)?;

    Ok(TranscriptFile {
        path,
        format: TranscriptFormat::Json,
    })
}

/// Downloads the audio track of a source to local disk
#[derive(Clone)]
pub struct MediaFetcher {
    client: Client,
    yt_dlp_path: String,
    timeout: Duration,
}

impl MediaFetcher {
    pub fn new(client: Client, yt_dlp_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            yt_dlp_path: yt_dlp_path.into(),
            timeout,
        }
    }

    /// Fetch the audio for `source` into `dir`, returning the file path
    pub async fn fetch(
        &self,
        source: &SourceIdentifier,
        dir: &Path,
    ) -> Result<PathBuf, TranscriptionError> {
        fs_err::create_dir_all(dir)?;
        match source {
            SourceIdentifier::Video { .. } => {
                let audio_path = dir.join(format!("{}.mp3", source.key()));
                self.download_video_audio(&source.canonical_url(), &audio_path)
                    .await?;
                Ok(audio_path)
            }
            SourceIdentifier::Audio { url } => {
                let extension = Path::new(url)
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase())
                    .filter(|ext| ext.len() <= 4)
                    .unwrap_or_else(|| "mp3".to_string());
                let audio_path = dir.join(format!("{}.{}", source.key(), extension));
                self.download_url(url, &audio_path).await?;
                Ok(audio_path)
            }
            SourceIdentifier::Local { path } => {
                // engines clean up their scratch directory, so work on a copy
                let extension = path
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase())
                    .unwrap_or_else(|| "mp3".to_string());
                let audio_path = dir.join(format!("{}.{}", source.key(), extension));
                tracing::info!("Copying {} to {}", path.display(), audio_path.display());
                fs_err::copy(path, &audio_path)?;
                Ok(audio_path)
            }
        }
    }

    /// Let yt-dlp extract the audio track directly
    async fn download_video_audio(&self, url: &str, output_path: &Path) -> Result<(), TranscriptionError> {
        tracing::info!("Downloading audio with yt-dlp: {}", url);

        let progress = spinner("Downloading audio with yt-dlp...");
        let output_template = output_path.with_extension("%(ext)s");
        let output_template = output_template.to_string_lossy();

        let output = run_command(
            &self.yt_dlp_path,
            &[
                "--output",
                &output_template,
                "--extract-audio",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "9",
                "--format",
                "worstaudio[acodec^=mp4a]/worstaudio[ext=m4a]/worstaudio[ext=mp3]/worstaudio",
                "--no-playlist",
                "--concurrent-fragments",
                "4",
                "--force-overwrites",
                url,
            ],
            None,
            &[],
            self.timeout,
        )
        .await
        .map_err(|e| TranscriptionError::new(e.to_string()))?;

        if !output.success {
            progress.finish_with_message("Download failed");
            return Err(TranscriptionError::new(format!(
                "Failed to download audio: {}",
                output.stderr.trim()
            )));
        }

        progress.finish_with_message("Download complete");
        Ok(())
    }

    /// Stream an audio file over HTTP with a progress bar
    async fn download_url(&self, url: &str, output_path: &Path) -> Result<(), TranscriptionError> {
        tracing::info!("Downloading audio to: {}", output_path.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TranscriptionError::new(format!("Failed to download audio: {}", e)))?;

        if !response.status().is_success() {
            return Err(TranscriptionError::new(format!(
                "Failed to download audio: HTTP {}",
                response.status()
            )));
        }

        let total_size = response.content_length().unwrap_or(0);
        let progress = ProgressBar::new(total_size);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        progress.set_message("Downloading audio...");

        let mut file = fs_err::File::create(output_path)?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| TranscriptionError::new(format!("Download interrupted: {}", e)))?;
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            progress.set_position(downloaded);
        }

        progress.finish_with_message("Download complete");
        tracing::debug!("Downloaded {}", format_file_size(downloaded));

        Ok(())
    }
}

/// Spinner used while waiting on long-running work
pub(crate) fn spinner(message: &'static str) -> ProgressBar {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.set_message(message);
    progress.enable_steady_tick(Duration::from_millis(120));
    progress
}
