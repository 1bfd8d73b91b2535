use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_transcribe::types::{Media, MediaFormat};
use aws_sdk_transcribe::Client as TranscribeClient;
use reqwest::Client;
use std::path::Path;
use uuid::Uuid;

use super::processor::TranscriptionProcessor;
use super::{write_body, MediaFetcher, TranscriptBody, TranscriptFile, Transcriber};
use crate::config::AwsConfig;
use crate::error::TranscriptionError;
use crate::source::SourceIdentifier;

/// Transcriber backed by AWS Transcribe, staging audio through S3
pub struct AwsTranscriber {
    config: AwsConfig,
    fetcher: MediaFetcher,
    http: Client,
    s3_client: S3Client,
    transcribe_client: TranscribeClient,
    language: Option<String>,
}

impl AwsTranscriber {
    pub async fn new(
        config: AwsConfig,
        fetcher: MediaFetcher,
        http: Client,
        language: Option<String>,
    ) -> Self {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        Self {
            s3_client: S3Client::new(&aws_config),
            transcribe_client: TranscribeClient::new(&aws_config),
            config,
            fetcher,
            http,
            language,
        }
    }

    /// Upload audio file to S3
    async fn upload_to_s3(&self, audio_path: &Path) -> Result<String, TranscriptionError> {
        let extension = audio_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_else(|| "mp3".to_string());
        let key = format!(
            "{}audio_{}_{}.{}",
            self.config.s3_key_prefix.as_deref().unwrap_or(""),
            Uuid::new_v4(),
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            extension
        );

        tracing::info!("Uploading audio to S3: s3://{}/{}", self.config.s3_bucket, key);

        let content = fs_err::read(audio_path)?;

        self.s3_client
            .put_object()
            .bucket(&self.config.s3_bucket)
            .key(&key)
            .body(content.into())
            .content_type(mime_type(&extension))
            .send()
            .await
            .map_err(|e| TranscriptionError::new(format!("Failed to upload audio to S3: {}", e)))?;

        Ok(key)
    }

    /// Start an AWS Transcribe job for the uploaded object
    async fn start_transcription_job(&self, s3_key: &str) -> Result<String, TranscriptionError> {
        let job_name = format!("contributor_{}", Uuid::new_v4());
        let media_uri = format!("s3://{}/{}", self.config.s3_bucket, s3_key);

        tracing::info!("Starting transcription job: {}", job_name);

        let extension = Path::new(s3_key)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let media = Media::builder().media_file_uri(media_uri).build();

        let mut job_builder = self
            .transcribe_client
            .start_transcription_job()
            .transcription_job_name(&job_name)
            .media_format(media_format(&extension))
            .media(media);

        match self.language.as_deref().or(self.config.default_language.as_deref()) {
            Some(lang) => {
                tracing::info!("Using specified language: {}", lang);
                job_builder = job_builder.language_code(lang.into());
            }
            None => {
                tracing::info!("Using automatic language detection");
                job_builder = job_builder.identify_language(true);
            }
        }

        job_builder
            .send()
            .await
            .map_err(|e| TranscriptionError::new(format!("Failed to start transcription job: {}", e)))?;

        Ok(job_name)
    }

    /// Clean up S3 object
    async fn cleanup_s3(&self, s3_key: &str) {
        tracing::debug!("Cleaning up S3 object: {}", s3_key);

        if let Err(e) = self
            .s3_client
            .delete_object()
            .bucket(&self.config.s3_bucket)
            .key(s3_key)
            .send()
            .await
        {
            tracing::warn!("Failed to clean up S3 object {}: {}", s3_key, e);
        }
    }
}

#[async_trait]
impl Transcriber for AwsTranscriber {
    async fn transcribe(
        &self,
        source: &SourceIdentifier,
        output_dir: &Path,
    ) -> Result<TranscriptFile, TranscriptionError> {
        let scratch = tempfile::TempDir::new()?;
        let audio_path = self.fetcher.fetch(source, scratch.path()).await?;

        let s3_key = self.upload_to_s3(&audio_path).await?;

        let result: Result<TranscriptBody, TranscriptionError> = async {
            let job_id = self.start_transcription_job(&s3_key).await?;
            TranscriptionProcessor::new(
                self.transcribe_client.clone(),
                self.http.clone(),
                job_id,
                self.config.max_segment_length,
            )
            .wait_for_completion()
            .await
        }
        .await;

        self.cleanup_s3(&s3_key).await;

        write_body(source, output_dir, &result?)
    }

    fn engine_name(&self) -> &'static str {
        "aws-transcribe"
    }
}

fn media_format(extension: &str) -> MediaFormat {
    match extension {
        "m4a" | "mp4" | "aac" => MediaFormat::Mp4,
        "wav" => MediaFormat::Wav,
        "flac" => MediaFormat::Flac,
        "ogg" => MediaFormat::Ogg,
        "webm" => MediaFormat::Webm,
        _ => MediaFormat::Mp3,
    }
}

fn mime_type(extension: &str) -> &'static str {
    match extension {
        "m4a" | "mp4" | "aac" => "audio/mp4",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        _ => "audio/mpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_format_mapping() {
        assert_eq!(media_format("wav"), MediaFormat::Wav);
        assert_eq!(media_format("m4a"), MediaFormat::Mp4);
        assert_eq!(media_format("unknown"), MediaFormat::Mp3);
        assert_eq!(mime_type("flac"), "audio/flac");
        assert_eq!(mime_type("mp3"), "audio/mpeg");
    }
}
