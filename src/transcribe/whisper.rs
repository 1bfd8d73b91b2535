use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::{spinner, write_body, MediaFetcher, TranscriptBody, TranscriptFile, TranscriptSegment, Transcriber};
use crate::error::TranscriptionError;
use crate::source::SourceIdentifier;
use crate::utils::run_command;

/// Output of `whisper --output_format json`
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Transcriber running the local `whisper` CLI
pub struct WhisperTranscriber {
    binary: String,
    model: String,
    language: Option<String>,
    fetcher: MediaFetcher,
    timeout: Duration,
}

impl WhisperTranscriber {
    pub fn new(
        binary: impl Into<String>,
        model: impl Into<String>,
        language: Option<String>,
        fetcher: MediaFetcher,
        timeout: Duration,
    ) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            language,
            fetcher,
            timeout,
        }
    }
}

/// Convert whisper's JSON output into a [`TranscriptBody`]
pub fn parse_whisper_output(json: &str) -> Result<TranscriptBody, TranscriptionError> {
    let output: WhisperOutput = serde_json::from_str(json)
        .map_err(|e| TranscriptionError::new(format!("Failed to parse whisper output: {}", e)))?;

    Ok(TranscriptBody {
        text: output.text.trim().to_string(),
        segments: output
            .segments
            .into_iter()
            .map(|s| TranscriptSegment {
                start_time: s.start,
                end_time: s.end,
                text: s.text.trim().to_string(),
            })
            .collect(),
    })
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        source: &SourceIdentifier,
        output_dir: &Path,
    ) -> Result<TranscriptFile, TranscriptionError> {
        let scratch = tempfile::TempDir::new()?;
        let audio_path = self.fetcher.fetch(source, scratch.path()).await?;
        let audio = audio_path.to_string_lossy();
        let scratch_dir = scratch.path().to_string_lossy();

        let mut args = vec![
            audio.as_ref(),
            "--model",
            self.model.as_str(),
            "--output_format",
            "json",
            "--output_dir",
            scratch_dir.as_ref(),
        ];
        if let Some(language) = self.language.as_deref() {
            args.extend(["--language", language]);
        }

        tracing::info!("Transcribing with whisper model '{}'", self.model);
        let progress = spinner("Transcribing with whisper...");

        let output = run_command(&self.binary, &args, None, &[], self.timeout)
            .await
            .map_err(|e| TranscriptionError::new(e.to_string()))?;

        if !output.success {
            progress.finish_with_message("Transcription failed");
            return Err(TranscriptionError::new(format!(
                "whisper failed: {}",
                output.stderr.trim()
            )));
        }
        progress.finish_with_message("Transcription completed!");

        let json_path = audio_path.with_extension("json");
        let json = fs_err::read_to_string(&json_path)?;
        let body = parse_whisper_output(&json)?;

        write_body(source, output_dir, &body)
    }

    fn engine_name(&self) -> &'static str {
        "whisper"
    }
}
