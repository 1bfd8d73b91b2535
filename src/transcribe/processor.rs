use aws_sdk_transcribe::types::{TranscriptionJob, TranscriptionJobStatus};
use aws_sdk_transcribe::Client as TranscribeClient;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;

use super::{spinner, TranscriptBody, TranscriptSegment};
use crate::error::TranscriptionError;

/// Silence between words that forces a new segment, in seconds
const SEGMENT_GAP: f64 = 1.0;

/// AWS Transcribe transcript format
#[derive(Debug, Deserialize)]
pub(crate) struct AwsTranscript {
    results: TranscriptResults,
}

#[derive(Debug, Deserialize)]
struct TranscriptResults {
    transcripts: Vec<TranscriptText>,
    items: Vec<TranscriptItem>,
}

#[derive(Debug, Deserialize)]
struct TranscriptText {
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptItem {
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(rename = "type")]
    item_type: String,
    alternatives: Vec<Alternative>,
    speaker_label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    content: String,
}

/// Transcription job processor
pub struct TranscriptionProcessor {
    client: TranscribeClient,
    http: Client,
    job_id: String,
    max_segment_length: f64,
}

impl TranscriptionProcessor {
    pub fn new(client: TranscribeClient, http: Client, job_id: String, max_segment_length: f64) -> Self {
        Self {
            client,
            http,
            job_id,
            max_segment_length,
        }
    }

    /// Wait for transcription job completion with progress tracking
    pub async fn wait_for_completion(&self) -> Result<TranscriptBody, TranscriptionError> {
        let progress = spinner("Starting transcription job...");
        let start_time = std::time::Instant::now();
        let mut check_count: u64 = 0;

        loop {
            check_count += 1;

            let job = self.get_transcription_job().await?;

            match job.transcription_job_status() {
                Some(TranscriptionJobStatus::InProgress) | Some(TranscriptionJobStatus::Queued) => {
                    progress.set_message(format!(
                        "Transcribing... ({}s elapsed, check #{})",
                        start_time.elapsed().as_secs(),
                        check_count
                    ));

                    // Back off up to 30 seconds between checks
                    let wait_time = std::cmp::min(5 + (check_count - 1) * 2, 30);
                    sleep(Duration::from_secs(wait_time)).await;
                }
                Some(TranscriptionJobStatus::Completed) => {
                    progress.finish_with_message("Transcription completed!");
                    return self.process_transcription_result(&job).await;
                }
                Some(TranscriptionJobStatus::Failed) => {
                    progress.finish_with_message("Transcription failed");
                    let failure_reason = job.failure_reason().unwrap_or("Unknown error");
                    return Err(TranscriptionError::new(format!(
                        "Transcription job failed: {}",
                        failure_reason
                    )));
                }
                _ => {
                    progress.finish_with_message("Transcription status unknown");
                    return Err(TranscriptionError::new("Unexpected transcription job status"));
                }
            }
        }
    }

    /// Get transcription job details
    async fn get_transcription_job(&self) -> Result<TranscriptionJob, TranscriptionError> {
        let response = self
            .client
            .get_transcription_job()
            .transcription_job_name(&self.job_id)
            .send()
            .await
            .map_err(|e| TranscriptionError::new(format!("Failed to get transcription job status: {}", e)))?;

        response
            .transcription_job()
            .cloned()
            .ok_or_else(|| TranscriptionError::new("Transcription job not found"))
    }

    /// Download and convert the result of a completed job
    async fn process_transcription_result(
        &self,
        job: &TranscriptionJob,
    ) -> Result<TranscriptBody, TranscriptionError> {
        let transcript_uri = job
            .transcript()
            .and_then(|t| t.transcript_file_uri())
            .ok_or_else(|| TranscriptionError::new("No transcript URI found"))?;

        let response = self
            .http
            .get(transcript_uri)
            .send()
            .await
            .map_err(|e| TranscriptionError::new(format!("Failed to download transcript: {}", e)))?;

        if !response.status().is_success() {
            return Err(TranscriptionError::new(format!(
                "Failed to download transcript: HTTP {}",
                response.status()
            )));
        }

        let transcript_json = response
            .text()
            .await
            .map_err(|e| TranscriptionError::new(format!("Failed to read transcript content: {}", e)))?;

        parse_transcript(&transcript_json, self.max_segment_length)
    }
}

/// Convert AWS Transcribe's result JSON into a [`TranscriptBody`]
pub fn parse_transcript(json: &str, max_segment_length: f64) -> Result<TranscriptBody, TranscriptionError> {
    let aws_transcript: AwsTranscript = serde_json::from_str(json)
        .map_err(|e| TranscriptionError::new(format!("Failed to parse transcript JSON: {}", e)))?;

    let text = aws_transcript
        .results
        .transcripts
        .first()
        .map(|t| t.transcript.clone())
        .unwrap_or_default();

    Ok(TranscriptBody {
        text,
        segments: group_segments(&aws_transcript.results.items, max_segment_length),
    })
}

/// Group pronunciation items into segments, splitting on speaker change, on
/// a pause, or once a segment grows past `max_segment_length` seconds
fn group_segments(items: &[TranscriptItem], max_segment_length: f64) -> Vec<TranscriptSegment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut start: Option<f64> = None;
    let mut end: Option<f64> = None;
    let mut speaker: Option<&str> = None;

    for item in items {
        let content = match item.alternatives.first() {
            Some(alt) => alt.content.as_str(),
            None => continue,
        };

        if item.item_type == "punctuation" {
            text.push_str(content);
            continue;
        }

        let item_start = item.start_time.as_deref().and_then(|s| s.parse::<f64>().ok());
        let item_end = item.end_time.as_deref().and_then(|s| s.parse::<f64>().ok());

        let speaker_changed = speaker != item.speaker_label.as_deref();
        let gap = item_start
            .zip(end)
            .map(|(s, e)| s - e > SEGMENT_GAP)
            .unwrap_or(false);
        let too_long = start
            .zip(item_start)
            .map(|(seg_start, current)| current - seg_start > max_segment_length)
            .unwrap_or(false);

        if !text.is_empty() && (speaker_changed || gap || too_long) {
            if let (Some(s), Some(e)) = (start, end) {
                segments.push(TranscriptSegment {
                    start_time: s,
                    end_time: e,
                    text: text.trim().to_string(),
                });
            }
            text.clear();
            start = None;
        }

        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(content);
        start = start.or(item_start);
        end = item_end.or(end);
        speaker = item.speaker_label.as_deref();
    }

    if !text.is_empty() {
        if let (Some(s), Some(e)) = (start, end) {
            segments.push(TranscriptSegment {
                start_time: s,
                end_time: e,
                text: text.trim().to_string(),
            });
        }
    }

    segments
}
