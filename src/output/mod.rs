//! Markdown rendering of transcripts for the transcript repository.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::metadata::{Chapter, Metadata};
use crate::source::ContributionRequest;
use crate::transcribe::{TranscriptBody, TranscriptFormat};

const FRONT_MATTER_DELIMITER: &str = "---";

/// The rendered transcript handed to the repository gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptArtifact {
    pub path: PathBuf,
    pub format: TranscriptFormat,
    /// Media URL embedded in the front matter, identifies the source
    pub media: String,
    pub metadata: Metadata,
}

/// YAML front matter of a transcript file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub speakers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

/// Credit line written into `transcript_by`
pub fn transcript_by(login: &str) -> String {
    format!("{} via {} v{}", login, env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Build the front matter for a request, preferring explicit request fields
/// over scraped metadata
pub fn front_matter(
    request: &ContributionRequest,
    metadata: &Metadata,
    transcript_by: &str,
) -> FrontMatter {
    let tags = if request.tags.is_empty() {
        metadata.tags.clone()
    } else {
        request.tags.clone()
    };

    FrontMatter {
        title: request.title.clone().unwrap_or_else(|| metadata.title.clone()),
        transcript_by: Some(transcript_by.to_string()),
        media: Some(request.source.canonical_url()),
        tags,
        speakers: request.speakers.clone(),
        categories: request.categories.clone(),
        date: request.event_date,
    }
}

/// Render front matter and body into a markdown document
pub fn render_markdown(
    front_matter: &FrontMatter,
    body: &TranscriptBody,
    chapters: Option<&[Chapter]>,
) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(front_matter)?;
    let yaml = yaml.strip_prefix("---\n").unwrap_or(&yaml);

    let text = match chapters {
        Some(chapters) if !chapters.is_empty() && !body.segments.is_empty() => {
            combine_chapters(chapters, body)
        }
        _ => body.text.trim().to_string(),
    };

    Ok(format!(
        "{delim}\n{yaml}{delim}\n\n{text}\n",
        delim = FRONT_MATTER_DELIMITER,
        yaml = yaml,
        text = text
    ))
}

/// Interleave `## <chapter>` headings with segment text.
///
/// A chapter heading is emitted before the first segment whose start time is
/// at or after the chapter start.
pub fn combine_chapters(chapters: &[Chapter], body: &TranscriptBody) -> String {
    let mut out = String::new();
    let mut chapter_iter = chapters.iter().peekable();
    let mut paragraph: Vec<&str> = Vec::new();

    for segment in &body.segments {
        while let Some(chapter) = chapter_iter.peek() {
            if chapter.start_time > segment.start_time {
                break;
            }
            flush_paragraph(&mut out, &mut paragraph);
            out.push_str(&format!("## {}\n\n", chapter.title.trim()));
            chapter_iter.next();
        }
        paragraph.push(segment.text.trim());
    }
    flush_paragraph(&mut out, &mut paragraph);

    out.trim_end().to_string()
}

fn flush_paragraph(out: &mut String, paragraph: &mut Vec<&str>) {
    if !paragraph.is_empty() {
        out.push_str(&paragraph.join(" "));
        out.push_str("\n\n");
        paragraph.clear();
    }
}

/// Raw YAML between the opening and closing `---` lines
fn front_matter_block(content: &str) -> Option<&str> {
    let rest = content.strip_prefix(FRONT_MATTER_DELIMITER)?;
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;
    let end = rest
        .match_indices(FRONT_MATTER_DELIMITER)
        .find(|(idx, _)| *idx == 0 || rest[..*idx].ends_with('\n'))
        .map(|(idx, _)| idx)?;
    Some(&rest[..end])
}

/// Parse the front matter at the top of a markdown document
pub fn parse_front_matter(content: &str) -> Option<FrontMatter> {
    serde_yaml::from_str(front_matter_block(content)?).ok()
}

/// The `media` field of a document's front matter.
///
/// Only `media` is read, so files written by hand or by older tools still
/// identify their source when other fields are missing or shaped differently.
pub fn media_of(content: &str) -> Option<String> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(front_matter_block(content)?).ok()?;
    yaml.get("media")?
        .as_str()
        .map(str::trim)
        .filter(|media| !media.is_empty())
        .map(str::to_string)
}

/// Media URL recorded in an existing transcript file, if it has one
pub fn read_media(path: &Path) -> std::io::Result<Option<String>> {
    let content = fs_err::read_to_string(path)?;
    Ok(media_of(&content))
}

/// Render and write the artifact for a request into `output_dir`
pub fn write_artifact(
    request: &ContributionRequest,
    metadata: &Metadata,
    body: &TranscriptBody,
    transcript_by: &str,
    output_dir: &Path,
) -> std::io::Result<TranscriptArtifact> {
    let front_matter = front_matter(request, metadata, transcript_by);
    let chapters = request.chapters.then_some(metadata.chapters.as_slice());
    let content = render_markdown(&front_matter, body, chapters)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    fs_err::create_dir_all(output_dir)?;
    let path = output_dir.join(request.file_name());
    fs_err::write(&path, content)?;

    Ok(TranscriptArtifact {
        path,
        format: TranscriptFormat::Markdown,
        media: request.source.canonical_url(),
        metadata: metadata.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::TranscriptSegment;

    fn metadata() -> Metadata {
        Metadata {
            title: "Scraped Title".into(),
            author: Some("Channel".into()),
            tags: vec!["scraped".into()],
            duration: Some(120.0),
            url: "https://www.youtube.com/watch?v=abc123".into(),
            chapters: vec![
                Chapter { title: "Intro".into(), start_time: 0.0 },
                Chapter { title: "Details".into(), start_time: 10.0 },
            ],
        }
    }

    fn body() -> TranscriptBody {
        let segment = |start: f64, text: &str| TranscriptSegment {
            start_time: start,
            end_time: start + 4.0,
            text: text.into(),
        };
        TranscriptBody {
            text: "Hi. Welcome. Now details.".into(),
            segments: vec![segment(0.0, "Hi."), segment(5.0, "Welcome."), segment(12.0, "Now details.")],
        }
    }

    #[test]
    fn test_front_matter_prefers_request_fields() {
        let request = ContributionRequest::new("abc123", "misc")
            .unwrap()
            .with_title("Explicit")
            .with_tags("taproot");
        let fm = front_matter(&request, &metadata(), "alice via test");
        assert_eq!(fm.title, "Explicit");
        assert_eq!(fm.tags, vec!["taproot"]);
        assert_eq!(fm.media.as_deref(), Some("https://www.youtube.com/watch?v=abc123"));

        let request = ContributionRequest::new("abc123", "misc").unwrap();
        let fm = front_matter(&request, &metadata(), "alice via test");
        assert_eq!(fm.title, "Scraped Title");
        assert_eq!(fm.tags, vec!["scraped"]);
    }

    #[test]
    fn test_render_and_parse_front_matter() {
        let request = ContributionRequest::new("abc123", "misc").unwrap();
        let fm = front_matter(&request, &metadata(), &transcript_by("alice"));
        let markdown = render_markdown(&fm, &body(), None).unwrap();

        assert!(markdown.starts_with("---\ntitle: Scraped Title\n"));
        assert!(markdown.contains("transcript_by: alice via transcript-contributor v"));
        assert!(markdown.trim_end().ends_with("Hi. Welcome. Now details."));
        assert_eq!(parse_front_matter(&markdown), Some(fm));
    }

    #[test]
    fn test_combine_chapters() {
        let combined = combine_chapters(&metadata().chapters, &body());
        assert_eq!(combined, "## Intro\n\nHi. Welcome.\n\n## Details\n\nNow details.");
    }

    #[test]
    fn test_parse_front_matter_rejects_plain_text() {
        assert_eq!(parse_front_matter("just a transcript"), None);
        assert_eq!(parse_front_matter("---\nnot: [closed"), None);
    }

    #[test]
    fn test_media_read_from_loose_front_matter() {
        let media = Some("https://www.youtube.com/watch?v=abc123".to_string());
        assert_eq!(
            media_of("---\nmedia: https://www.youtube.com/watch?v=abc123\n---\n\nOld.\n"),
            media
        );
        assert_eq!(
            media_of("---\ntitle: Old\ndate: 2019\ntags: mempool\nmedia: https://www.youtube.com/watch?v=abc123\n---\n"),
            media
        );
        assert_eq!(media_of("---\ntitle: No media\n---\n"), None);
        assert_eq!(media_of("no front matter"), None);
    }

    #[test]
    fn test_write_artifact_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let request = ContributionRequest::new("abc123", "misc").unwrap().with_chapters(true);

        let first = write_artifact(&request, &metadata(), &body(), "alice", dir.path()).unwrap();
        let second = write_artifact(&request, &metadata(), &body(), "alice", dir.path()).unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(first.path, dir.path().join("abc123-transcript.md"));
        assert_eq!(
            read_media(&first.path).unwrap().as_deref(),
            Some("https://www.youtube.com/watch?v=abc123")
        );
        let content = std::fs::read_to_string(&first.path).unwrap();
        assert!(content.contains("## Details"));
    }
}
