//! Source identifiers, contribution requests and the deterministic names
//! derived from them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ContributionError, ContributionResult};
use crate::utils::{slugify, validate_url};

/// YouTube ids are 11 characters, but any bare token of id characters is
/// accepted so other short ids keep working.
const MAX_VIDEO_ID_LEN: usize = 64;

/// Prefixes of YouTube playlist ids (uploads, favourites, mixes, ...)
const PLAYLIST_PREFIXES: &[&str] = &["PL", "UU", "FL", "RD", "OL", "LL"];

/// What the user passed on the command line: one source, or a playlist that
/// expands into one contribution per video
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    Single(SourceIdentifier),
    Playlist { id: String },
}

impl SourceInput {
    pub fn parse(input: &str) -> ContributionResult<Self> {
        let input = input.trim();
        if let Some(id) = playlist_id(input) {
            return Ok(SourceInput::Playlist { id });
        }
        SourceIdentifier::parse_single(input).map(SourceInput::Single)
    }

    /// Whether resolving this input needs yt-dlp
    pub fn needs_yt_dlp(&self) -> bool {
        match self {
            SourceInput::Single(source) => source.is_video(),
            SourceInput::Playlist { .. } => true,
        }
    }
}

/// URL yt-dlp lists the videos of a playlist from
pub fn playlist_url(id: &str) -> String {
    format!("https://www.youtube.com/playlist?list={}", id)
}

/// The media a contribution is made from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceIdentifier {
    /// Hosted video, identified by its id
    Video { id: String },
    /// Arbitrary audio file reachable over HTTP(S)
    Audio { url: String },
    /// Media file on local disk, stored as an absolute path
    Local { path: PathBuf },
}

impl SourceIdentifier {
    /// Classify a raw identifier by its shape.
    ///
    /// Bare ids (`[0-9A-Za-z_-]+`) and YouTube watch/short/embed URLs become
    /// `Video`, paths of existing files become `Local` and any other http(s)
    /// URL becomes `Audio`. Playlists are rejected here, see [`SourceInput`].
    pub fn parse(input: &str) -> ContributionResult<Self> {
        match SourceInput::parse(input)? {
            SourceInput::Single(source) => Ok(source),
            SourceInput::Playlist { id } => Err(ContributionError::invalid_request(format!(
                "{} is a playlist, which expands into one contribution per video",
                id
            ))),
        }
    }

    fn parse_single(input: &str) -> ContributionResult<Self> {
        if is_video_id(input) {
            return Ok(SourceIdentifier::Video {
                id: input.to_string(),
            });
        }

        if !input.contains("://") {
            let path = Path::new(input);
            if path.is_file() {
                let path = fs_err::canonicalize(path)?;
                return Ok(SourceIdentifier::Local { path });
            }
            if input.contains(['/', '.']) {
                return Err(ContributionError::invalid_request(format!(
                    "Invalid source, no such file: {}",
                    input
                )));
            }
        }

        let url = validate_url(input)?;

        if let Some(id) = video_id_from_url(&url) {
            return Ok(SourceIdentifier::Video { id });
        }

        Ok(SourceIdentifier::Audio {
            url: url.to_string(),
        })
    }

    pub fn is_video(&self) -> bool {
        matches!(self, SourceIdentifier::Video { .. })
    }

    /// The URL written into the transcript's `media` field
    pub fn canonical_url(&self) -> String {
        match self {
            SourceIdentifier::Video { id } => format!("https://www.youtube.com/watch?v={}", id),
            SourceIdentifier::Audio { url } => url.clone(),
            SourceIdentifier::Local { path } => url::Url::from_file_path(path)
                .map(String::from)
                .unwrap_or_else(|_| path.display().to_string()),
        }
    }

    /// Short stable key used for branch and file names
    pub fn key(&self) -> String {
        match self {
            SourceIdentifier::Video { id } => id.clone(),
            SourceIdentifier::Audio { url } => {
                let stem = url::Url::parse(url)
                    .ok()
                    .and_then(|parsed| {
                        let name = parsed.path_segments()?.next_back()?.to_string();
                        let stem = match name.rfind('.') {
                            Some(dot) if dot > 0 => name[..dot].to_string(),
                            _ => name,
                        };
                        let decoded = urlencoding::decode(&stem)
                            .map(|s| s.into_owned())
                            .unwrap_or(stem);
                        Some(slugify(&decoded))
                    })
                    .filter(|key| !key.is_empty());

                // no usable file name, fall back to host and path
                stem.unwrap_or_else(|| slugify(url.split_once("://").map_or(url.as_str(), |(_, rest)| rest)))
            }
            SourceIdentifier::Local { path } => path
                .file_stem()
                .map(|stem| slugify(&stem.to_string_lossy()))
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for SourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceIdentifier::Video { id } => write!(f, "video {}", id),
            SourceIdentifier::Audio { url } => write!(f, "audio {}", url),
            SourceIdentifier::Local { path } => write!(f, "file {}", path.display()),
        }
    }
}

fn is_video_id(input: &str) -> bool {
    !input.is_empty()
        && input.len() <= MAX_VIDEO_ID_LEN
        && input.chars().any(|c| c.is_ascii_alphanumeric())
        && input
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_playlist_token(input: &str) -> bool {
    input.len() > 11
        && is_video_id(input)
        && PLAYLIST_PREFIXES.iter().any(|prefix| input.starts_with(prefix))
}

/// Playlist id of a bare playlist token or a YouTube playlist URL.
///
/// A watch URL naming both a video and a list is the video.
fn playlist_id(input: &str) -> Option<String> {
    if is_playlist_token(input) {
        return Some(input.to_string());
    }

    let url = url::Url::parse(input).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    if !matches!(host, "youtube.com" | "music.youtube.com") {
        return None;
    }

    let query = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };
    let id = match url.path_segments()?.next()? {
        "playlist" => query("list"),
        "watch" if query("v").is_none() => query("list"),
        _ => None,
    };
    id.filter(|id| is_video_id(id))
}

fn video_id_from_url(url: &url::Url) -> Option<String> {
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");

    let candidate = match host {
        "youtube.com" | "music.youtube.com" => {
            let mut segments = url.path_segments()?;
            match segments.next()? {
                "watch" => url
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                "embed" | "shorts" | "v" | "live" => segments.next().map(str::to_string),
                _ => None,
            }
        }
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        _ => None,
    }?;

    is_video_id(&candidate).then_some(candidate)
}

/// Immutable input for one contribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRequest {
    pub source: SourceIdentifier,
    /// Directory inside the transcript repository, e.g. `bitcoin-core-dev-tech/2024`
    pub target_dir: String,
    pub title: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub speakers: Vec<String>,
    pub categories: Vec<String>,
    /// Interleave chapter headings from the source metadata
    pub chapters: bool,
}

impl ContributionRequest {
    pub fn new(source: &str, target_dir: &str) -> ContributionResult<Self> {
        Self::for_source(SourceIdentifier::parse(source)?, target_dir)
    }

    pub fn for_source(source: SourceIdentifier, target_dir: &str) -> ContributionResult<Self> {
        let target_dir = normalize_target_dir(target_dir)?;

        if source.key().is_empty() {
            return Err(ContributionError::invalid_request(format!(
                "Cannot derive a file name from {}",
                source
            )));
        }

        Ok(Self {
            source,
            target_dir,
            title: None,
            event_date: None,
            tags: Vec::new(),
            speakers: Vec::new(),
            categories: Vec::new(),
            chapters: false,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        let trimmed = title.trim();
        self.title = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Parse a `YYYY-MM-DD` event date
    pub fn with_event_date(mut self, date: &str) -> ContributionResult<Self> {
        let parsed = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|e| {
            ContributionError::invalid_request(format!("Supplied date is invalid: {}", e))
        })?;
        self.event_date = Some(parsed);
        Ok(self)
    }

    pub fn with_tags(mut self, tags: &str) -> Self {
        self.tags = split_list(tags);
        self
    }

    pub fn with_speakers(mut self, speakers: &str) -> Self {
        self.speakers = split_list(speakers);
        self
    }

    pub fn with_categories(mut self, categories: &str) -> Self {
        self.categories = split_list(categories);
        self
    }

    pub fn with_chapters(mut self, chapters: bool) -> Self {
        self.chapters = chapters;
        self
    }

    /// Audio URLs and local files cannot be scraped for a meaningful title,
    /// so one must be supplied.
    pub fn validate(&self) -> ContributionResult<()> {
        if !self.source.is_video() && self.title.is_none() {
            return Err(ContributionError::invalid_request(
                "A title is mandatory for audio and local sources (use --title)",
            ));
        }
        Ok(())
    }

    /// Branch used for this contribution on the fork.
    ///
    /// Pure function of the source and target directory, so re-runs land on
    /// the same branch. Directory segments are slugged so the name is always
    /// a valid git ref.
    pub fn branch_name(&self) -> String {
        let prefix: Vec<String> = self
            .target_dir
            .split('/')
            .map(slugify)
            .filter(|segment| !segment.is_empty())
            .collect();

        if prefix.is_empty() {
            self.source.key()
        } else {
            format!("{}-{}", prefix.join("-"), self.source.key())
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}-transcript.md", self.source.key())
    }

    /// Path of the transcript relative to the repository root
    pub fn target_path(&self) -> PathBuf {
        let mut path = PathBuf::new();
        for segment in self.target_dir.split('/') {
            path.push(segment);
        }
        path.push(self.file_name());
        path
    }
}

fn normalize_target_dir(dir: &str) -> ContributionResult<String> {
    let segments: Vec<&str> = dir
        .trim()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments.is_empty() {
        return Err(ContributionError::invalid_request(
            "Target directory must not be empty",
        ));
    }

    if segments.iter().any(|s| *s == "." || *s == ".." || s.contains('\\')) {
        return Err(ContributionError::invalid_request(format!(
            "Target directory must be a plain relative path: {}",
            dir
        )));
    }

    Ok(segments.join("/"))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_video_id() {
        let source = SourceIdentifier::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(source, SourceIdentifier::Video { id: "dQw4w9WgXcQ".into() });
        assert_eq!(source.canonical_url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn test_parse_youtube_urls() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://youtube.com/shorts/dQw4w9WgXcQ",
        ] {
            assert_eq!(
                SourceIdentifier::parse(url).unwrap(),
                SourceIdentifier::Video { id: "dQw4w9WgXcQ".into() },
                "{url}"
            );
        }
    }

    #[test]
    fn test_parse_audio_url() {
        let source = SourceIdentifier::parse("https://example.com/podcasts/Episode%2042.mp3").unwrap();
        assert!(!source.is_video());
        assert_eq!(source.key(), "episode-42");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SourceIdentifier::parse("not a source").is_err());
        assert!(SourceIdentifier::parse("ftp://example.com/a.mp3").is_err());
    }

    #[test]
    fn test_deterministic_naming() {
        let request = ContributionRequest::new("abc123", "/bitcoin-core-dev-tech/2024/").unwrap();
        let again = ContributionRequest::new("abc123", "bitcoin-core-dev-tech/2024").unwrap();

        assert_eq!(request.target_dir, "bitcoin-core-dev-tech/2024");
        assert_eq!(request.branch_name(), "bitcoin-core-dev-tech-2024-abc123");
        assert_eq!(request.branch_name(), again.branch_name());
        assert_eq!(
            request.target_path(),
            PathBuf::from("bitcoin-core-dev-tech/2024/abc123-transcript.md")
        );
        assert_eq!(request.target_path(), again.target_path());
    }

    #[test]
    fn test_branch_name_is_a_valid_ref() {
        let spaced = ContributionRequest::new("abc123", "Bitcoin Conf/2024").unwrap();
        assert_eq!(spaced.branch_name(), "bitcoin-conf-2024-abc123");
        assert_eq!(
            spaced.target_path(),
            PathBuf::from("Bitcoin Conf/2024/abc123-transcript.md")
        );

        let odd = ContributionRequest::new("abc123", "x:y/2024").unwrap();
        assert_eq!(odd.branch_name(), "x-y-2024-abc123");

        let symbols = ContributionRequest::new("abc123", "~~~").unwrap();
        assert_eq!(symbols.branch_name(), "abc123");
    }

    #[test]
    fn test_audio_key_never_empty() {
        let request = ContributionRequest::new("https://example.com/---.mp3", "misc").unwrap();
        assert_eq!(request.source.key(), "example-com-mp3");
        assert_eq!(request.branch_name(), "misc-example-com-mp3");
        assert_eq!(request.file_name(), "example-com-mp3-transcript.md");

        let feed = SourceIdentifier::parse("https://example.com/feed/").unwrap();
        assert_eq!(feed.key(), "example-com-feed");
    }

    #[test]
    fn test_id_needs_an_alphanumeric() {
        assert!(SourceIdentifier::parse("---").is_err());
        assert!(SourceIdentifier::parse("_").is_err());
    }

    #[test]
    fn test_parse_playlists() {
        let playlist = "PLpZ0zbpQYFBkuQhuwQ5iaNnRtJq3zmFV2";
        for input in [
            playlist.to_string(),
            format!("https://www.youtube.com/playlist?list={}", playlist),
            format!("https://youtube.com/watch?list={}", playlist),
        ] {
            assert_eq!(
                SourceInput::parse(&input).unwrap(),
                SourceInput::Playlist { id: playlist.into() },
                "{input}"
            );
        }

        // an explicit video wins over the list it was opened from
        let watch = format!("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list={}", playlist);
        assert_eq!(
            SourceInput::parse(&watch).unwrap(),
            SourceInput::Single(SourceIdentifier::Video { id: "dQw4w9WgXcQ".into() })
        );

        // short ids with a playlist prefix are still videos
        assert!(matches!(
            SourceInput::parse("PLx12").unwrap(),
            SourceInput::Single(SourceIdentifier::Video { .. })
        ));

        assert!(matches!(
            ContributionRequest::new(playlist, "misc"),
            Err(ContributionError::InvalidRequest(_))
        ));
        assert_eq!(
            playlist_url(playlist),
            "https://www.youtube.com/playlist?list=PLpZ0zbpQYFBkuQhuwQ5iaNnRtJq3zmFV2"
        );
    }

    #[test]
    fn test_parse_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Dev Call 12.mp3");
        std::fs::write(&file, b"ID3").unwrap();

        let source = SourceIdentifier::parse(&file.to_string_lossy()).unwrap();
        let path = match &source {
            SourceIdentifier::Local { path } => path.clone(),
            other => panic!("expected a local source, got {other:?}"),
        };
        assert!(path.is_absolute());
        assert_eq!(source.key(), "dev-call-12");
        assert!(source.canonical_url().starts_with("file:///"));
        assert!(!source.is_video());

        let request = ContributionRequest::for_source(source, "misc").unwrap();
        assert!(request.validate().is_err());
        assert!(request.with_title("Dev Call 12").validate().is_ok());

        let missing = dir.path().join("missing.mp3");
        assert!(matches!(
            SourceIdentifier::parse(&missing.to_string_lossy()),
            Err(ContributionError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_video_ids_keep_case() {
        let upper = SourceIdentifier::parse("dQw4w9WgXcQ").unwrap();
        let lower = SourceIdentifier::parse("dqw4w9wgxcq").unwrap();
        assert_ne!(upper.key(), lower.key());
    }

    #[test]
    fn test_audio_requires_title() {
        let request = ContributionRequest::new("https://example.com/talk.mp3", "misc").unwrap();
        assert!(matches!(request.validate(), Err(ContributionError::InvalidRequest(_))));
        assert!(request.with_title("A Talk").validate().is_ok());
    }

    #[test]
    fn test_optional_fields() {
        let request = ContributionRequest::new("dQw4w9WgXcQ", "misc")
            .unwrap()
            .with_tags(" taproot, , schnorr ")
            .with_speakers("Alice,Bob")
            .with_categories("conference")
            .with_event_date("2024-03-01")
            .unwrap();
        assert_eq!(request.tags, vec!["taproot", "schnorr"]);
        assert_eq!(request.speakers, vec!["Alice", "Bob"]);
        assert_eq!(request.categories, vec!["conference"]);
        assert_eq!(request.event_date, NaiveDate::from_ymd_opt(2024, 3, 1));

        let bad = ContributionRequest::new("dQw4w9WgXcQ", "misc")
            .unwrap()
            .with_event_date("03/01/2024");
        assert!(bad.is_err());
    }

    #[test]
    fn test_target_dir_validation() {
        assert!(ContributionRequest::new("dQw4w9WgXcQ", "/").is_err());
        assert!(ContributionRequest::new("dQw4w9WgXcQ", "../etc").is_err());
    }
}
