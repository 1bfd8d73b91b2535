use std::path::PathBuf;

/// Failures while resolving source metadata
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Network failure while fetching metadata: {0}")]
    NetworkFailure(String),

    #[error("Could not parse metadata: {0}")]
    ParseFailure(String),
}

impl MetadataError {
    /// `NotFound` is terminal for the request, everything else may be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MetadataError::NotFound(_))
    }
}

/// Opaque failure from a transcription engine
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Transcription failed: {0}")]
pub struct TranscriptionError(pub String);

impl TranscriptionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<std::io::Error> for TranscriptionError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

/// Error types surfaced by the contribution pipeline
#[derive(thiserror::Error, Debug)]
pub enum ContributionError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Hosting API error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    HostingApi { status: Option<u16>, message: String },

    #[error("Path conflict at {}: already holds a transcript for {existing}", .path.display())]
    PathConflict { path: PathBuf, existing: String },

    #[error("Push rejected for branch '{branch}': remote branch has diverged and needs manual resolution")]
    PushConflict { branch: String },

    #[error("Network failure: {0}")]
    Network(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("Required dependency missing: {0}")]
    DependencyMissing(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ContributionError {
    pub fn hosting_api(status: Option<u16>, message: impl Into<String>) -> Self {
        ContributionError::HostingApi {
            status,
            message: message.into(),
        }
    }

    pub fn network(msg: impl Into<String>) -> Self {
        ContributionError::Network(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        ContributionError::InvalidRequest(msg.into())
    }

    /// Whether the failing step may be attempted again within the retry bound.
    ///
    /// Hosting API errors are retryable only for transport failures, 5xx and
    /// 429 responses; other client errors will not change on a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ContributionError::Network(_) => true,
            ContributionError::Metadata(err) => err.is_retryable(),
            ContributionError::HostingApi { status, .. } => match status {
                None => true,
                Some(code) => *code >= 500 || *code == 429,
            },
            _ => false,
        }
    }
}

/// Result type for pipeline and gateway operations
pub type ContributionResult<T> = std::result::Result<T, ContributionError>;
