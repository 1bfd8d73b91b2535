//! Transcript Contributor - turn a talk recording into a pull request against
//! a community transcript repository
//!
//! This library transcribes YouTube videos and audio files, renders them as
//! markdown with front matter, and drives the fork, clone, branch, commit,
//! push and pull-request sequence on GitHub. Every repository step is
//! idempotent, so an interrupted contribution can be re-run or resumed.

pub mod cli;
pub mod config;
pub mod error;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod repository;
pub mod source;
pub mod transcribe;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::{ContributionError, ContributionResult, MetadataError, TranscriptionError};
pub use pipeline::{ContributionPipeline, PipelineFailure, PipelineOutcome, ResumePoint};
pub use repository::{GatewayStage, RepositoryGateway, RepositoryState, Session, Step};
pub use source::{ContributionRequest, SourceIdentifier, SourceInput};

/// Result type used at the application edges
pub type Result<T> = anyhow::Result<T>;
