//! Sequences transcription, metadata resolution, rendering and the
//! repository steps for one contribution request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::error::ContributionError;
use crate::metadata::MetadataResolver;
use crate::output::{self, TranscriptArtifact};
use crate::repository::retry::RetryPolicy;
use crate::repository::{GatewayStage, PullRequestRef, RepositoryGateway, RepositoryState, Step};
use crate::source::ContributionRequest;
use crate::transcribe::Transcriber;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Root for working copies (`repos/`) and transcripts (`transcripts/`)
    pub work_dir: PathBuf,
    pub retry: RetryPolicy,
}

/// Everything a later run needs to continue where a failed one stopped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub artifact: Option<TranscriptArtifact>,
    pub repository: RepositoryState,
}

#[derive(Debug)]
pub struct PipelineFailure {
    /// Last stage the repository reached
    pub stage: GatewayStage,
    pub step: Step,
    pub cause: ContributionError,
    pub resume: ResumePoint,
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed at {} (last completed stage: {}): {}",
            self.step, self.stage, self.cause
        )
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Success(PullRequestRef),
    Failure(PipelineFailure),
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success(_))
    }
}

/// Serializes runs that target the same branch
#[derive(Debug, Default)]
pub struct BranchLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BranchLocks {
    pub async fn acquire(&self, branch: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(branch.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

type StepResult<T> = Result<T, (Step, ContributionError)>;

fn at(step: Step) -> impl FnOnce(ContributionError) -> (Step, ContributionError) {
    move |err| (step, err)
}

pub struct ContributionPipeline {
    transcriber: Arc<dyn Transcriber>,
    metadata: Arc<dyn MetadataResolver>,
    gateway: RepositoryGateway,
    settings: PipelineSettings,
    cancel: CancellationToken,
    locks: Arc<BranchLocks>,
}

impl ContributionPipeline {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        metadata: Arc<dyn MetadataResolver>,
        gateway: RepositoryGateway,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            transcriber,
            metadata,
            gateway,
            settings,
            cancel: CancellationToken::new(),
            locks: Arc::new(BranchLocks::default()),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_branch_locks(mut self, locks: Arc<BranchLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a request from scratch
    pub async fn run(&self, request: &ContributionRequest) -> PipelineOutcome {
        self.resume(request, ResumePoint::default()).await
    }

    /// Continue a request from an earlier failure's resume point.
    ///
    /// Steps whose post-condition already holds are skipped, and the
    /// transcript is reused when the resume point carries one.
    pub async fn resume(&self, request: &ContributionRequest, resume: ResumePoint) -> PipelineOutcome {
        let branch = request.branch_name();
        let _guard = self.locks.acquire(&branch).await;

        let mut progress = resume;
        match self.drive(request, &mut progress).await {
            Ok(pr) => PipelineOutcome::Success(pr),
            Err((step, cause)) => {
                let failure = PipelineFailure {
                    stage: progress.repository.stage,
                    step,
                    cause,
                    resume: progress,
                };
                tracing::error!("{} for {}", failure, request.source);
                PipelineOutcome::Failure(failure)
            }
        }
    }

    /// Run requests one after another, e.g. the videos of a playlist.
    ///
    /// A failed request does not stop the ones after it; each gets its own
    /// outcome, in request order.
    pub async fn run_all(&self, requests: &[ContributionRequest]) -> Vec<PipelineOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.run(request).await);
        }
        outcomes
    }

    fn checkpoint(&self, step: Step) -> StepResult<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!("Cancelled before {}", step);
            return Err((step, ContributionError::Cancelled));
        }
        Ok(())
    }

    async fn drive(&self, request: &ContributionRequest, progress: &mut ResumePoint) -> StepResult<PullRequestRef> {
        self.checkpoint(Step::Prepare)?;
        request.validate().map_err(at(Step::Prepare))?;

        let branch = request.branch_name();
        let artifact = match &progress.artifact {
            Some(artifact) if artifact.path.exists() => {
                tracing::info!("Reusing transcript {}", artifact.path.display());
                artifact.clone()
            }
            _ => {
                let artifact = self.produce_artifact(request, &branch).await?;
                progress.artifact = Some(artifact.clone());
                artifact
            }
        };

        let state = &mut progress.repository;

        self.checkpoint(Step::EnsureFork)?;
        self.gateway.ensure_fork(state).await.map_err(at(Step::EnsureFork))?;

        self.checkpoint(Step::EnsureLocalClone)?;
        let fork_name = state
            .fork
            .as_ref()
            .map(|fork| fork.name.clone())
            .unwrap_or_else(|| self.gateway.upstream().name.clone());
        let clone_path = self.settings.work_dir.join("repos").join(fork_name).join(&branch);
        self.gateway
            .ensure_local_clone(state, &clone_path)
            .await
            .map_err(at(Step::EnsureLocalClone))?;

        self.checkpoint(Step::EnsureBranch)?;
        self.gateway
            .ensure_branch(state, &branch)
            .await
            .map_err(at(Step::EnsureBranch))?;

        self.checkpoint(Step::PlaceFile)?;
        self.gateway
            .place_file(state, &artifact, &request.target_path())
            .await
            .map_err(at(Step::PlaceFile))?;

        let title = &artifact.metadata.title;
        self.checkpoint(Step::CommitAndPush)?;
        self.gateway
            .commit_and_push(state, &format!("Add transcript for \"{}\"", title))
            .await
            .map_err(at(Step::CommitAndPush))?;

        self.checkpoint(Step::OpenPullRequest)?;
        let body = format!(
            "Transcript of {} added under `{}`.\n\n{}",
            artifact.media,
            request.target_dir,
            output::transcript_by(&self.gateway.session().login)
        );
        let pr = self
            .gateway
            .open_or_reuse_pr(state, &format!("Add transcript: {}", title), &body)
            .await
            .map_err(at(Step::OpenPullRequest))?;

        tracing::info!("Contribution for {} is at {}", request.source, pr.url);
        Ok(pr)
    }

    async fn produce_artifact(&self, request: &ContributionRequest, branch: &str) -> StepResult<TranscriptArtifact> {
        let transcripts_dir = self.settings.work_dir.join("transcripts").join(branch);

        self.checkpoint(Step::Transcribe)?;
        tracing::info!("Transcribing {}", request.source);
        // transcription is expensive and not retried
        let transcript = self
            .transcriber
            .transcribe(&request.source, &transcripts_dir)
            .await
            .map_err(|e| (Step::Transcribe, ContributionError::from(e)))?;

        self.checkpoint(Step::ResolveMetadata)?;
        let resolver = &self.metadata;
        let source = &request.source;
        let mut metadata = self
            .settings
            .retry
            .run("resolve metadata", move || async move {
                resolver.resolve(source).await.map_err(ContributionError::from)
            })
            .await
            .map_err(at(Step::ResolveMetadata))?;
        if let Some(title) = &request.title {
            metadata.title = title.clone();
        }

        self.checkpoint(Step::RenderTranscript)?;
        let body = transcript
            .read_body()
            .map_err(|e| (Step::RenderTranscript, ContributionError::from(e)))?;
        let transcript_by = output::transcript_by(&self.gateway.session().login);
        output::write_artifact(request, &metadata, &body, &transcript_by, &transcripts_dir)
            .map_err(|e| (Step::RenderTranscript, ContributionError::from(e)))
    }
}
