//! Fork, clone, branch, place, push and pull-request steps against the
//! transcript repository.
//!
//! Every step checks a named guard against [`RepositoryState`] before doing
//! anything, so running a step twice is a logged no-op. Stages only move
//! forward.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod git;
pub mod github;
pub mod retry;

#[cfg(test)]
pub(crate) mod fakes;

use crate::error::{ContributionError, ContributionResult};
use crate::output::{read_media, TranscriptArtifact};
use retry::RetryPolicy;

/// Progress of a contribution through the repository steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GatewayStage {
    Init,
    Forked,
    Cloned,
    Branched,
    FilePlaced,
    Pushed,
    PrOpened,
}

impl fmt::Display for GatewayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GatewayStage::Init => "Init",
            GatewayStage::Forked => "Forked",
            GatewayStage::Cloned => "Cloned",
            GatewayStage::Branched => "Branched",
            GatewayStage::FilePlaced => "FilePlaced",
            GatewayStage::Pushed => "Pushed",
            GatewayStage::PrOpened => "PrOpened",
        };
        f.write_str(name)
    }
}

/// A unit of work in the contribution pipeline, used to name failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Prepare,
    Transcribe,
    ResolveMetadata,
    RenderTranscript,
    EnsureFork,
    EnsureLocalClone,
    EnsureBranch,
    PlaceFile,
    CommitAndPush,
    OpenPullRequest,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Prepare => "Prepare",
            Step::Transcribe => "Transcribe",
            Step::ResolveMetadata => "ResolveMetadata",
            Step::RenderTranscript => "RenderTranscript",
            Step::EnsureFork => "EnsureFork",
            Step::EnsureLocalClone => "EnsureLocalClone",
            Step::EnsureBranch => "EnsureBranch",
            Step::PlaceFile => "PlaceFile",
            Step::CommitAndPush => "CommitAndPush",
            Step::OpenPullRequest => "OpenPullRequest",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForkStatus {
    CreatedThisRun,
    PreExisting,
}

/// `owner/name` of a hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Repository as reported by the hosting API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub clone_url: String,
    pub fork: bool,
    pub parent: Option<RepoRef>,
}

impl RemoteRepository {
    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub url: String,
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    /// Owner of the fork holding `branch`
    pub head_owner: String,
    pub branch: String,
    pub base: String,
}

impl NewPullRequest {
    /// `owner:branch`, the form the API expects for cross-repository heads
    pub fn head(&self) -> String {
        format!("{}:{}", self.head_owner, self.branch)
    }
}

/// Authenticated identity, passed explicitly to everything that talks to
/// the hosting platform
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub login: String,
    pub token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("login", &self.login)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// What the gateway has achieved for one contribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryState {
    pub stage: GatewayStage,
    pub upstream: Option<RemoteRepository>,
    pub fork: Option<RemoteRepository>,
    pub fork_status: Option<ForkStatus>,
    pub base_branch: Option<String>,
    pub clone_path: Option<PathBuf>,
    pub branch: Option<String>,
    /// Transcript path relative to the repository root
    pub placed_path: Option<PathBuf>,
    pub committed: bool,
    pub pushed: bool,
    pub pull_request: Option<PullRequestRef>,
}

impl Default for RepositoryState {
    fn default() -> Self {
        Self {
            stage: GatewayStage::Init,
            upstream: None,
            fork: None,
            fork_status: None,
            base_branch: None,
            clone_path: None,
            branch: None,
            placed_path: None,
            committed: false,
            pushed: false,
            pull_request: None,
        }
    }
}

impl RepositoryState {
    fn advance(&mut self, stage: GatewayStage) {
        if stage > self.stage {
            tracing::info!("Repository stage: {} -> {}", self.stage, stage);
            self.stage = stage;
        }
    }

    fn reached(&self, stage: GatewayStage) -> bool {
        self.stage >= stage
    }
}

/// Calls against the git-hosting platform
#[async_trait]
pub trait HostingApi: Send + Sync {
    /// Login of the user owning the session token
    async fn authenticated_user(&self) -> ContributionResult<String>;

    /// `None` when the repository does not exist
    async fn get_repository(&self, repo: &RepoRef) -> ContributionResult<Option<RemoteRepository>>;

    async fn create_fork(&self, upstream: &RepoRef) -> ContributionResult<RemoteRepository>;

    /// Open pull request against `upstream` whose head is `owner:branch`
    async fn find_open_pull_request(
        &self,
        upstream: &RepoRef,
        head: &str,
    ) -> ContributionResult<Option<PullRequestRef>>;

    async fn create_pull_request(
        &self,
        upstream: &RepoRef,
        request: &NewPullRequest,
    ) -> ContributionResult<PullRequestRef>;
}

/// The narrow set of git operations the gateway needs
#[async_trait]
pub trait GitBackend: Send + Sync {
    async fn is_repository(&self, path: &Path) -> bool;

    async fn clone_repo(&self, url: &str, path: &Path) -> ContributionResult<()>;

    /// Add the remote, or repoint it if it already exists
    async fn ensure_remote(&self, path: &Path, name: &str, url: &str) -> ContributionResult<()>;

    async fn fetch(&self, path: &Path, remote: &str) -> ContributionResult<()>;

    /// Force `branch` to `start_point` and check it out
    async fn reset_branch(&self, path: &Path, branch: &str, start_point: &str) -> ContributionResult<()>;

    async fn local_branch_exists(&self, path: &Path, branch: &str) -> ContributionResult<bool>;

    async fn remote_branch_exists(&self, path: &Path, remote: &str, branch: &str) -> ContributionResult<bool>;

    async fn current_branch(&self, path: &Path) -> ContributionResult<Option<String>>;

    async fn checkout(&self, path: &Path, branch: &str) -> ContributionResult<()>;

    async fn create_branch(&self, path: &Path, branch: &str, start_point: &str) -> ContributionResult<()>;

    async fn stage(&self, path: &Path, file: &Path) -> ContributionResult<()>;

    async fn has_staged_changes(&self, path: &Path) -> ContributionResult<bool>;

    async fn commit(&self, path: &Path, message: &str) -> ContributionResult<()>;

    async fn push(&self, path: &Path, remote: &str, branch: &str) -> ContributionResult<()>;
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub upstream: RepoRef,
    /// Overrides the upstream default branch as PR base
    pub base_branch: Option<String>,
    pub retry: RetryPolicy,
}

/// Drives the repository steps for one authenticated session
#[derive(Clone)]
pub struct RepositoryGateway {
    hosting: Arc<dyn HostingApi>,
    git: Arc<dyn GitBackend>,
    session: Session,
    settings: GatewaySettings,
}

impl RepositoryGateway {
    pub fn new(
        hosting: Arc<dyn HostingApi>,
        git: Arc<dyn GitBackend>,
        session: Session,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            hosting,
            git,
            session,
            settings,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn upstream(&self) -> &RepoRef {
        &self.settings.upstream
    }

    /// Reuse the session user's fork of the upstream, or create it
    pub async fn ensure_fork(&self, state: &mut RepositoryState) -> ContributionResult<()> {
        if state.reached(GatewayStage::Forked) && state.fork.is_some() {
            tracing::debug!("Guard fork_known satisfied, skipping fork");
            return Ok(());
        }

        let hosting = &self.hosting;
        let upstream_ref = &self.settings.upstream;
        let retry = &self.settings.retry;

        let upstream = retry
            .run("look up upstream", move || hosting.get_repository(upstream_ref))
            .await?
            .ok_or_else(|| {
                ContributionError::hosting_api(
                    Some(404),
                    format!("Upstream repository {} not found", upstream_ref),
                )
            })?;

        let candidate = RepoRef::new(&self.session.login, &upstream_ref.name);
        let candidate_ref = &candidate;
        let existing = retry
            .run("look up fork", move || hosting.get_repository(candidate_ref))
            .await?;

        let (fork, status) = match existing {
            Some(repo) if is_fork_of(&repo, upstream_ref) => {
                tracing::info!("Reusing existing fork {}", candidate);
                (repo, ForkStatus::PreExisting)
            }
            Some(_) => {
                return Err(ContributionError::hosting_api(
                    Some(409),
                    format!("{} exists but is not a fork of {}", candidate, upstream_ref),
                ));
            }
            None => {
                tracing::info!("Forking {} into {}", upstream_ref, self.session.login);
                let fork = retry
                    .run("create fork", move || hosting.create_fork(upstream_ref))
                    .await?;
                (fork, ForkStatus::CreatedThisRun)
            }
        };

        state.base_branch = Some(
            self.settings
                .base_branch
                .clone()
                .unwrap_or_else(|| upstream.default_branch.clone()),
        );
        state.upstream = Some(upstream);
        state.fork = Some(fork);
        state.fork_status = Some(status);
        state.advance(GatewayStage::Forked);
        Ok(())
    }

    /// Clone the fork into `clone_path`, or bring an existing working copy
    /// up to date with the fork and the upstream
    pub async fn ensure_local_clone(
        &self,
        state: &mut RepositoryState,
        clone_path: &Path,
    ) -> ContributionResult<()> {
        let (fork, upstream, base) = match (&state.fork, &state.upstream, &state.base_branch) {
            (Some(fork), Some(upstream), Some(base)) => (fork.clone(), upstream.clone(), base.clone()),
            _ => return Err(out_of_order(Step::EnsureLocalClone, GatewayStage::Forked, state)),
        };

        let tracked = state.clone_path.as_deref().unwrap_or(clone_path);
        if state.reached(GatewayStage::Cloned) && self.git.is_repository(tracked).await {
            tracing::debug!("Guard clone_ready satisfied, skipping clone");
            return Ok(());
        }

        let git = &self.git;
        let retry = &self.settings.retry;

        if git.is_repository(clone_path).await {
            tracing::info!("Reusing working copy at {}", clone_path.display());
            git.ensure_remote(clone_path, "origin", &fork.clone_url).await?;
        } else {
            tracing::info!("Cloning {} into {}", fork.clone_url, clone_path.display());
            let url = fork.clone_url.as_str();
            retry
                .run("clone fork", move || async move {
                    // a failed attempt may leave a partial checkout behind
                    if clone_path.exists() {
                        fs_err::remove_dir_all(clone_path)?;
                    }
                    git.clone_repo(url, clone_path).await
                })
                .await?;
        }

        git.ensure_remote(clone_path, "upstream", &upstream.clone_url).await?;
        retry
            .run("fetch fork", move || git.fetch(clone_path, "origin"))
            .await?;
        retry
            .run("fetch upstream", move || git.fetch(clone_path, "upstream"))
            .await?;

        let upstream_base = format!("upstream/{}", base);
        git.reset_branch(clone_path, &base, &upstream_base).await?;

        state.clone_path = Some(clone_path.to_path_buf());
        state.advance(GatewayStage::Cloned);
        Ok(())
    }

    /// Check out the contribution branch, creating it from the upstream base
    /// only when it exists neither locally nor on the fork
    pub async fn ensure_branch(&self, state: &mut RepositoryState, branch: &str) -> ContributionResult<()> {
        let (path, base) = match (&state.clone_path, &state.base_branch) {
            (Some(path), Some(base)) if state.reached(GatewayStage::Cloned) => (path.clone(), base.clone()),
            _ => return Err(out_of_order(Step::EnsureBranch, GatewayStage::Cloned, state)),
        };

        let current = self.git.current_branch(&path).await?;
        if state.reached(GatewayStage::Branched)
            && state.branch.as_deref() == Some(branch)
            && current.as_deref() == Some(branch)
        {
            tracing::debug!("Guard on_branch satisfied, already on {}", branch);
            return Ok(());
        }

        if current.as_deref() == Some(branch) {
            tracing::debug!("Already on branch {}", branch);
        } else if self.git.local_branch_exists(&path, branch).await? {
            tracing::info!("Checking out existing branch {}", branch);
            self.git.checkout(&path, branch).await?;
        } else if self.git.remote_branch_exists(&path, "origin", branch).await? {
            tracing::info!("Tracking existing fork branch {}", branch);
            self.git
                .create_branch(&path, branch, &format!("origin/{}", branch))
                .await?;
        } else {
            tracing::info!("Creating branch {} from upstream/{}", branch, base);
            self.git
                .create_branch(&path, branch, &format!("upstream/{}", base))
                .await?;
        }

        state.branch = Some(branch.to_string());
        state.advance(GatewayStage::Branched);
        Ok(())
    }

    /// Copy the artifact to `target` (relative to the repository root).
    ///
    /// An existing file is only overwritten when its front matter names the
    /// same media.
    pub async fn place_file(
        &self,
        state: &mut RepositoryState,
        artifact: &TranscriptArtifact,
        target: &Path,
    ) -> ContributionResult<()> {
        let root = match &state.clone_path {
            Some(path) if state.reached(GatewayStage::Branched) => path.clone(),
            _ => return Err(out_of_order(Step::PlaceFile, GatewayStage::Branched, state)),
        };

        if state.reached(GatewayStage::FilePlaced) && state.placed_path.as_deref() == Some(target) {
            tracing::debug!("Guard file_placed satisfied for {}", target.display());
            return Ok(());
        }

        let destination = root.join(target);
        if destination.exists() {
            match read_media(&destination)? {
                Some(media) if media == artifact.media => {
                    tracing::info!("Overwriting earlier transcript at {}", target.display());
                }
                existing => {
                    return Err(ContributionError::PathConflict {
                        path: target.to_path_buf(),
                        existing: existing.unwrap_or_else(|| "a file without media front matter".to_string()),
                    });
                }
            }
        }

        if let Some(parent) = destination.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::copy(&artifact.path, &destination)?;
        tracing::info!("Placed transcript at {}", target.display());

        state.placed_path = Some(target.to_path_buf());
        state.advance(GatewayStage::FilePlaced);
        Ok(())
    }

    /// Commit the placed file if it changed and push the branch to the fork
    pub async fn commit_and_push(&self, state: &mut RepositoryState, message: &str) -> ContributionResult<()> {
        let (path, branch, placed) = match (&state.clone_path, &state.branch, &state.placed_path) {
            (Some(path), Some(branch), Some(placed)) if state.reached(GatewayStage::FilePlaced) => {
                (path.clone(), branch.clone(), placed.clone())
            }
            _ => return Err(out_of_order(Step::CommitAndPush, GatewayStage::FilePlaced, state)),
        };

        if state.reached(GatewayStage::Pushed) {
            tracing::debug!("Guard pushed satisfied for {}", branch);
            return Ok(());
        }

        self.git.stage(&path, &placed).await?;
        if self.git.has_staged_changes(&path).await? {
            self.git.commit(&path, message).await?;
            tracing::info!("Committed {}", placed.display());
        } else {
            tracing::debug!("Nothing to commit, index is clean");
        }
        state.committed = true;

        let git = &self.git;
        let path = path.as_path();
        let branch_name = branch.as_str();
        self.settings
            .retry
            .run("push branch", move || git.push(path, "origin", branch_name))
            .await?;
        tracing::info!("Pushed {} to fork", branch);

        state.pushed = true;
        state.advance(GatewayStage::Pushed);
        Ok(())
    }

    /// Return the open pull request for this branch, opening one if none
    /// exists
    pub async fn open_or_reuse_pr(
        &self,
        state: &mut RepositoryState,
        title: &str,
        body: &str,
    ) -> ContributionResult<PullRequestRef> {
        if let Some(pr) = &state.pull_request {
            tracing::debug!("Guard pr_known satisfied: {}", pr.url);
            return Ok(pr.clone());
        }

        let (branch, base) = match (&state.branch, &state.base_branch) {
            (Some(branch), Some(base)) if state.reached(GatewayStage::Pushed) => (branch.clone(), base.clone()),
            _ => return Err(out_of_order(Step::OpenPullRequest, GatewayStage::Pushed, state)),
        };

        let request = NewPullRequest {
            title: title.to_string(),
            body: body.to_string(),
            head_owner: self.session.login.clone(),
            branch,
            base,
        };
        let head = request.head();

        let hosting = &self.hosting;
        let upstream = &self.settings.upstream;
        let retry = &self.settings.retry;
        let head_ref = head.as_str();

        let existing = retry
            .run("find pull request", move || {
                hosting.find_open_pull_request(upstream, head_ref)
            })
            .await?;

        let pr = match existing {
            Some(pr) => {
                tracing::info!("Reusing open pull request {}", pr.url);
                pr
            }
            None => {
                let new_pr = &request;
                let pr = retry
                    .run("open pull request", move || {
                        hosting.create_pull_request(upstream, new_pr)
                    })
                    .await?;
                tracing::info!("Opened pull request {}", pr.url);
                pr
            }
        };

        state.pull_request = Some(pr.clone());
        state.advance(GatewayStage::PrOpened);
        Ok(pr)
    }
}

fn is_fork_of(repo: &RemoteRepository, upstream: &RepoRef) -> bool {
    repo.fork
        && repo
            .parent
            .as_ref()
            .map_or(true, |parent| parent.full_name().eq_ignore_ascii_case(&upstream.full_name()))
}

fn out_of_order(step: Step, needed: GatewayStage, state: &RepositoryState) -> ContributionError {
    ContributionError::invalid_request(format!(
        "{} needs stage {} but the contribution is at {}",
        step, needed, state.stage
    ))
}
