//! In-memory hosting and git backends for gateway and pipeline tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{GitBackend, HostingApi, NewPullRequest, PullRequestRef, RemoteRepository, RepoRef};
use crate::error::{ContributionError, ContributionResult};

type Failures = Mutex<HashMap<&'static str, VecDeque<ContributionError>>>;

fn take_failure(failures: &Failures, op: &'static str) -> ContributionResult<()> {
    match failures.lock().unwrap().get_mut(op).and_then(VecDeque::pop_front) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[derive(Default)]
struct HostingInner {
    repositories: HashMap<String, RemoteRepository>,
    pulls: Vec<(String, PullRequestRef)>,
    lookups: usize,
    forks: usize,
    pr_creations: usize,
}

pub(crate) struct FakeHosting {
    login: String,
    inner: Mutex<HostingInner>,
    failures: Failures,
}

impl FakeHosting {
    /// Hosting with `bitcointranscripts/bitcointranscripts` on `master`
    pub(crate) fn new() -> Self {
        let hosting = Self {
            login: "alice".into(),
            inner: Mutex::new(HostingInner::default()),
            failures: Mutex::new(HashMap::new()),
        };
        hosting.add_repository(RemoteRepository {
            owner: "bitcointranscripts".into(),
            name: "bitcointranscripts".into(),
            default_branch: "master".into(),
            clone_url: "https://example.test/bitcointranscripts/bitcointranscripts.git".into(),
            fork: false,
            parent: None,
        });
        hosting
    }

    pub(crate) fn add_repository(&self, repo: RemoteRepository) {
        let key = repo.repo_ref().full_name();
        self.inner.lock().unwrap().repositories.insert(key, repo);
    }

    /// Make the next call to `op` fail with `err`
    pub(crate) fn fail_next(&self, op: &'static str, err: ContributionError) {
        self.failures.lock().unwrap().entry(op).or_default().push_back(err);
    }

    pub(crate) fn lookup_calls(&self) -> usize {
        self.inner.lock().unwrap().lookups
    }

    pub(crate) fn fork_calls(&self) -> usize {
        self.inner.lock().unwrap().forks
    }

    pub(crate) fn pr_creations(&self) -> usize {
        self.inner.lock().unwrap().pr_creations
    }
}

#[async_trait]
impl HostingApi for FakeHosting {
    async fn authenticated_user(&self) -> ContributionResult<String> {
        take_failure(&self.failures, "user")?;
        Ok(self.login.clone())
    }

    async fn get_repository(&self, repo: &RepoRef) -> ContributionResult<Option<RemoteRepository>> {
        self.inner.lock().unwrap().lookups += 1;
        take_failure(&self.failures, "get_repository")?;
        Ok(self.inner.lock().unwrap().repositories.get(&repo.full_name()).cloned())
    }

    async fn create_fork(&self, upstream: &RepoRef) -> ContributionResult<RemoteRepository> {
        self.inner.lock().unwrap().forks += 1;
        take_failure(&self.failures, "create_fork")?;
        let fork = RemoteRepository {
            owner: self.login.clone(),
            name: upstream.name.clone(),
            default_branch: "master".into(),
            clone_url: format!("https://example.test/{}/{}.git", self.login, upstream.name),
            fork: true,
            parent: Some(upstream.clone()),
        };
        self.add_repository(fork.clone());
        Ok(fork)
    }

    async fn find_open_pull_request(
        &self,
        _upstream: &RepoRef,
        head: &str,
    ) -> ContributionResult<Option<PullRequestRef>> {
        take_failure(&self.failures, "find_pr")?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .pulls
            .iter()
            .find(|(pr_head, _)| pr_head == head)
            .map(|(_, pr)| pr.clone()))
    }

    async fn create_pull_request(
        &self,
        upstream: &RepoRef,
        request: &NewPullRequest,
    ) -> ContributionResult<PullRequestRef> {
        take_failure(&self.failures, "create_pr")?;
        let mut inner = self.inner.lock().unwrap();
        inner.pr_creations += 1;
        let number = inner.pulls.len() as u64 + 1;
        let pr = PullRequestRef {
            url: format!("https://example.test/{}/pull/{}", upstream.full_name(), number),
            number,
        };
        inner.pulls.push((request.head(), pr.clone()));
        Ok(pr)
    }
}

#[derive(Default)]
struct GitInner {
    clones: usize,
    local_branches: HashSet<String>,
    remote_branches: HashSet<String>,
    start_points: HashMap<String, String>,
    branch_creations: HashMap<String, usize>,
    current: Option<String>,
    committed: HashMap<(String, PathBuf), String>,
    staged: Option<(PathBuf, String)>,
    commits: usize,
    pushes: usize,
}

/// Git backend that keeps branches in memory; cloning only creates the
/// directory so placed files land on real disk
#[derive(Default)]
pub(crate) struct FakeGit {
    inner: Mutex<GitInner>,
    failures: Failures,
}

impl FakeGit {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_remote_branch(&self, branch: &str) {
        self.inner.lock().unwrap().remote_branches.insert(branch.to_string());
    }

    pub(crate) fn fail_next(&self, op: &'static str, err: ContributionError) {
        self.failures.lock().unwrap().entry(op).or_default().push_back(err);
    }

    pub(crate) fn clone_calls(&self) -> usize {
        self.inner.lock().unwrap().clones
    }

    pub(crate) fn branch_creations(&self, branch: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .branch_creations
            .get(branch)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn branch_start_point(&self, branch: &str) -> Option<String> {
        self.inner.lock().unwrap().start_points.get(branch).cloned()
    }

    pub(crate) fn commit_count(&self) -> usize {
        self.inner.lock().unwrap().commits
    }

    pub(crate) fn push_count(&self) -> usize {
        self.inner.lock().unwrap().pushes
    }

    /// Mutating calls, for asserting that resumed runs skip finished steps
    pub(crate) fn mutations(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.clones + inner.branch_creations.values().sum::<usize>() + inner.commits
    }
}

#[async_trait]
impl GitBackend for FakeGit {
    async fn is_repository(&self, path: &Path) -> bool {
        path.join(".git").is_dir()
    }

    async fn clone_repo(&self, _url: &str, path: &Path) -> ContributionResult<()> {
        self.inner.lock().unwrap().clones += 1;
        take_failure(&self.failures, "clone")?;
        fs_err::create_dir_all(path.join(".git"))?;
        let mut inner = self.inner.lock().unwrap();
        inner.local_branches.insert("master".into());
        inner.current = Some("master".into());
        Ok(())
    }

    async fn ensure_remote(&self, _path: &Path, _name: &str, _url: &str) -> ContributionResult<()> {
        Ok(())
    }

    async fn fetch(&self, _path: &Path, _remote: &str) -> ContributionResult<()> {
        take_failure(&self.failures, "fetch")
    }

    async fn reset_branch(&self, _path: &Path, branch: &str, _start_point: &str) -> ContributionResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.local_branches.insert(branch.to_string());
        inner.current = Some(branch.to_string());
        Ok(())
    }

    async fn local_branch_exists(&self, _path: &Path, branch: &str) -> ContributionResult<bool> {
        Ok(self.inner.lock().unwrap().local_branches.contains(branch))
    }

    async fn remote_branch_exists(&self, _path: &Path, _remote: &str, branch: &str) -> ContributionResult<bool> {
        Ok(self.inner.lock().unwrap().remote_branches.contains(branch))
    }

    async fn current_branch(&self, _path: &Path) -> ContributionResult<Option<String>> {
        Ok(self.inner.lock().unwrap().current.clone())
    }

    async fn checkout(&self, _path: &Path, branch: &str) -> ContributionResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.local_branches.contains(branch) {
            return Err(ContributionError::Git(format!("pathspec '{}' did not match", branch)));
        }
        inner.current = Some(branch.to_string());
        Ok(())
    }

    async fn create_branch(&self, _path: &Path, branch: &str, start_point: &str) -> ContributionResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.local_branches.contains(branch) {
            return Err(ContributionError::Git(format!("branch '{}' already exists", branch)));
        }
        inner.local_branches.insert(branch.to_string());
        inner.start_points.insert(branch.to_string(), start_point.to_string());
        *inner.branch_creations.entry(branch.to_string()).or_default() += 1;
        inner.current = Some(branch.to_string());
        Ok(())
    }

    async fn stage(&self, path: &Path, file: &Path) -> ContributionResult<()> {
        let content = fs_err::read_to_string(path.join(file))?;
        let mut inner = self.inner.lock().unwrap();
        let branch = inner.current.clone().unwrap_or_default();
        let unchanged = inner.committed.get(&(branch, file.to_path_buf())) == Some(&content);
        inner.staged = (!unchanged).then(|| (file.to_path_buf(), content));
        Ok(())
    }

    async fn has_staged_changes(&self, _path: &Path) -> ContributionResult<bool> {
        Ok(self.inner.lock().unwrap().staged.is_some())
    }

    async fn commit(&self, _path: &Path, _message: &str) -> ContributionResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let branch = inner.current.clone().unwrap_or_default();
        if let Some((file, content)) = inner.staged.take() {
            inner.committed.insert((branch, file), content);
        }
        inner.commits += 1;
        Ok(())
    }

    async fn push(&self, _path: &Path, _remote: &str, branch: &str) -> ContributionResult<()> {
        self.inner.lock().unwrap().pushes += 1;
        take_failure(&self.failures, "push")?;
        self.inner.lock().unwrap().remote_branches.insert(branch.to_string());
        Ok(())
    }
}
