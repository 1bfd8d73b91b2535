use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::Path;
use std::time::Duration;

use super::{GitBackend, Session};
use crate::error::{ContributionError, ContributionResult};
use crate::utils::{run_command, CommandError, CommandOutput};

const PUSH_REJECTED_MARKERS: &[&str] = &[
    "[rejected]",
    "non-fast-forward",
    "fetch first",
    "Updates were rejected",
];

const AUTH_MARKERS: &[&str] = &[
    "Authentication failed",
    "could not read Username",
    "Invalid username or password",
    "The requested URL returned error: 403",
];

const NETWORK_MARKERS: &[&str] = &[
    "Could not resolve host",
    "Connection timed out",
    "Connection refused",
    "Connection reset",
    "unable to access",
    "early EOF",
    "RPC failed",
    "remote end hung up",
];

/// [`GitBackend`] driving the `git` executable.
///
/// Credentials go through an `http.extraheader` scoped to the hosting
/// platform, set via `GIT_CONFIG_*` so nothing is written to the repository
/// config or embedded in remote URLs.
pub struct GitCli {
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl GitCli {
    pub fn new(session: &Session, git_host: &str, timeout: Duration) -> Self {
        let email = format!("{}@users.noreply.github.com", session.login);
        let mut envs = vec![
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            ("GIT_AUTHOR_NAME".to_string(), session.login.clone()),
            ("GIT_AUTHOR_EMAIL".to_string(), email.clone()),
            ("GIT_COMMITTER_NAME".to_string(), session.login.clone()),
            ("GIT_COMMITTER_EMAIL".to_string(), email),
        ];

        if !session.token.is_empty() {
            let credentials = BASE64.encode(format!("x-access-token:{}", session.token));
            envs.extend([
                ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
                (
                    "GIT_CONFIG_KEY_0".to_string(),
                    format!("http.{}/.extraheader", git_host.trim_end_matches('/')),
                ),
                (
                    "GIT_CONFIG_VALUE_0".to_string(),
                    format!("AUTHORIZATION: basic {}", credentials),
                ),
            ]);
        }

        Self { envs, timeout }
    }

    async fn git(&self, dir: Option<&Path>, args: &[&str]) -> ContributionResult<CommandOutput> {
        run_command("git", args, dir, &self.envs, self.timeout)
            .await
            .map_err(|e| match e {
                CommandError::NotFound(_) => ContributionError::DependencyMissing("git".to_string()),
                CommandError::TimedOut { .. } => ContributionError::network(e.to_string()),
                CommandError::Spawn { .. } => ContributionError::Git(e.to_string()),
            })
    }

    /// Run git and turn a non-zero exit into a classified error
    async fn git_ok(&self, dir: Option<&Path>, args: &[&str], branch: Option<&str>) -> ContributionResult<String> {
        let output = self.git(dir, args).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(classify_failure(&output.stderr, branch))
        }
    }
}

/// Sort a failed git invocation into the error taxonomy by its stderr
pub fn classify_failure(stderr: &str, branch: Option<&str>) -> ContributionError {
    let stderr = stderr.trim();

    if let Some(branch) = branch {
        if PUSH_REJECTED_MARKERS.iter().any(|m| stderr.contains(m)) {
            return ContributionError::PushConflict {
                branch: branch.to_string(),
            };
        }
    }

    if AUTH_MARKERS.iter().any(|m| stderr.contains(m)) {
        return ContributionError::Auth(stderr.to_string());
    }

    if NETWORK_MARKERS.iter().any(|m| stderr.contains(m)) {
        return ContributionError::network(stderr.to_string());
    }

    ContributionError::Git(stderr.to_string())
}

/// Classify a failed clone. A fork created moments earlier can answer
/// "Repository not found" until the hosting platform finishes copying it,
/// so only here is that retryable.
pub fn classify_clone_failure(stderr: &str) -> ContributionError {
    if stderr.contains("Repository not found") {
        return ContributionError::network(stderr.trim().to_string());
    }
    classify_failure(stderr, None)
}

#[async_trait]
impl GitBackend for GitCli {
    async fn is_repository(&self, path: &Path) -> bool {
        if !path.join(".git").exists() {
            return false;
        }
        match self.git(Some(path), &["rev-parse", "--is-inside-work-tree"]).await {
            Ok(output) => output.success && output.stdout.trim() == "true",
            Err(_) => false,
        }
    }

    async fn clone_repo(&self, url: &str, path: &Path) -> ContributionResult<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let target = path.to_string_lossy();
        let output = self
            .git(None, &["clone", "--origin", "origin", url, target.as_ref()])
            .await?;
        if output.success {
            Ok(())
        } else {
            Err(classify_clone_failure(&output.stderr))
        }
    }

    async fn ensure_remote(&self, path: &Path, name: &str, url: &str) -> ContributionResult<()> {
        let existing = self.git(Some(path), &["remote", "get-url", name]).await?;
        if existing.success {
            if existing.stdout.trim() != url {
                self.git_ok(Some(path), &["remote", "set-url", name, url], None).await?;
            }
        } else {
            self.git_ok(Some(path), &["remote", "add", name, url], None).await?;
        }
        Ok(())
    }

    async fn fetch(&self, path: &Path, remote: &str) -> ContributionResult<()> {
        self.git_ok(Some(path), &["fetch", "--prune", remote], None).await?;
        Ok(())
    }

    async fn reset_branch(&self, path: &Path, branch: &str, start_point: &str) -> ContributionResult<()> {
        self.git_ok(Some(path), &["checkout", "-B", branch, start_point], None)
            .await?;
        Ok(())
    }

    async fn local_branch_exists(&self, path: &Path, branch: &str) -> ContributionResult<bool> {
        let reference = format!("refs/heads/{}", branch);
        let output = self
            .git(Some(path), &["rev-parse", "--verify", "--quiet", &reference])
            .await?;
        Ok(output.success)
    }

    async fn remote_branch_exists(&self, path: &Path, remote: &str, branch: &str) -> ContributionResult<bool> {
        let reference = format!("refs/remotes/{}/{}", remote, branch);
        let output = self
            .git(Some(path), &["rev-parse", "--verify", "--quiet", &reference])
            .await?;
        Ok(output.success)
    }

    async fn current_branch(&self, path: &Path) -> ContributionResult<Option<String>> {
        let output = self
            .git(Some(path), &["symbolic-ref", "--quiet", "--short", "HEAD"])
            .await?;
        Ok(output
            .success
            .then(|| output.stdout.trim().to_string())
            .filter(|branch| !branch.is_empty()))
    }

    async fn checkout(&self, path: &Path, branch: &str) -> ContributionResult<()> {
        self.git_ok(Some(path), &["checkout", branch], None).await?;
        Ok(())
    }

    async fn create_branch(&self, path: &Path, branch: &str, start_point: &str) -> ContributionResult<()> {
        self.git_ok(Some(path), &["checkout", "-b", branch, start_point], None)
            .await?;
        Ok(())
    }

    async fn stage(&self, path: &Path, file: &Path) -> ContributionResult<()> {
        let file = file.to_string_lossy();
        self.git_ok(Some(path), &["add", "--", file.as_ref()], None).await?;
        Ok(())
    }

    async fn has_staged_changes(&self, path: &Path) -> ContributionResult<bool> {
        let staged = self
            .git_ok(Some(path), &["diff", "--cached", "--name-only"], None)
            .await?;
        Ok(!staged.trim().is_empty())
    }

    async fn commit(&self, path: &Path, message: &str) -> ContributionResult<()> {
        self.git_ok(Some(path), &["commit", "--quiet", "-m", message], None)
            .await?;
        Ok(())
    }

    async fn push(&self, path: &Path, remote: &str, branch: &str) -> ContributionResult<()> {
        self.git_ok(
            Some(path),
            &["push", "--set-upstream", remote, branch],
            Some(branch),
        )
        .await?;
        Ok(())
    }
}
