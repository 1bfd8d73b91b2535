use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{HostingApi, NewPullRequest, PullRequestRef, RemoteRepository, RepoRef, Session};
use crate::config::GitHubConfig;
use crate::error::{ContributionError, ContributionResult};
use crate::utils::run_command;

const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiParent {
    name: String,
    owner: ApiOwner,
}

#[derive(Debug, Deserialize)]
struct ApiRepository {
    name: String,
    owner: ApiOwner,
    default_branch: String,
    clone_url: String,
    #[serde(default)]
    fork: bool,
    parent: Option<ApiParent>,
}

impl From<ApiRepository> for RemoteRepository {
    fn from(repo: ApiRepository) -> Self {
        RemoteRepository {
            owner: repo.owner.login,
            name: repo.name,
            default_branch: repo.default_branch,
            clone_url: repo.clone_url,
            fork: repo.fork,
            parent: repo.parent.map(|p| RepoRef::new(p.owner.login, p.name)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    html_url: String,
    number: u64,
}

impl From<ApiPull> for PullRequestRef {
    fn from(pull: ApiPull) -> Self {
        PullRequestRef {
            url: pull.html_url,
            number: pull.number,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreatePull<'a> {
    title: &'a str,
    body: &'a str,
    head: String,
    base: &'a str,
    maintainer_can_modify: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

/// GitHub REST API v3 client
pub struct GitHubApi {
    client: Client,
    api_url: String,
    token: String,
}

impl GitHubApi {
    pub fn new(api_url: &str, token: impl Into<String>, timeout: Duration) -> ContributionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ContributionError::hosting_api(None, format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, builder: RequestBuilder) -> ContributionResult<Response> {
        builder
            .send()
            .await
            .map_err(|e| ContributionError::hosting_api(None, format!("Request failed: {}", e)))
    }

    async fn fetch_open_pull(&self, upstream: &RepoRef, head: &str) -> ContributionResult<Option<PullRequestRef>> {
        let builder = self
            .request(reqwest::Method::GET, &format!("/repos/{}/pulls", upstream.full_name()))
            .query(&[("state", "open"), ("head", head)]);
        let response = check(self.send(builder).await?).await?;
        let pulls: Vec<ApiPull> = decode(response).await?;
        Ok(pulls.into_iter().next().map(PullRequestRef::from))
    }
}

/// Map a non-success response onto the error taxonomy
async fn check(response: Response) -> ContributionResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let rate_limited = status == StatusCode::FORBIDDEN
        && response
            .headers()
            .get("x-ratelimit-remaining")
            .map_or(false, |remaining| remaining == "0");
    let message = error_message(response).await;

    Err(match status {
        StatusCode::UNAUTHORIZED => ContributionError::Auth(message),
        _ if rate_limited => ContributionError::hosting_api(Some(429), message),
        _ => ContributionError::hosting_api(Some(status.as_u16()), message),
    })
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let body: ApiErrorBody = response.json().await.unwrap_or_default();

    let details: Vec<String> = body.errors.into_iter().filter_map(|e| e.message).collect();
    match (body.message.is_empty(), details.is_empty()) {
        (true, _) => status.to_string(),
        (false, true) => body.message,
        (false, false) => format!("{}: {}", body.message, details.join("; ")),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ContributionResult<T> {
    response
        .json()
        .await
        .map_err(|e| ContributionError::hosting_api(None, format!("Unreadable API response: {}", e)))
}

#[async_trait]
impl HostingApi for GitHubApi {
    async fn authenticated_user(&self) -> ContributionResult<String> {
        let response = check(self.send(self.request(reqwest::Method::GET, "/user")).await?).await?;
        let user: ApiUser = decode(response).await?;
        Ok(user.login)
    }

    async fn get_repository(&self, repo: &RepoRef) -> ContributionResult<Option<RemoteRepository>> {
        let builder = self.request(reqwest::Method::GET, &format!("/repos/{}", repo.full_name()));
        let response = self.send(builder).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let repository: ApiRepository = decode(check(response).await?).await?;
        Ok(Some(repository.into()))
    }

    async fn create_fork(&self, upstream: &RepoRef) -> ContributionResult<RemoteRepository> {
        let builder = self
            .request(reqwest::Method::POST, &format!("/repos/{}/forks", upstream.full_name()))
            .json(&serde_json::json!({}));
        let response = check(self.send(builder).await?).await?;
        let fork: ApiRepository = decode(response).await?;
        Ok(fork.into())
    }

    async fn find_open_pull_request(
        &self,
        upstream: &RepoRef,
        head: &str,
    ) -> ContributionResult<Option<PullRequestRef>> {
        self.fetch_open_pull(upstream, head).await
    }

    async fn create_pull_request(
        &self,
        upstream: &RepoRef,
        request: &NewPullRequest,
    ) -> ContributionResult<PullRequestRef> {
        let head = request.head();
        let builder = self
            .request(reqwest::Method::POST, &format!("/repos/{}/pulls", upstream.full_name()))
            .json(&CreatePull {
                title: &request.title,
                body: &request.body,
                head: head.clone(),
                base: &request.base,
                maintainer_can_modify: true,
            });

        match check(self.send(builder).await?).await {
            Ok(response) => {
                let pull: ApiPull = decode(response).await?;
                Ok(pull.into())
            }
            // an earlier attempt may have opened it before its response was lost
            Err(ContributionError::HostingApi { status: Some(422), message })
                if message.contains("already exists") =>
            {
                tracing::debug!("Pull request for {} already exists, looking it up", head);
                self.fetch_open_pull(upstream, &head).await?.ok_or_else(|| {
                    ContributionError::hosting_api(Some(422), message)
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// First token found in the configuration, `GITHUB_TOKEN`, `GH_TOKEN`, or
/// `gh auth token`
pub async fn resolve_token(configured: Option<&str>, timeout: Duration) -> ContributionResult<String> {
    if let Some(token) = first_token(configured, |key| std::env::var(key).ok()) {
        return Ok(token);
    }

    if let Ok(output) = run_command("gh", &["auth", "token"], None, &[], timeout).await {
        let token = output.stdout.trim();
        if output.success && !token.is_empty() {
            tracing::debug!("Using token from gh auth");
            return Ok(token.to_string());
        }
    }

    Err(ContributionError::Auth(
        "No GitHub token found: set github.token, GITHUB_TOKEN or GH_TOKEN, or run `gh auth login`"
            .to_string(),
    ))
}

fn first_token(configured: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Option<String> {
    configured
        .map(str::to_string)
        .into_iter()
        .chain(["GITHUB_TOKEN", "GH_TOKEN"].into_iter().filter_map(|key| env(key)))
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

/// Resolve a token and validate it against `/user`
pub async fn establish_session(
    config: &GitHubConfig,
    network_timeout: Duration,
    command_timeout: Duration,
) -> ContributionResult<(GitHubApi, Session)> {
    let token = resolve_token(config.token.as_deref(), command_timeout).await?;
    let api = GitHubApi::new(&config.api_url, token.clone(), network_timeout)?;
    let login = api.authenticated_user().await?;
    tracing::info!("Authenticated as {}", login);

    Ok((api, Session { login, token }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn api(server: &mockito::ServerGuard) -> GitHubApi {
        GitHubApi::new(&server.url(), "t0ken", Duration::from_secs(5)).unwrap()
    }

    fn upstream() -> RepoRef {
        RepoRef::new("bitcointranscripts", "bitcointranscripts")
    }

    fn new_pull() -> NewPullRequest {
        NewPullRequest {
            title: "Add transcript".into(),
            body: "".into(),
            head_owner: "alice".into(),
            branch: "misc-abc123".into(),
            base: "master".into(),
        }
    }

    #[tokio::test]
    async fn test_authenticated_user() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer t0ken")
            .with_status(200)
            .with_body(r#"{"login": "alice", "id": 1}"#)
            .create_async()
            .await;

        assert_eq!(api(&server).authenticated_user().await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/user")
            .with_status(401)
            .with_body(r#"{"message": "Bad credentials"}"#)
            .create_async()
            .await;

        let err = api(&server).authenticated_user().await.unwrap_err();
        assert!(matches!(err, ContributionError::Auth(ref msg) if msg == "Bad credentials"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/bitcointranscripts/bitcointranscripts")
            .with_status(403)
            .with_header("x-ratelimit-remaining", "0")
            .with_body(r#"{"message": "API rate limit exceeded"}"#)
            .create_async()
            .await;

        let err = api(&server).get_repository(&upstream()).await.unwrap_err();
        assert!(matches!(err, ContributionError::HostingApi { status: Some(429), .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_get_repository() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/alice/bitcointranscripts")
            .with_status(200)
            .with_body(
                r#"{
                    "name": "bitcointranscripts",
                    "owner": {"login": "alice"},
                    "default_branch": "master",
                    "clone_url": "https://github.com/alice/bitcointranscripts.git",
                    "fork": true,
                    "parent": {"name": "bitcointranscripts", "owner": {"login": "bitcointranscripts"}}
                }"#,
            )
            .create_async()
            .await;
        server
            .mock("GET", "/repos/alice/missing")
            .with_status(404)
            .with_body(r#"{"message": "Not Found"}"#)
            .create_async()
            .await;

        let api = api(&server);
        let repo = api
            .get_repository(&RepoRef::new("alice", "bitcointranscripts"))
            .await
            .unwrap()
            .unwrap();
        assert!(repo.fork);
        assert_eq!(repo.parent, Some(upstream()));
        assert_eq!(repo.clone_url, "https://github.com/alice/bitcointranscripts.git");

        assert_eq!(api.get_repository(&RepoRef::new("alice", "missing")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_open_pull_request_filters_by_head() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/bitcointranscripts/bitcointranscripts/pulls")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("state".into(), "open".into()),
                Matcher::UrlEncoded("head".into(), "alice:misc-abc123".into()),
            ]))
            .with_status(200)
            .with_body(r#"[{"html_url": "https://github.com/bitcointranscripts/bitcointranscripts/pull/7", "number": 7}]"#)
            .create_async()
            .await;

        let pr = api(&server)
            .find_open_pull_request(&upstream(), "alice:misc-abc123")
            .await
            .unwrap();
        assert_eq!(pr.map(|p| p.number), Some(7));
    }

    #[tokio::test]
    async fn test_create_pull_request_reuses_existing_on_conflict() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/repos/bitcointranscripts/bitcointranscripts/pulls")
            .match_body(Matcher::PartialJsonString(
                r#"{"head": "alice:misc-abc123", "base": "master"}"#.into(),
            ))
            .with_status(422)
            .with_body(
                r#"{"message": "Validation Failed", "errors": [{"message": "A pull request already exists for alice:misc-abc123."}]}"#,
            )
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/bitcointranscripts/bitcointranscripts/pulls")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"html_url": "https://github.com/bitcointranscripts/bitcointranscripts/pull/9", "number": 9}]"#)
            .create_async()
            .await;

        let pr = api(&server).create_pull_request(&upstream(), &new_pull()).await.unwrap();
        assert_eq!(pr.number, 9);
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_validation_errors_are_terminal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/repos/bitcointranscripts/bitcointranscripts/pulls")
            .with_status(422)
            .with_body(r#"{"message": "Validation Failed", "errors": [{"message": "base is invalid"}]}"#)
            .create_async()
            .await;

        let err = api(&server).create_pull_request(&upstream(), &new_pull()).await.unwrap_err();
        assert_eq!(err.to_string(), "Hosting API error (HTTP 422): Validation Failed: base is invalid");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_token_precedence() {
        let env = |key: &str| match key {
            "GITHUB_TOKEN" => Some("from-github-token".to_string()),
            "GH_TOKEN" => Some("from-gh-token".to_string()),
            _ => None,
        };
        assert_eq!(first_token(Some("configured"), env).as_deref(), Some("configured"));
        assert_eq!(first_token(Some("  "), env).as_deref(), Some("from-github-token"));
        assert_eq!(first_token(None, |_| None), None);
        assert_eq!(
            first_token(None, |key| (key == "GH_TOKEN").then(|| "gh".to_string())).as_deref(),
            Some("gh")
        );
    }
}
