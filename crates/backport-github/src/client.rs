//! GitHub REST client implementing [`PlatformApi`].

use async_trait::async_trait;
use backport_core::{
    AccessToken, CheckRun, CheckRunUpdate, CommentRef, GitHubConfig, NewCheckRun, NewPullRequest,
    PlatformApi, PlatformResult, PullRequest, PullRequestRef, RepoSlug,
};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{GitHubError, Result};
use crate::models::{
    CommentBody, LabelsBody, WireCheckRun, WireCheckRunList, WireCommit, WirePullRequest,
    WireRepository,
};

/// Media type GitHub uses to return a commit as a mailbox patch.
pub const PATCH_MEDIA_TYPE: &str = "application/vnd.github.VERSION.patch";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const PAGE_SIZE: usize = 100;

/// Authenticated GitHub REST client.
pub struct GitHubClient {
    api_url: Url,
    token: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url.as_str())
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let api_url = Url::parse(api_url).map_err(|e| GitHubError::InvalidUrl(e.to_string()))?;
        if api_url.cannot_be_a_base() {
            return Err(GitHubError::InvalidUrl(api_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("backport/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            api_url,
            token: token.to_string(),
            http,
        })
    }

    /// Client for the configured endpoint and token.
    pub fn from_config(config: &GitHubConfig) -> Result<Self> {
        let token = config.token.as_deref().ok_or(GitHubError::MissingToken)?;
        Self::new(&config.api_url, token)
    }

    /// API URL with `segments` appended, each percent-encoded.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| GitHubError::InvalidUrl(self.api_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_endpoint(&self, repo: &RepoSlug, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str()];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, path = url.path(), "github request");
        self.http
            .request(method, url)
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .header(AUTHORIZATION, format!("token {}", self.token))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GitHubError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.execute(self.request(Method::GET, url)).await?;
        Ok(response.json().await?)
    }

    async fn send_json<B, T>(&self, method: Method, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.execute(self.request(method, url).json(body)).await?;
        Ok(response.json().await?)
    }

    async fn send_empty<B>(&self, method: Method, url: Url, body: Option<&B>) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(request).await.map(|_| ())
    }
}

fn is_missing(err: &GitHubError) -> bool {
    matches!(err, GitHubError::Status { status: 404, .. })
}

#[async_trait]
impl PlatformApi for GitHubClient {
    async fn default_branch(&self, repo: &RepoSlug) -> PlatformResult<String> {
        let url = self.repo_endpoint(repo, &[])?;
        let repository: WireRepository = self.get_json(url).await?;
        Ok(repository.default_branch)
    }

    async fn get_pull_request(&self, repo: &RepoSlug, number: u64) -> PlatformResult<PullRequest> {
        let url = self.repo_endpoint(repo, &["pulls", &number.to_string()])?;
        let pr: WirePullRequest = self.get_json(url).await?;
        Ok(pr.into())
    }

    async fn list_pull_request_commits(
        &self,
        repo: &RepoSlug,
        number: u64,
    ) -> PlatformResult<Vec<String>> {
        let mut shas = Vec::new();
        for page in 1u32.. {
            let mut url = self.repo_endpoint(repo, &["pulls", &number.to_string(), "commits"])?;
            url.query_pairs_mut()
                .append_pair("per_page", &PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());

            let batch: Vec<WireCommit> = self.get_json(url).await?;
            let last_page = batch.len() < PAGE_SIZE;
            shas.extend(batch.into_iter().map(|c| c.sha));
            if last_page {
                break;
            }
        }
        Ok(shas)
    }

    async fn get_commit_patch(
        &self,
        repo: &RepoSlug,
        sha: &str,
        token: &AccessToken,
    ) -> PlatformResult<String> {
        let url = self.repo_endpoint(repo, &["commits", sha])?;
        let request = self
            .http
            .get(url)
            .header(ACCEPT, PATCH_MEDIA_TYPE)
            .header(AUTHORIZATION, format!("token {}", token.secret()));
        let response = self.execute(request).await?;
        Ok(response.text().await.map_err(GitHubError::from)?)
    }

    async fn create_pull_request(
        &self,
        repo: &RepoSlug,
        request: NewPullRequest,
    ) -> PlatformResult<PullRequestRef> {
        let url = self.repo_endpoint(repo, &["pulls"])?;
        Ok(self.send_json(Method::POST, url, &request).await?)
    }

    async fn create_comment(
        &self,
        repo: &RepoSlug,
        issue_number: u64,
        body: &str,
    ) -> PlatformResult<CommentRef> {
        let url = self.repo_endpoint(repo, &["issues", &issue_number.to_string(), "comments"])?;
        Ok(self
            .send_json(Method::POST, url, &CommentBody { body })
            .await?)
    }

    async fn update_comment(
        &self,
        repo: &RepoSlug,
        comment_id: u64,
        body: &str,
    ) -> PlatformResult<()> {
        let url = self.repo_endpoint(repo, &["issues", "comments", &comment_id.to_string()])?;
        Ok(self
            .send_empty(Method::PATCH, url, Some(&CommentBody { body }))
            .await?)
    }

    async fn list_check_runs(
        &self,
        repo: &RepoSlug,
        head_sha: &str,
    ) -> PlatformResult<Vec<CheckRun>> {
        let mut url = self.repo_endpoint(repo, &["commits", head_sha, "check-runs"])?;
        url.query_pairs_mut()
            .append_pair("per_page", &PAGE_SIZE.to_string());
        let list: WireCheckRunList = self.get_json(url).await?;
        Ok(list.check_runs.into_iter().map(CheckRun::from).collect())
    }

    async fn create_check_run(
        &self,
        repo: &RepoSlug,
        request: NewCheckRun,
    ) -> PlatformResult<CheckRun> {
        let url = self.repo_endpoint(repo, &["check-runs"])?;
        let run: WireCheckRun = self.send_json(Method::POST, url, &request).await?;
        Ok(run.into())
    }

    async fn update_check_run(
        &self,
        repo: &RepoSlug,
        check_run_id: u64,
        update: CheckRunUpdate,
    ) -> PlatformResult<()> {
        let url = self.repo_endpoint(repo, &["check-runs", &check_run_id.to_string()])?;
        Ok(self.send_empty(Method::PATCH, url, Some(&update)).await?)
    }

    async fn add_labels(
        &self,
        repo: &RepoSlug,
        issue_number: u64,
        labels: &[String],
    ) -> PlatformResult<()> {
        let url = self.repo_endpoint(repo, &["issues", &issue_number.to_string(), "labels"])?;
        Ok(self
            .send_empty(Method::POST, url, Some(&LabelsBody { labels }))
            .await?)
    }

    async fn remove_label(
        &self,
        repo: &RepoSlug,
        issue_number: u64,
        label: &str,
    ) -> PlatformResult<()> {
        let url = self.repo_endpoint(
            repo,
            &["issues", &issue_number.to_string(), "labels", label],
        )?;
        match self.send_empty::<()>(Method::DELETE, url, None).await {
            Err(e) if is_missing(&e) => {
                debug!(label, "label was not present");
                Ok(())
            }
            other => Ok(other?),
        }
    }

    async fn branch_exists(&self, repo: &RepoSlug, branch: &str) -> PlatformResult<bool> {
        let mut rest = vec!["branches"];
        rest.extend(branch.split('/'));
        let url = self.repo_endpoint(repo, &rest)?;
        match self.send_empty::<()>(Method::GET, url, None).await {
            Ok(()) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_branch(&self, repo: &RepoSlug, branch: &str) -> PlatformResult<()> {
        let mut rest = vec!["git", "refs", "heads"];
        rest.extend(branch.split('/'));
        let url = self.repo_endpoint(repo, &rest)?;
        Ok(self.send_empty::<()>(Method::DELETE, url, None).await?)
    }
}
