//! Collaborator capabilities consumed by the engine.
//!
//! - [`PlatformApi`]: pull requests, commits, comments, check runs, labels, branches
//! - [`TokenProvider`]: short-lived repository-scoped access tokens
//!
//! Both are async and backend-agnostic. In-memory fakes live in
//! [`crate::fakes`]; the GitHub implementation lives in `backport-github`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotate::ConflictAnnotation;
use crate::error::PlatformError;

/// Result type for platform operations.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// `owner/name` repository slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`.
    pub fn parse(slug: &str) -> Option<Self> {
        let (owner, name) = slug.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Short-lived token scoped to one repository. Never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

/// The originating change, as far as the engine needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub head_sha: String,
    pub base_sha: String,
    pub base_ref: String,
    pub head_ref: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub merged: bool,
    pub author: String,
}

/// Request to open a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
    pub maintainer_can_modify: bool,
}

/// A created pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    #[serde(default)]
    pub html_url: String,
}

/// A created comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRef {
    pub id: u64,
}

// ---------------------------------------------------------------------------
// Check runs
// ---------------------------------------------------------------------------

/// Check-run lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

/// Terminal check-run conclusion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
}

/// Title/summary/annotations payload of a check run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckOutput {
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<ConflictAnnotation>>,
}

/// An existing check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
}

/// Request to create a check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCheckRun {
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
}

/// Partial update of a check run. Unset fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckRunUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CheckStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<CheckConclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CheckOutput>,
}

impl CheckRunUpdate {
    /// Move the run to a non-terminal status.
    pub fn status(status: CheckStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Complete the run with a conclusion and output, stamped now.
    pub fn conclude(conclusion: CheckConclusion, output: CheckOutput) -> Self {
        Self {
            status: None,
            conclusion: Some(conclusion),
            completed_at: Some(Utc::now()),
            output: Some(output),
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Code-hosting platform API.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Name of the repository's default branch.
    async fn default_branch(&self, repo: &RepoSlug) -> PlatformResult<String>;

    /// Fetch one pull request.
    async fn get_pull_request(&self, repo: &RepoSlug, number: u64) -> PlatformResult<PullRequest>;

    /// Commit SHAs of a pull request, in rev-list order.
    async fn list_pull_request_commits(
        &self,
        repo: &RepoSlug,
        number: u64,
    ) -> PlatformResult<Vec<String>>;

    /// Patch text for one commit, authenticated with a repository token.
    async fn get_commit_patch(
        &self,
        repo: &RepoSlug,
        sha: &str,
        token: &AccessToken,
    ) -> PlatformResult<String>;

    async fn create_pull_request(
        &self,
        repo: &RepoSlug,
        request: NewPullRequest,
    ) -> PlatformResult<PullRequestRef>;

    async fn create_comment(
        &self,
        repo: &RepoSlug,
        issue_number: u64,
        body: &str,
    ) -> PlatformResult<CommentRef>;

    async fn update_comment(
        &self,
        repo: &RepoSlug,
        comment_id: u64,
        body: &str,
    ) -> PlatformResult<()>;

    /// Check runs attached to a commit.
    async fn list_check_runs(&self, repo: &RepoSlug, head_sha: &str)
        -> PlatformResult<Vec<CheckRun>>;

    async fn create_check_run(
        &self,
        repo: &RepoSlug,
        request: NewCheckRun,
    ) -> PlatformResult<CheckRun>;

    async fn update_check_run(
        &self,
        repo: &RepoSlug,
        check_run_id: u64,
        update: CheckRunUpdate,
    ) -> PlatformResult<()>;

    async fn add_labels(
        &self,
        repo: &RepoSlug,
        issue_number: u64,
        labels: &[String],
    ) -> PlatformResult<()>;

    /// Remove one label. Removing an absent label is not an error.
    async fn remove_label(&self, repo: &RepoSlug, issue_number: u64, label: &str)
        -> PlatformResult<()>;

    async fn branch_exists(&self, repo: &RepoSlug, branch: &str) -> PlatformResult<bool>;

    /// Delete a branch reference (`heads/<branch>`).
    async fn delete_branch(&self, repo: &RepoSlug, branch: &str) -> PlatformResult<()>;
}

/// Source of repository-scoped access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn repo_token(&self, repo: &RepoSlug) -> PlatformResult<AccessToken>;
}
