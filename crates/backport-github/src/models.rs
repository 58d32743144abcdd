//! GitHub REST wire shapes and their conversion into engine types.

use backport_core::{CheckConclusion, CheckRun, CheckStatus, PullRequest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(crate) struct UserRef {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LabelRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchRef {
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WirePullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub head: BranchRef,
    pub base: BranchRef,
    #[serde(default)]
    pub labels: Vec<LabelRef>,
    #[serde(default)]
    pub merged: Option<bool>,
    #[serde(default)]
    pub merged_at: Option<String>,
    pub user: UserRef,
}

impl From<WirePullRequest> for PullRequest {
    fn from(pr: WirePullRequest) -> Self {
        PullRequest {
            number: pr.number,
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            head_sha: pr.head.sha,
            base_sha: pr.base.sha,
            base_ref: pr.base.ref_name,
            head_ref: pr.head.ref_name,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            merged: pr.merged.unwrap_or(pr.merged_at.is_some()),
            author: pr.user.login,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireRepository {
    pub default_branch: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCommit {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCheckRun {
    pub id: u64,
    pub name: String,
    pub head_sha: String,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCheckRunList {
    pub check_runs: Vec<WireCheckRun>,
}

impl From<WireCheckRun> for CheckRun {
    fn from(run: WireCheckRun) -> Self {
        let status = match run.status.as_str() {
            "queued" | "requested" | "waiting" | "pending" => CheckStatus::Queued,
            "in_progress" => CheckStatus::InProgress,
            _ => CheckStatus::Completed,
        };
        // Conclusions the engine has no use for count as failures.
        let conclusion = run.conclusion.map(|c| match c.as_str() {
            "success" => CheckConclusion::Success,
            "neutral" => CheckConclusion::Neutral,
            "cancelled" => CheckConclusion::Cancelled,
            _ => CheckConclusion::Failure,
        });
        CheckRun {
            id: run.id,
            name: run.name,
            head_sha: run.head_sha,
            status,
            conclusion,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CommentBody<'a> {
    pub body: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct LabelsBody<'a> {
    pub labels: &'a [String],
}
