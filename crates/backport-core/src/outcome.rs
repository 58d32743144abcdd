//! Job context and outcome.
//!
//! A job body returns a [`JobOutcome`]; the reporter is the single place that
//! turns it into platform side effects.

use serde::{Deserialize, Serialize};

use crate::annotate::ConflictAnnotation;
use crate::fingerprint::{BackportPurpose, JobFingerprint};
use crate::platform::{PullRequest, RepoSlug};

/// One requested backport of a pull request onto a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackportRequest {
    pub repo: RepoSlug,
    pub pull_request: PullRequest,
    pub target_branch: String,
    pub purpose: BackportPurpose,
    /// Removed from the original PR on success.
    pub label_to_remove: Option<String>,
    /// Added to the original PR on success.
    pub label_to_add: Option<String>,
}

impl BackportRequest {
    pub fn fingerprint(&self) -> JobFingerprint {
        JobFingerprint::new(
            &self.pull_request.head_sha,
            &self.target_branch,
            self.purpose,
        )
    }
}

/// Patches applied cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackportSuccess {
    pub temp_branch: String,
    pub patch_count: usize,
}

/// A patch stopped with conflicts; analysis of the tree it left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub raw_diff: String,
    pub annotations: Vec<ConflictAnnotation>,
    pub detail: String,
}

/// Why a job did no work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NoCommits,
    TooManyCommits { count: usize, limit: usize },
}

/// How a job body ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Success(BackportSuccess),
    Conflict(ConflictReport),
    Skipped(SkipReason),
    /// Infrastructure failure or panic; the message is for logs only.
    Aborted { message: String },
}

impl JobOutcome {
    pub fn aborted(message: impl Into<String>) -> Self {
        JobOutcome::Aborted {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Success(_) => "success",
            JobOutcome::Conflict(_) => "conflict",
            JobOutcome::Skipped(_) => "skipped",
            JobOutcome::Aborted { .. } => "aborted",
        }
    }
}
