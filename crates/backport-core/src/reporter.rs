//! Maps (purpose, outcome) to platform side effects.
//!
//! | purpose          | outcome  | effect                                              |
//! |------------------|----------|-----------------------------------------------------|
//! | Check            | success  | check run `success`, "Clean Backport"               |
//! | Check            | conflict | check run `neutral` with diff text and annotations  |
//! | ExecuteBackport  | success  | open PR, breadcrumb comment, label swaps            |
//! | ExecuteBackport  | conflict | "backport manually" comment, `target` -> `needs-manual` |
//!
//! `Aborted` takes the conflict row without diff or annotations. A skipped
//! Check concludes its run `neutral`; a skipped ExecuteBackport over the
//! commit limit comments on the PR.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::fingerprint::BackportPurpose;
use crate::labels::label_for;
use crate::notes::backport_body;
use crate::outcome::{BackportRequest, BackportSuccess, ConflictReport, JobOutcome, SkipReason};
use crate::platform::{
    CheckConclusion, CheckOutput, CheckRun, CheckRunUpdate, CheckStatus, NewPullRequest,
    PlatformApi,
};

/// Fence around the failed diff in check-run text.
const MD_SEPARATOR: &str = "``````````````````````````````";

pub const TOO_MANY_COMMITS_COMMENT: &str =
    "This PR has exceeded the automatic backport commit limit and must be performed manually.";

/// Single dispatcher from job outcome to reporting path.
#[derive(Clone)]
pub struct StatusReporter {
    platform: Arc<dyn PlatformApi>,
    config: Arc<EngineConfig>,
}

impl StatusReporter {
    pub fn new(platform: Arc<dyn PlatformApi>, config: Arc<EngineConfig>) -> Self {
        Self { platform, config }
    }

    /// Report `outcome`. Reporting errors are logged, never raised.
    pub async fn dispatch(&self, request: &BackportRequest, outcome: JobOutcome) {
        let kind = outcome.label();
        let result = match outcome {
            JobOutcome::Success(success) => self.report_success(request, &success).await,
            JobOutcome::Conflict(report) => self.report_failure(request, Some(&report)).await,
            JobOutcome::Aborted { message } => {
                warn!(error = %message, "backport aborted");
                self.report_failure(request, None).await
            }
            JobOutcome::Skipped(reason) => self.report_skipped(request, &reason).await,
        };

        match result {
            Ok(()) => debug!(outcome = kind, "outcome reported"),
            Err(e) => error!(outcome = kind, error = %e, "failed to report backport outcome"),
        }
    }

    /// Move the request's check run, if any, to `in_progress`.
    pub async fn mark_in_progress(&self, request: &BackportRequest) -> Result<()> {
        if let Some(run) = self.find_check(request).await? {
            self.platform
                .update_check_run(
                    &request.repo,
                    run.id,
                    CheckRunUpdate::status(CheckStatus::InProgress),
                )
                .await?;
        }
        Ok(())
    }

    /// The check run named for this request's target branch.
    pub async fn find_check(&self, request: &BackportRequest) -> Result<Option<CheckRun>> {
        let name = self.config.check_name(&request.target_branch);
        let runs = self
            .platform
            .list_check_runs(&request.repo, &request.pull_request.head_sha)
            .await?;
        Ok(runs.into_iter().find(|run| run.name == name))
    }

    async fn report_success(&self, request: &BackportRequest, success: &BackportSuccess) -> Result<()> {
        let repo = &request.repo;
        let pr = &request.pull_request;
        let branch = &request.target_branch;

        if request.purpose == BackportPurpose::ExecuteBackport {
            info!("creating pull request");
            let new_pr = self
                .platform
                .create_pull_request(
                    repo,
                    NewPullRequest {
                        title: pr.title.clone(),
                        head: success.temp_branch.clone(),
                        base: branch.clone(),
                        body: backport_body(pr),
                        maintainer_can_modify: false,
                    },
                )
                .await?;

            self.platform
                .create_comment(
                    repo,
                    pr.number,
                    &format!(
                        "I have automatically backported this PR to \"{branch}\", please check out #{}",
                        new_pr.number
                    ),
                )
                .await?;

            if let Some(label) = &request.label_to_remove {
                debug!(label = %label, "removing label");
                self.platform.remove_label(repo, pr.number, label).await?;
            }
            if let Some(label) = &request.label_to_add {
                debug!(label = %label, "adding label");
                self.platform
                    .add_labels(repo, pr.number, std::slice::from_ref(label))
                    .await?;
            }
            self.platform
                .add_labels(
                    repo,
                    new_pr.number,
                    &[self.config.labels.backport.clone(), branch.clone()],
                )
                .await?;
            info!(backport_pr = new_pr.number, "backport complete");
        }

        if let Some(run) = self.find_check(request).await? {
            self.platform
                .update_check_run(
                    repo,
                    run.id,
                    CheckRunUpdate::conclude(
                        CheckConclusion::Success,
                        CheckOutput {
                            title: "Clean Backport".to_string(),
                            summary: format!(
                                "This PR was checked and can be backported to \"{branch}\" cleanly."
                            ),
                            ..CheckOutput::default()
                        },
                    ),
                )
                .await?;
        }
        Ok(())
    }

    async fn report_failure(
        &self,
        request: &BackportRequest,
        conflict: Option<&ConflictReport>,
    ) -> Result<()> {
        let repo = &request.repo;
        let number = request.pull_request.number;
        let branch = &request.target_branch;

        match request.purpose {
            BackportPurpose::ExecuteBackport => {
                self.platform
                    .create_comment(
                        repo,
                        number,
                        &format!(
                            "I was unable to backport this PR to \"{branch}\" cleanly;\nyou will need to perform this backport manually."
                        ),
                    )
                    .await?;

                let labels = &self.config.labels;
                self.platform
                    .remove_label(repo, number, &label_for(&labels.target, branch))
                    .await?;
                self.platform
                    .add_labels(repo, number, &[label_for(&labels.needs_manual, branch)])
                    .await?;
            }
            BackportPurpose::Check => {
                let Some(run) = self.find_check(request).await? else {
                    return Ok(());
                };
                let output = CheckOutput {
                    title: "Backport Failed".to_string(),
                    summary: format!(
                        "This PR was checked and could not be automatically backported to \"{branch}\" cleanly"
                    ),
                    text: conflict.map(|c| failed_diff_text(&c.raw_diff)),
                    annotations: conflict.map(|c| c.annotations.clone()),
                };
                let update = CheckRunUpdate::conclude(CheckConclusion::Neutral, output);

                if let Err(e) = self
                    .platform
                    .update_check_run(repo, run.id, update.clone())
                    .await
                {
                    warn!(error = %e, "check update rejected, retrying without annotations");
                    let mut reduced = update;
                    if let Some(output) = reduced.output.as_mut() {
                        output.annotations = None;
                    }
                    self.platform.update_check_run(repo, run.id, reduced).await?;
                }
            }
        }
        Ok(())
    }

    async fn report_skipped(&self, request: &BackportRequest, reason: &SkipReason) -> Result<()> {
        match reason {
            SkipReason::NoCommits => info!("found no commits to backport"),
            SkipReason::TooManyCommits { count, limit } => {
                info!(count, limit, "too many commits, backport will not be performed")
            }
        }

        match request.purpose {
            BackportPurpose::ExecuteBackport => {
                if let SkipReason::TooManyCommits { .. } = reason {
                    self.platform
                        .create_comment(
                            &request.repo,
                            request.pull_request.number,
                            TOO_MANY_COMMITS_COMMENT,
                        )
                        .await?;
                }
            }
            // A skipped check still needs a conclusion or it stays in progress.
            BackportPurpose::Check => {
                let Some(run) = self.find_check(request).await? else {
                    return Ok(());
                };
                let (title, summary) = match reason {
                    SkipReason::NoCommits => (
                        "No Commits",
                        "This PR has no commits to backport.".to_string(),
                    ),
                    SkipReason::TooManyCommits { count, limit } => (
                        "Too Many Commits",
                        format!(
                            "This PR has {count} commits, over the automatic backport limit of {limit}; it must be backported manually."
                        ),
                    ),
                };
                self.platform
                    .update_check_run(
                        &request.repo,
                        run.id,
                        CheckRunUpdate::conclude(
                            CheckConclusion::Neutral,
                            CheckOutput {
                                title: title.to_string(),
                                summary,
                                ..CheckOutput::default()
                            },
                        ),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

fn failed_diff_text(raw_diff: &str) -> String {
    format!("Failed Diff:\n\n{MD_SEPARATOR}diff\n{raw_diff}\n{MD_SEPARATOR}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{AnnotationLevel, ConflictAnnotation};
    use crate::fakes::MemoryPlatform;
    use crate::platform::{CheckRun, PullRequest, RepoSlug};

    fn pull_request() -> PullRequest {
        PullRequest {
            number: 7,
            title: "Fix crash".to_string(),
            body: "Notes: fixed a crash".to_string(),
            head_sha: "head7".to_string(),
            base_sha: "base7".to_string(),
            base_ref: "main".to_string(),
            head_ref: "fix-crash".to_string(),
            labels: vec!["target/1-x".to_string()],
            merged: true,
            author: "dev".to_string(),
        }
    }

    fn request(purpose: BackportPurpose) -> BackportRequest {
        BackportRequest {
            repo: RepoSlug::new("o", "r"),
            pull_request: pull_request(),
            target_branch: "1-x".to_string(),
            purpose,
            label_to_remove: Some("target/1-x".to_string()),
            label_to_add: Some("in-flight/1-x".to_string()),
        }
    }

    fn check_run(id: u64) -> CheckRun {
        CheckRun {
            id,
            name: "Backportable? - 1-x".to_string(),
            head_sha: "head7".to_string(),
            status: CheckStatus::InProgress,
            conclusion: None,
        }
    }

    fn conflict() -> ConflictReport {
        ConflictReport {
            raw_diff: "diff --cc a.txt".to_string(),
            annotations: vec![ConflictAnnotation {
                path: "a.txt".to_string(),
                start_line: 3,
                end_line: 4,
                annotation_level: AnnotationLevel::Failure,
                message: "Patch Conflict".to_string(),
                raw_details: "<<<<<<< HEAD".to_string(),
            }],
            detail: "patch 1 of 1".to_string(),
        }
    }

    fn reporter(platform: Arc<MemoryPlatform>) -> StatusReporter {
        StatusReporter::new(platform, Arc::new(EngineConfig::default()))
    }

    #[tokio::test]
    async fn test_execute_success_opens_pr_and_swaps_labels() {
        let platform = Arc::new(MemoryPlatform::new().with_pull_request(pull_request(), &["c1"]));
        let outcome = JobOutcome::Success(BackportSuccess {
            temp_branch: "backport/1-x-bp-fix-crash-1".to_string(),
            patch_count: 1,
        });

        reporter(platform.clone())
            .dispatch(&request(BackportPurpose::ExecuteBackport), outcome)
            .await;

        let created = platform.created_pull_requests();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].base, "1-x");
        assert_eq!(created[0].head, "backport/1-x-bp-fix-crash-1");
        assert!(created[0].body.ends_with("Notes: fixed a crash"));

        let comments = platform.comments(7);
        assert_eq!(comments.len(), 1);
        assert!(comments[0].starts_with("I have automatically backported this PR to \"1-x\""));

        assert_eq!(platform.labels(7), vec!["in-flight/1-x"]);
    }

    #[tokio::test]
    async fn test_check_success_marks_clean() {
        let platform = Arc::new(MemoryPlatform::new().with_check_run(check_run(1)));
        reporter(platform.clone())
            .dispatch(
                &request(BackportPurpose::Check),
                JobOutcome::Success(BackportSuccess {
                    temp_branch: "t".to_string(),
                    patch_count: 1,
                }),
            )
            .await;

        let run = platform.check_run("Backportable? - 1-x").unwrap();
        assert_eq!(run.conclusion, Some(CheckConclusion::Success));
        let updates = platform.check_updates(1);
        assert_eq!(updates[0].output.as_ref().unwrap().title, "Clean Backport");
        assert!(platform.created_pull_requests().is_empty());
    }

    #[tokio::test]
    async fn test_check_conflict_is_neutral_with_diff() {
        let platform = Arc::new(MemoryPlatform::new().with_check_run(check_run(1)));
        reporter(platform.clone())
            .dispatch(&request(BackportPurpose::Check), JobOutcome::Conflict(conflict()))
            .await;

        let run = platform.check_run("Backportable? - 1-x").unwrap();
        assert_eq!(run.conclusion, Some(CheckConclusion::Neutral));
        let output = platform.check_updates(1)[0].output.clone().unwrap();
        assert_eq!(output.title, "Backport Failed");
        assert_eq!(output.annotations.unwrap().len(), 1);
        let text = output.text.unwrap();
        assert!(text.starts_with("Failed Diff:\n\n``````````````````````````````diff\n"));
        assert!(text.contains("diff --cc a.txt"));
    }

    #[tokio::test]
    async fn test_rejected_annotations_retry_without_them() {
        let platform = Arc::new(
            MemoryPlatform::new()
                .with_check_run(check_run(1))
                .rejecting_annotations(),
        );
        reporter(platform.clone())
            .dispatch(&request(BackportPurpose::Check), JobOutcome::Conflict(conflict()))
            .await;

        let updates = platform.check_updates(1);
        assert_eq!(updates.len(), 1);
        let output = updates[0].output.clone().unwrap();
        assert!(output.annotations.is_none());
        assert!(output.text.is_some());
        assert_eq!(
            platform.check_run("Backportable? - 1-x").unwrap().conclusion,
            Some(CheckConclusion::Neutral)
        );
    }

    #[tokio::test]
    async fn test_execute_conflict_requests_manual_backport() {
        let platform = Arc::new(MemoryPlatform::new().with_pull_request(pull_request(), &["c1"]));
        reporter(platform.clone())
            .dispatch(
                &request(BackportPurpose::ExecuteBackport),
                JobOutcome::Conflict(conflict()),
            )
            .await;

        let comments = platform.comments(7);
        assert_eq!(comments.len(), 1);
        assert!(comments[0].contains("you will need to perform this backport manually"));
        assert_eq!(platform.labels(7), vec!["needs-manual-bp/1-x"]);
        assert!(platform.created_pull_requests().is_empty());
    }

    #[tokio::test]
    async fn test_aborted_check_has_no_diff() {
        let platform = Arc::new(MemoryPlatform::new().with_check_run(check_run(1)));
        reporter(platform.clone())
            .dispatch(&request(BackportPurpose::Check), JobOutcome::aborted("push failed"))
            .await;

        let output = platform.check_updates(1)[0].output.clone().unwrap();
        assert_eq!(output.title, "Backport Failed");
        assert!(output.text.is_none());
        assert!(output.annotations.is_none());
    }

    #[tokio::test]
    async fn test_too_many_commits_comments_once() {
        let platform = Arc::new(MemoryPlatform::new());
        reporter(platform.clone())
            .dispatch(
                &request(BackportPurpose::ExecuteBackport),
                JobOutcome::Skipped(SkipReason::TooManyCommits {
                    count: 240,
                    limit: 240,
                }),
            )
            .await;

        assert_eq!(platform.comments(7), vec![TOO_MANY_COMMITS_COMMENT]);
    }

    #[tokio::test]
    async fn test_skipped_check_is_concluded() {
        let platform = Arc::new(MemoryPlatform::new().with_check_run(check_run(1)));
        reporter(platform.clone())
            .dispatch(
                &request(BackportPurpose::Check),
                JobOutcome::Skipped(SkipReason::TooManyCommits {
                    count: 300,
                    limit: 240,
                }),
            )
            .await;

        let run = platform.check_run("Backportable? - 1-x").unwrap();
        assert_eq!(run.status, CheckStatus::Completed);
        assert_eq!(run.conclusion, Some(CheckConclusion::Neutral));
        let output = platform.check_updates(1)[0].output.clone().unwrap();
        assert_eq!(output.title, "Too Many Commits");
        assert!(output.summary.contains("300 commits"));
        assert!(platform.comments(7).is_empty());
    }

    #[tokio::test]
    async fn test_no_commits_is_silent() {
        let platform = Arc::new(MemoryPlatform::new());
        reporter(platform.clone())
            .dispatch(
                &request(BackportPurpose::ExecuteBackport),
                JobOutcome::Skipped(SkipReason::NoCommits),
            )
            .await;
        assert!(platform.comments(7).is_empty());
    }
}
