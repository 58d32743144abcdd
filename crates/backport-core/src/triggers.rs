//! Trigger operations: turn pull-request events into queued backports.
//!
//! Each operation is stateless. It reads the pull request, builds one
//! [`BackportRequest`] per target branch and hands it to the engine.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::BackportEngine;
use crate::error::Result;
use crate::fingerprint::BackportPurpose;
use crate::labels::{label_for, target_branches};
use crate::outcome::BackportRequest;
use crate::platform::{
    CheckConclusion, CheckOutput, CheckRunUpdate, CheckStatus, NewCheckRun, PullRequest, RepoSlug,
};
use crate::queue::JobHandle;

pub const CANCELLED_SUMMARY: &str = "This check was cancelled and can be ignored as this PR is no longer targeting this branch for a backport";

pub const NOT_MERGED_COMMENT: &str = "This PR has not been merged yet, and cannot be backported.";

pub const MANUALLY_INITIATED_COMMENT: &str =
    "The backport process for this PR has been manually initiated, here we go! :D";

fn issue_reference() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#([0-9]{1,7})").ok()).as_ref()
}

/// First `#N` reference in a pull request body.
pub fn referenced_pull_request(body: &str) -> Option<u64> {
    issue_reference()?
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn manual_backport_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)(?:^|\n)(?:manual |manually )?backport.*(?:#(\d+)|/pull/(\d+))").ok()
    })
    .as_ref()
}

/// The PR number a human-authored PR declares itself a backport of.
///
/// Matches a line starting with `backport`, `manual backport` or
/// `manually backport` that references `#N` or a `/pull/N` link.
/// Bot-authored PRs never count as manual backports.
pub fn manual_backport_of(config: &EngineConfig, pr: &PullRequest) -> Option<u64> {
    if pr.author == config.github.bot_user {
        return None;
    }
    let caps = manual_backport_pattern()?.captures(&pr.body)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

fn is_fast_tracked(config: &EngineConfig, pr: &PullRequest) -> bool {
    let rules = &config.validation;
    rules
        .fast_track_prefixes
        .iter()
        .any(|prefix| pr.title.starts_with(prefix.as_str()))
        || config.fast_track_users().contains(&pr.author.as_str())
        || rules
            .fast_track_labels
            .iter()
            .any(|label| pr.labels.contains(label))
}

fn request(
    repo: &RepoSlug,
    pr: &PullRequest,
    target_branch: &str,
    purpose: BackportPurpose,
    label_to_remove: Option<String>,
    label_to_add: Option<String>,
) -> BackportRequest {
    BackportRequest {
        repo: repo.clone(),
        pull_request: pr.clone(),
        target_branch: target_branch.to_string(),
        purpose,
        label_to_remove,
        label_to_add,
    }
}

/// Backport `pr` onto an explicitly named branch.
///
/// Returns `None` (after explaining why on the PR) when the PR is not merged
/// or the branch does not exist.
#[instrument(skip_all, fields(repo = %repo, pr = pr.number, target_branch = %branch))]
pub async fn backport_to_branch(
    engine: &BackportEngine,
    repo: &RepoSlug,
    pr: &PullRequest,
    branch: &str,
) -> Result<Option<JobHandle>> {
    let platform = engine.platform();
    if !pr.merged {
        info!("pull request not merged, refusing backport");
        platform
            .create_comment(repo, pr.number, NOT_MERGED_COMMENT)
            .await?;
        return Ok(None);
    }
    if !platform.branch_exists(repo, branch).await? {
        info!("requested branch does not exist");
        platform
            .create_comment(
                repo,
                pr.number,
                &format!("The branch you provided \"{branch}\" does not appear to exist :cry:"),
            )
            .await?;
        return Ok(None);
    }

    platform
        .create_comment(
            repo,
            pr.number,
            &format!(
                "The backport process for this PR has been manually initiated,\nsending your 1's and 0's to \"{branch}\" here we go! :D"
            ),
        )
        .await?;

    let labels = &engine.config().labels;
    Ok(Some(engine.enqueue_backport(request(
        repo,
        pr,
        branch,
        BackportPurpose::ExecuteBackport,
        None,
        Some(label_for(&labels.in_flight, branch)),
    ))))
}

/// Backport `pr` onto every branch it carries a target label for.
#[instrument(skip_all, fields(repo = %repo, pr = pr.number))]
pub fn backport_to_labels(engine: &BackportEngine, repo: &RepoSlug, pr: &PullRequest) -> Vec<JobHandle> {
    let labels = &engine.config().labels;
    target_branches(&pr.labels, &labels.target)
        .into_iter()
        .map(|branch| {
            debug!(target_branch = %branch, "backporting to label");
            engine.enqueue_backport(request(
                repo,
                pr,
                &branch,
                BackportPurpose::ExecuteBackport,
                Some(label_for(&labels.target, &branch)),
                Some(label_for(&labels.in_flight, &branch)),
            ))
        })
        .collect()
}

/// Manually requested backport of `pr` to every target label.
///
/// Refuses (with a comment) when the PR has not been merged.
#[instrument(skip_all, fields(repo = %repo, pr = pr.number))]
pub async fn backport_all_labels(
    engine: &BackportEngine,
    repo: &RepoSlug,
    pr: &PullRequest,
) -> Result<Vec<JobHandle>> {
    let platform = engine.platform();
    if !pr.merged {
        info!("pull request not merged, refusing backport");
        platform
            .create_comment(repo, pr.number, NOT_MERGED_COMMENT)
            .await?;
        return Ok(Vec::new());
    }
    platform
        .create_comment(repo, pr.number, MANUALLY_INITIATED_COMMENT)
        .await?;
    Ok(backport_to_labels(engine, repo, pr))
}

/// Queue a dry-run check per target label and cancel checks no longer targeted.
///
/// An existing check is only re-run when its last conclusion was `neutral`.
#[instrument(skip_all, fields(repo = %repo, pr = pr.number))]
pub async fn run_check(
    engine: &BackportEngine,
    repo: &RepoSlug,
    pr: &PullRequest,
) -> Result<Vec<JobHandle>> {
    let platform = engine.platform();
    let config = engine.config();

    let check_runs: Vec<_> = platform
        .list_check_runs(repo, &pr.head_sha)
        .await?
        .into_iter()
        .filter(|run| run.name.starts_with(&config.check_prefix))
        .collect();
    let targets = target_branches(&pr.labels, &config.labels.target);

    let mut handles = Vec::new();
    for branch in &targets {
        let name = config.check_name(branch);
        match check_runs.iter().find(|run| run.name == name) {
            Some(existing) if existing.conclusion != Some(CheckConclusion::Neutral) => {
                debug!(check = %name, "check already settled, skipping");
                continue;
            }
            Some(existing) => {
                platform
                    .update_check_run(repo, existing.id, CheckRunUpdate::status(CheckStatus::Queued))
                    .await?;
            }
            None => {
                platform
                    .create_check_run(
                        repo,
                        NewCheckRun {
                            name,
                            head_sha: pr.head_sha.clone(),
                            status: CheckStatus::Queued,
                            details_url: config.details_url.clone(),
                        },
                    )
                    .await?;
            }
        }

        handles.push(engine.enqueue_backport(request(
            repo,
            pr,
            branch,
            BackportPurpose::Check,
            None,
            None,
        )));
    }

    for run in &check_runs {
        let branch = run
            .name
            .strip_prefix(config.check_prefix.as_str())
            .unwrap_or(&run.name);
        if targets.iter().any(|t| t == branch) {
            continue;
        }
        info!(check = %run.name, "cancelling check for untargeted branch");
        let cancelled = CheckRunUpdate::conclude(
            CheckConclusion::Neutral,
            CheckOutput {
                title: "Cancelled".to_string(),
                summary: CANCELLED_SUMMARY.to_string(),
                text: None,
                annotations: Some(Vec::new()),
            },
        );
        if let Err(e) = platform.update_check_run(repo, run.id, cancelled).await {
            warn!(check = %run.name, error = %e, "failed to cancel check");
        }
    }

    Ok(handles)
}

/// Swap `in-flight/<branch>` for `merged/<branch>` on the original PR.
async fn mark_original_merged(
    engine: &BackportEngine,
    repo: &RepoSlug,
    original: u64,
    branch: &str,
) -> Result<()> {
    let labels = &engine.config().labels;
    let platform = engine.platform();
    platform
        .remove_label(repo, original, &label_for(&labels.in_flight, branch))
        .await?;
    platform
        .add_labels(repo, original, &[label_for(&labels.merged, branch)])
        .await?;
    info!(original, target_branch = %branch, "original pull request labelled merged");
    Ok(())
}

/// A backport PR merged: mark the original PR it references as merged.
#[instrument(skip_all, fields(repo = %repo, pr = pr.number, target_branch = %branch))]
pub async fn label_merged_backport(
    engine: &BackportEngine,
    repo: &RepoSlug,
    pr: &PullRequest,
    branch: &str,
) -> Result<Option<u64>> {
    let Some(original) = referenced_pull_request(&pr.body) else {
        debug!("no original pull request referenced");
        return Ok(None);
    };
    mark_original_merged(engine, repo, original, branch).await?;
    Ok(Some(original))
}

/// Verdict of [`validate_backport_pr`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackportValidity {
    /// The PR targets the default branch and is not a backport.
    NotABackport,
    Valid,
    /// Invalid, with the reason shown on the check.
    Invalid(String),
}

/// Check that a PR against a release branch is a legitimate backport.
///
/// A PR off the default branch must declare the PR it backports, and that PR
/// must be merged into the default branch, unless its title, author or labels
/// fast-track it. The verdict is written to the validation check run. A PR on
/// the default branch only has a stale validation check cancelled.
#[instrument(skip_all, fields(repo = %repo, pr = pr.number))]
pub async fn validate_backport_pr(
    engine: &BackportEngine,
    repo: &RepoSlug,
    pr: &PullRequest,
) -> Result<BackportValidity> {
    let platform = engine.platform();
    let config = engine.config();
    let rules = &config.validation;

    let default_branch = platform.default_branch(repo).await?;
    let existing = platform
        .list_check_runs(repo, &pr.head_sha)
        .await?
        .into_iter()
        .find(|run| run.name == rules.check_name);

    if pr.base_ref == default_branch {
        if let Some(run) = existing {
            info!("cancelling validation check on a default-branch PR");
            let cancelled = CheckRunUpdate::conclude(
                CheckConclusion::Neutral,
                CheckOutput {
                    title: "Cancelled".to_string(),
                    summary: format!("This PR is targeting {default_branch} and is not a backport"),
                    text: None,
                    annotations: Some(Vec::new()),
                },
            );
            platform.update_check_run(repo, run.id, cancelled).await?;
        }
        return Ok(BackportValidity::NotABackport);
    }

    let run = match existing {
        Some(run) => run,
        None => {
            platform
                .create_check_run(
                    repo,
                    NewCheckRun {
                        name: rules.check_name.clone(),
                        head_sha: pr.head_sha.clone(),
                        status: CheckStatus::Queued,
                        details_url: rules.docs_url.clone().or_else(|| config.details_url.clone()),
                    },
                )
                .await?
        }
    };

    let original = manual_backport_of(config, pr);
    let failure = match original {
        None if is_fast_tracked(config, pr) => None,
        None => Some("is missing a \"Backport of #{N}\" declaration.".to_string()),
        Some(number) => match platform.get_pull_request(repo, number).await {
            Ok(original) if original.base_ref != default_branch => Some(
                "the PR that it is backporting was not targeting the default branch.".to_string(),
            ),
            Ok(original) if !original.merged => {
                Some("the PR that it is backporting has not been merged yet.".to_string())
            }
            Ok(_) => None,
            Err(e) if e.is_not_found() => {
                Some(format!("the PR that it is backporting (#{number}) does not exist."))
            }
            Err(e) => return Err(e.into()),
        },
    };

    let (conclusion, output, validity) = match failure {
        None => {
            let summary = match original {
                Some(number) => format!(
                    "This PR is declared as backporting \"#{number}\" which is a valid PR that has been merged into {default_branch}"
                ),
                None => "This PR is fast-tracked and needs no backport declaration".to_string(),
            };
            let output = CheckOutput {
                title: "Valid Backport".to_string(),
                summary,
                ..CheckOutput::default()
            };
            (CheckConclusion::Success, output, BackportValidity::Valid)
        }
        Some(cause) => {
            let output = CheckOutput {
                title: "Invalid Backport".to_string(),
                summary: format!(
                    "This PR is targeting a branch that is not {default_branch} but {cause}"
                ),
                ..CheckOutput::default()
            };
            (CheckConclusion::Failure, output, BackportValidity::Invalid(cause))
        }
    };
    info!(conclusion = ?conclusion, "backport validated");
    platform
        .update_check_run(repo, run.id, CheckRunUpdate::conclude(conclusion, output))
        .await?;
    Ok(validity)
}

/// Delete the head branch of a merged bot-authored backport PR.
///
/// Returns whether a branch was deleted. Failures are logged only.
#[instrument(skip_all, fields(repo = %repo, pr = pr.number))]
pub async fn cleanup_merged_backport(engine: &BackportEngine, repo: &RepoSlug, pr: &PullRequest) -> bool {
    if !pr.merged || pr.author != engine.config().github.bot_user {
        return false;
    }
    match engine.platform().delete_branch(repo, &pr.head_ref).await {
        Ok(()) => {
            info!(branch = %pr.head_ref, "deleted merged backport branch");
            true
        }
        Err(e) => {
            warn!(branch = %pr.head_ref, error = %e, "failed to delete backport branch");
            false
        }
    }
}

/// Route a merged pull request.
///
/// A merged manual backport marks its original PR merged. Bot-authored
/// backports are cleaned up and their original relabelled; anything else is
/// backported to its target labels.
pub async fn handle_merged(
    engine: &BackportEngine,
    repo: &RepoSlug,
    pr: &PullRequest,
) -> Result<Vec<JobHandle>> {
    if !pr.merged {
        debug!(pr = pr.number, "pull request not merged, nothing to do");
        return Ok(Vec::new());
    }
    if let Some(original) = manual_backport_of(engine.config(), pr) {
        info!(pr = pr.number, original, "manual backport merged");
        mark_original_merged(engine, repo, original, &pr.base_ref).await?;
    }
    if pr.author == engine.config().github.bot_user {
        cleanup_merged_backport(engine, repo, pr).await;
        label_merged_backport(engine, repo, pr, &pr.base_ref).await?;
        return Ok(Vec::new());
    }
    Ok(backport_to_labels(engine, repo, pr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::fakes::{MemoryPlatform, ScriptedVcs, StaticTokens};
    use crate::platform::CheckRun;
    use std::sync::Arc;

    fn pr(labels: &[&str]) -> PullRequest {
        PullRequest {
            number: 30,
            title: "Improve things".to_string(),
            body: "Notes: improved".to_string(),
            head_sha: "head30".to_string(),
            base_sha: "base30".to_string(),
            base_ref: "main".to_string(),
            head_ref: "improve".to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            merged: false,
            author: "dev".to_string(),
        }
    }

    fn engine(platform: Arc<MemoryPlatform>) -> BackportEngine {
        BackportEngine::new(
            EngineConfig::default(),
            platform,
            Arc::new(ScriptedVcs::new()),
            Arc::new(StaticTokens::new("tok")),
        )
    }

    fn check(id: u64, branch: &str, conclusion: Option<CheckConclusion>) -> CheckRun {
        CheckRun {
            id,
            name: format!("Backportable? - {branch}"),
            head_sha: "head30".to_string(),
            status: if conclusion.is_some() {
                CheckStatus::Completed
            } else {
                CheckStatus::Queued
            },
            conclusion,
        }
    }

    #[test]
    fn test_referenced_pull_request() {
        assert_eq!(referenced_pull_request("Backport of #1234\n\nSee that PR"), Some(1234));
        assert_eq!(referenced_pull_request("no reference"), None);
    }

    fn merged(labels: &[&str]) -> PullRequest {
        PullRequest {
            merged: true,
            ..pr(labels)
        }
    }

    fn backport_pr(number: u64, body: &str) -> PullRequest {
        PullRequest {
            number,
            title: "Improve things (1-x)".to_string(),
            body: body.to_string(),
            head_sha: format!("head{number}"),
            base_ref: "1-x".to_string(),
            head_ref: "improve-1-x".to_string(),
            ..pr(&[])
        }
    }

    fn last_output(platform: &MemoryPlatform, name: &str) -> (CheckConclusion, CheckOutput) {
        let run = platform.check_run(name).unwrap();
        let update = platform.check_updates(run.id).pop().unwrap();
        (update.conclusion.unwrap(), update.output.unwrap())
    }

    #[test]
    fn test_manual_backport_of() {
        let config = EngineConfig::default();
        let with_body = |body: &str| backport_pr(40, body);

        assert_eq!(
            manual_backport_of(&config, &with_body("Backport of #1234\n\nSee that PR")),
            Some(1234)
        );
        assert_eq!(
            manual_backport_of(
                &config,
                &with_body("Some context.\nManually backport https://github.com/o/r/pull/55")
            ),
            Some(55)
        );
        assert_eq!(manual_backport_of(&config, &with_body("Fixes #12")), None);

        let mut bot = with_body("Backport of #1234");
        bot.author = "backport-bot[bot]".to_string();
        assert_eq!(manual_backport_of(&config, &bot), None);
    }

    #[tokio::test]
    async fn test_unmerged_pr_is_not_backported() {
        let platform = Arc::new(MemoryPlatform::new().with_branch("1-x"));
        let engine = engine(platform.clone());
        let repo = RepoSlug::new("o", "r");

        let handle = backport_to_branch(&engine, &repo, &pr(&[]), "1-x").await.unwrap();
        assert!(handle.is_none());
        let handles = backport_all_labels(&engine, &repo, &pr(&["target/1-x"]))
            .await
            .unwrap();
        assert!(handles.is_empty());

        assert_eq!(platform.comments(30), vec![NOT_MERGED_COMMENT, NOT_MERGED_COMMENT]);
    }

    #[tokio::test]
    async fn test_branch_backport_announces_itself() {
        let source = merged(&[]);
        let platform = Arc::new(
            MemoryPlatform::new()
                .with_branch("1-x")
                .with_pull_request(source.clone(), &["c1"]),
        );
        let engine = engine(platform.clone());

        let handle = backport_to_branch(&engine, &RepoSlug::new("o", "r"), &source, "1-x")
            .await
            .unwrap()
            .unwrap();
        handle.settled().await;

        let comments = platform.comments(30);
        assert_eq!(
            comments[0],
            "The backport process for this PR has been manually initiated,\nsending your 1's and 0's to \"1-x\" here we go! :D"
        );
        assert_eq!(platform.created_pull_requests().len(), 1);
        assert_eq!(platform.labels(30), vec!["in-flight/1-x"]);
    }

    #[tokio::test]
    async fn test_manual_label_backport_announces_itself() {
        let source = merged(&["target/1-x"]);
        let platform = Arc::new(MemoryPlatform::new().with_pull_request(source.clone(), &["c1"]));
        let engine = engine(platform.clone());

        let handles = backport_all_labels(&engine, &RepoSlug::new("o", "r"), &source)
            .await
            .unwrap();
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.settled().await;
        }
        assert_eq!(platform.comments(30)[0], MANUALLY_INITIATED_COMMENT);
    }

    // ── Backport validation ──

    #[tokio::test]
    async fn test_validation_requires_declaration() {
        let platform = Arc::new(MemoryPlatform::new());
        let engine = engine(platform.clone());

        let verdict = validate_backport_pr(&engine, &RepoSlug::new("o", "r"), &backport_pr(40, ""))
            .await
            .unwrap();

        assert!(matches!(verdict, BackportValidity::Invalid(_)));
        let (conclusion, output) = last_output(&platform, "Valid Backport");
        assert_eq!(conclusion, CheckConclusion::Failure);
        assert_eq!(output.title, "Invalid Backport");
        assert!(output.summary.starts_with("This PR is targeting a branch that is not main but is missing"));
    }

    #[tokio::test]
    async fn test_validation_fast_track() {
        let platform = Arc::new(MemoryPlatform::new());
        let engine = engine(platform.clone());
        let repo = RepoSlug::new("o", "r");

        let mut by_title = backport_pr(40, "");
        by_title.title = "ci: pin runner image".to_string();
        let mut by_label = backport_pr(41, "");
        by_label.labels = vec!["fast-track 🚅".to_string()];
        let mut by_author = backport_pr(42, "");
        by_author.author = "backport-bot".to_string();

        for pr in [by_title, by_label, by_author] {
            let verdict = validate_backport_pr(&engine, &repo, &pr).await.unwrap();
            assert_eq!(verdict, BackportValidity::Valid, "pr #{}", pr.number);
        }
        let runs = platform.check_runs();
        assert_eq!(runs.len(), 3);
        assert!(runs
            .iter()
            .all(|run| run.conclusion == Some(CheckConclusion::Success)));
    }

    #[tokio::test]
    async fn test_validation_of_declared_original() {
        let mut on_release = merged(&[]);
        on_release.number = 50;
        on_release.base_ref = "2-x".to_string();
        let mut unmerged = pr(&[]);
        unmerged.number = 51;
        let platform = Arc::new(
            MemoryPlatform::new()
                .with_pull_request(merged(&[]), &[])
                .with_pull_request(on_release, &[])
                .with_pull_request(unmerged, &[]),
        );
        let engine = engine(platform.clone());
        let repo = RepoSlug::new("o", "r");

        let cases = [
            (60, "Backport of #30", None),
            (61, "Backport of #50", Some("was not targeting the default branch")),
            (62, "Backport of #51", Some("has not been merged yet")),
            (63, "Backport of #99", Some("does not exist")),
        ];
        for (number, body, cause) in cases {
            let verdict = validate_backport_pr(&engine, &repo, &backport_pr(number, body))
                .await
                .unwrap();
            match cause {
                None => assert_eq!(verdict, BackportValidity::Valid),
                Some(expected) => match verdict {
                    BackportValidity::Invalid(reason) => assert!(reason.contains(expected), "{reason}"),
                    other => panic!("expected invalid, got {other:?}"),
                },
            }
        }

        let valid = platform.check_runs()[0].clone();
        let update = platform.check_updates(valid.id).pop().unwrap();
        assert_eq!(
            update.output.unwrap().summary,
            "This PR is declared as backporting \"#30\" which is a valid PR that has been merged into main"
        );
    }

    #[tokio::test]
    async fn test_validation_cancelled_on_default_branch() {
        let stale = CheckRun {
            id: 9,
            name: "Valid Backport".to_string(),
            head_sha: "head30".to_string(),
            status: CheckStatus::Completed,
            conclusion: Some(CheckConclusion::Failure),
        };
        let platform = Arc::new(MemoryPlatform::new().with_check_run(stale));
        let engine = engine(platform.clone());
        let repo = RepoSlug::new("o", "r");

        let verdict = validate_backport_pr(&engine, &repo, &pr(&[])).await.unwrap();
        assert_eq!(verdict, BackportValidity::NotABackport);
        let updates = platform.check_updates(9);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].conclusion, Some(CheckConclusion::Neutral));
        let output = updates[0].output.clone().unwrap();
        assert_eq!(output.title, "Cancelled");
        assert_eq!(output.summary, "This PR is targeting main and is not a backport");

        // No check is created for a plain default-branch PR.
        let mut fresh = pr(&[]);
        fresh.head_sha = "other".to_string();
        validate_backport_pr(&engine, &repo, &fresh).await.unwrap();
        assert_eq!(platform.check_runs().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_respects_repo_default_branch() {
        let platform = Arc::new(MemoryPlatform::new().with_default_branch("master"));
        let engine = engine(platform.clone());
        let mut on_main = pr(&[]);
        on_main.base_ref = "main".to_string();

        let verdict = validate_backport_pr(&engine, &RepoSlug::new("o", "r"), &on_main)
            .await
            .unwrap();
        assert!(matches!(verdict, BackportValidity::Invalid(_)));
    }

    #[tokio::test]
    async fn test_missing_branch_comments_and_skips() {
        let platform = Arc::new(MemoryPlatform::new());
        let engine = engine(platform.clone());
        let repo = RepoSlug::new("o", "r");

        let handle = backport_to_branch(&engine, &repo, &merged(&[]), "9-x").await.unwrap();

        assert!(handle.is_none());
        assert_eq!(
            platform.comments(30),
            vec!["The branch you provided \"9-x\" does not appear to exist :cry:"]
        );
    }

    #[tokio::test]
    async fn test_run_check_creates_reuses_and_cancels() {
        let platform = Arc::new(
            MemoryPlatform::new()
                .with_pull_request(pr(&["target/1-x", "target/2-x", "target/3-x"]), &[])
                .with_check_run(check(1, "2-x", Some(CheckConclusion::Neutral)))
                .with_check_run(check(2, "3-x", Some(CheckConclusion::Success)))
                .with_check_run(check(3, "4-x", None)),
        );
        let engine = engine(platform.clone());
        let repo = RepoSlug::new("o", "r");
        let source = pr(&["target/1-x", "target/2-x", "target/3-x"]);

        let handles = run_check(&engine, &repo, &source).await.unwrap();
        assert_eq!(handles.len(), 2);
        for handle in handles {
            handle.settled().await;
        }

        // Created fresh.
        assert!(platform.check_run("Backportable? - 1-x").is_some());
        // Neutral check was re-queued.
        assert_eq!(
            platform.check_updates(1)[0].status,
            Some(CheckStatus::Queued)
        );
        // Successful check left alone.
        assert!(platform.check_updates(2).is_empty());
        // Untargeted check cancelled.
        let cancelled = platform.check_updates(3);
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].conclusion, Some(CheckConclusion::Neutral));
        assert_eq!(cancelled[0].output.as_ref().unwrap().title, "Cancelled");
    }

    #[tokio::test]
    async fn test_label_merged_backport_swaps_on_original() {
        let original = pr(&["in-flight/1-x"]);
        let platform = Arc::new(MemoryPlatform::new().with_pull_request(original, &["a"]));
        let engine = engine(platform.clone());
        let repo = RepoSlug::new("o", "r");

        let mut backport = pr(&[]);
        backport.number = 31;
        backport.body = "Backport of #30\n\nSee that PR for details.".to_string();

        let labelled = label_merged_backport(&engine, &repo, &backport, "1-x")
            .await
            .unwrap();
        assert_eq!(labelled, Some(30));
        assert_eq!(platform.labels(30), vec!["merged/1-x"]);
    }

    #[tokio::test]
    async fn test_bot_backport_merge_deletes_head_branch() {
        let platform = Arc::new(MemoryPlatform::new().with_branch("backport/1-x-bp-fix-1"));
        let engine = engine(platform.clone());
        let repo = RepoSlug::new("o", "r");

        let mut backport = pr(&[]);
        backport.merged = true;
        backport.author = "backport-bot[bot]".to_string();
        backport.head_ref = "backport/1-x-bp-fix-1".to_string();
        backport.base_ref = "1-x".to_string();
        backport.body = "Backport of #30".to_string();

        let handles = handle_merged(&engine, &repo, &backport).await.unwrap();
        assert!(handles.is_empty());
        assert_eq!(platform.deleted_branches(), vec!["backport/1-x-bp-fix-1"]);
        assert_eq!(platform.labels(30), vec!["merged/1-x"]);
    }

    #[tokio::test]
    async fn test_merged_manual_backport_relabels_original() {
        let original = merged(&["in-flight/1-x"]);
        let platform = Arc::new(MemoryPlatform::new().with_pull_request(original, &["a"]));
        let engine = engine(platform.clone());

        let mut manual = backport_pr(45, "Manual backport of #30");
        manual.merged = true;

        let handles = handle_merged(&engine, &RepoSlug::new("o", "r"), &manual)
            .await
            .unwrap();
        assert!(handles.is_empty());
        assert_eq!(platform.labels(30), vec!["merged/1-x"]);
        assert!(platform.deleted_branches().is_empty());
    }

    #[tokio::test]
    async fn test_failed_branch_delete_is_not_raised() {
        let platform = Arc::new(MemoryPlatform::new());
        let engine = engine(platform.clone());
        let mut backport = pr(&[]);
        backport.merged = true;
        backport.author = "backport-bot[bot]".to_string();

        assert!(!cleanup_merged_backport(&engine, &RepoSlug::new("o", "r"), &backport).await);
    }

    #[tokio::test]
    async fn test_human_merge_backports_each_target_label() {
        let mut source = pr(&["target/1-x", "bug", "target/2-x"]);
        source.merged = true;
        let platform = Arc::new(MemoryPlatform::new().with_pull_request(source.clone(), &[]));
        let engine = engine(platform);

        let handles = handle_merged(&engine, &RepoSlug::new("o", "r"), &source)
            .await
            .unwrap();
        let keys: Vec<_> = handles.iter().map(|h| h.key().to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "backport-head30-1-x-execute_backport",
                "backport-head30-2-x-execute_backport"
            ]
        );
        for handle in handles {
            handle.settled().await;
        }
    }
}
