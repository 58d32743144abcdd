//! Cherry-pick execution on a disposable clone.
//!
//! Linear state machine: checkout target, apply patches in order (the first
//! failure stops the sequence and leaves conflict markers in the tree), then
//! push when the purpose calls for it. Cleanup belongs to the caller: on
//! failure the working directory is handed back inside [`ApplyFailure`] so
//! conflict analysis can run before it is removed.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::CommitterConfig;
use crate::error::{BackportError, Result};
use crate::fetcher::PatchFetcher;
use crate::vcs::Vcs;
use crate::workdir::WorkDir;

/// How to prepare a fresh clone.
#[derive(Debug, Clone)]
pub struct RepoSetup {
    /// URL the repository is cloned from.
    pub clone_url: String,
    /// Branch checked out by the clone.
    pub default_branch: String,
    /// Name of the remote patches are applied against.
    pub target_remote: String,
    /// Token-bearing URL of that remote.
    pub target_remote_url: String,
    pub committer: CommitterConfig,
}

/// Parameters for one application run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackportOptions {
    pub target_remote: String,
    pub target_branch: String,
    pub temp_branch: String,
    pub should_push: bool,
}

/// Everything [`BackportExecutor::fetch_patches_and_apply`] needs.
pub struct ApplyRequest<'a> {
    pub commits: &'a [String],
    pub fetcher: PatchFetcher,
    pub workdir_parent: Option<&'a Path>,
    pub workdir_label: &'a str,
    pub setup: &'a RepoSetup,
    pub options: &'a BackportOptions,
}

/// A clean backport. The caller still owns (and must close) the directory.
#[derive(Debug)]
pub struct AppliedBackport {
    pub workdir: WorkDir,
    pub temp_branch: String,
    pub patch_count: usize,
}

/// A failed backport, with the working directory when one was created.
#[derive(Debug)]
pub struct ApplyFailure {
    pub workdir: Option<WorkDir>,
    pub error: BackportError,
}

impl ApplyFailure {
    fn without_workdir(error: BackportError) -> Self {
        Self {
            workdir: None,
            error,
        }
    }
}

/// Drives the version-control capability through a backport.
#[derive(Clone)]
pub struct BackportExecutor {
    vcs: Arc<dyn Vcs>,
}

impl BackportExecutor {
    pub fn new(vcs: Arc<dyn Vcs>) -> Self {
        Self { vcs }
    }

    /// Clone, set identity, register and fetch the target remote.
    pub async fn init_repo(&self, workdir: &WorkDir, setup: &RepoSetup) -> Result<()> {
        let repo = workdir.repo_path();
        self.vcs
            .clone_repo(&setup.clone_url, &setup.default_branch, repo)
            .await?;
        self.vcs
            .configure_identity(repo, &setup.committer.name, &setup.committer.email)
            .await?;
        self.vcs
            .add_remote(repo, &setup.target_remote, &setup.target_remote_url)
            .await?;
        debug!(remote = %setup.target_remote, "target remote registered");
        Ok(())
    }

    /// Apply `patches` in order onto a temp branch cut from the target.
    pub async fn backport_commits_to_branch(
        &self,
        workdir: &WorkDir,
        patches: &[String],
        options: &BackportOptions,
    ) -> Result<()> {
        let repo = workdir.repo_path();
        let remote_ref = format!("{}/{}", options.target_remote, options.target_branch);

        self.vcs
            .fetch(repo, &options.target_remote, &options.target_branch)
            .await?;
        self.vcs.checkout(repo, &remote_ref).await?;
        self.vcs
            .pull(repo, &options.target_remote, &options.target_branch)
            .await?;
        self.vcs
            .checkout_new_branch(repo, &options.temp_branch, &remote_ref)
            .await?;
        info!(
            target = %remote_ref,
            temp_branch = %options.temp_branch,
            "checked out target"
        );

        let total = patches.len();
        for (index, patch) in patches.iter().enumerate() {
            let patch_file = workdir.patch_path(index);
            tokio::fs::write(&patch_file, patch).await?;

            let applied = self.vcs.apply_patch(repo, &patch_file).await;
            if let Err(e) = tokio::fs::remove_file(&patch_file).await {
                warn!(file = %patch_file.display(), error = %e, "failed to remove patch file");
            }

            if let Err(e) = applied {
                info!(patch = index + 1, total, "patch did not apply cleanly");
                return Err(BackportError::ApplyConflict {
                    index: index + 1,
                    total,
                    detail: e.to_string(),
                });
            }
            debug!("applied patch ({}/{})", index + 1, total);
        }

        if options.should_push {
            self.vcs
                .push(repo, &options.target_remote, &options.temp_branch, true)
                .await?;
            info!(branch = %options.temp_branch, remote = %options.target_remote, "pushed");
        }

        Ok(())
    }

    /// Pending diff of a tree left behind by a failed apply.
    pub async fn conflict_diff(&self, workdir: &WorkDir) -> Result<String> {
        Ok(self.vcs.diff(workdir.repo_path()).await?)
    }

    /// Fetch every patch, prepare a working directory and apply.
    ///
    /// Patches are fetched before any directory is created, so a retrieval
    /// failure performs no version-control work.
    pub async fn fetch_patches_and_apply<F, Fut, E>(
        &self,
        request: ApplyRequest<'_>,
        retrieve: F,
    ) -> std::result::Result<AppliedBackport, ApplyFailure>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<String, E>>,
        E: std::fmt::Display,
    {
        info!(
            commits = request.commits.len(),
            "requesting patches"
        );
        let patches = request
            .fetcher
            .fetch(request.commits, retrieve)
            .await
            .map_err(ApplyFailure::without_workdir)?;
        info!("got all commit info");

        let workdir = WorkDir::create(request.workdir_parent, request.workdir_label)
            .map_err(|e| ApplyFailure::without_workdir(e.into()))?;

        let result = async {
            self.init_repo(&workdir, request.setup).await?;
            self.backport_commits_to_branch(&workdir, &patches, request.options)
                .await
        }
        .await;

        match result {
            Ok(()) => Ok(AppliedBackport {
                workdir,
                temp_branch: request.options.temp_branch.clone(),
                patch_count: patches.len(),
            }),
            Err(error) => Err(ApplyFailure {
                workdir: Some(workdir),
                error,
            }),
        }
    }
}

/// Lowercase, `*` -> `x`, runs outside `[a-z0-9_]` collapsed to `-`.
pub fn sanitize_title(title: &str) -> String {
    let lowered = title.replace('*', "x").to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut in_run = false;
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
}

/// `<prefix>/<target>-bp-<sanitized title>-<millis>`.
pub fn temp_branch_name(prefix: &str, target_branch: &str, title: &str, millis: i64) -> String {
    format!(
        "{prefix}/{target_branch}-bp-{}-{millis}",
        sanitize_title(title)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{ScriptedVcs, VcsCall};

    fn options(push: bool) -> BackportOptions {
        BackportOptions {
            target_remote: "target_repo".to_string(),
            target_branch: "1-2-x".to_string(),
            temp_branch: "backport/1-2-x-bp-fix-1".to_string(),
            should_push: push,
        }
    }

    fn setup() -> RepoSetup {
        RepoSetup {
            clone_url: "https://github.com/o/r.git".to_string(),
            default_branch: "main".to_string(),
            target_remote: "target_repo".to_string(),
            target_remote_url: "https://x-access-token:t@github.com/o/r.git".to_string(),
            committer: CommitterConfig::default(),
        }
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("Fix: crash on *startup*"), "fix-crash-on-xstartupx");
        assert_eq!(sanitize_title("feat(net)!: add_thing"), "feat-net-add_thing");
        assert_eq!(sanitize_title("a   b"), "a-b");
    }

    #[test]
    fn test_temp_branch_name() {
        assert_eq!(
            temp_branch_name("backport", "1-2-x", "Fix it", 1700000000000),
            "backport/1-2-x-bp-fix-it-1700000000000"
        );
    }

    #[tokio::test]
    async fn test_clean_apply_runs_steps_in_order_and_pushes() {
        let vcs = Arc::new(ScriptedVcs::new());
        let executor = BackportExecutor::new(vcs.clone());
        let workdir = WorkDir::create(None, "exec").unwrap();

        executor
            .backport_commits_to_branch(&workdir, &["p1".into(), "p2".into()], &options(true))
            .await
            .unwrap();

        let calls = vcs.calls();
        assert_eq!(
            calls,
            vec![
                VcsCall::Fetch("target_repo".into(), "1-2-x".into()),
                VcsCall::Checkout("target_repo/1-2-x".into()),
                VcsCall::Pull("target_repo".into(), "1-2-x".into()),
                VcsCall::CheckoutNewBranch(
                    "backport/1-2-x-bp-fix-1".into(),
                    "target_repo/1-2-x".into()
                ),
                VcsCall::ApplyPatch("p1".into()),
                VcsCall::ApplyPatch("p2".into()),
                VcsCall::Push("target_repo".into(), "backport/1-2-x-bp-fix-1".into(), true),
            ]
        );
        // Patch scratch files are cleaned up as they go.
        assert!(!workdir.patch_path(0).exists());
        assert!(!workdir.patch_path(1).exists());
    }

    #[tokio::test]
    async fn test_check_purpose_does_not_push() {
        let vcs = Arc::new(ScriptedVcs::new());
        let executor = BackportExecutor::new(vcs.clone());
        let workdir = WorkDir::create(None, "exec").unwrap();

        executor
            .backport_commits_to_branch(&workdir, &["p1".into()], &options(false))
            .await
            .unwrap();

        assert!(!vcs
            .calls()
            .iter()
            .any(|c| matches!(c, VcsCall::Push(..))));
    }

    #[tokio::test]
    async fn test_first_conflict_stops_sequence() {
        let vcs = Arc::new(ScriptedVcs::new().conflict_on_patch("p2"));
        let executor = BackportExecutor::new(vcs.clone());
        let workdir = WorkDir::create(None, "exec").unwrap();

        let err = executor
            .backport_commits_to_branch(
                &workdir,
                &["p1".into(), "p2".into(), "p3".into()],
                &options(true),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BackportError::ApplyConflict { index: 2, total: 3, .. }));
        let applied: Vec<_> = vcs
            .calls()
            .into_iter()
            .filter(|c| matches!(c, VcsCall::ApplyPatch(_)))
            .collect();
        assert_eq!(applied.len(), 2);
        assert!(!vcs.calls().iter().any(|c| matches!(c, VcsCall::Push(..))));
    }

    #[tokio::test]
    async fn test_conflict_hands_back_workdir() {
        let vcs = Arc::new(ScriptedVcs::new().conflict_on_patch("patch:b"));
        let executor = BackportExecutor::new(vcs);
        let commits = vec!["a".to_string(), "b".to_string()];
        let setup = setup();
        let opts = options(false);

        let failure = executor
            .fetch_patches_and_apply(
                ApplyRequest {
                    commits: &commits,
                    fetcher: PatchFetcher::default(),
                    workdir_parent: None,
                    workdir_label: "conflict",
                    setup: &setup,
                    options: &opts,
                },
                |sha| async move { Ok::<_, String>(format!("patch:{sha}")) },
            )
            .await
            .unwrap_err();

        assert!(failure.error.is_conflict());
        let workdir = failure.workdir.expect("conflict keeps the working directory");
        assert!(workdir.root().exists());
        let root = workdir.root().to_path_buf();
        workdir.close().unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_retrieval_failure_creates_no_workdir() {
        let vcs = Arc::new(ScriptedVcs::new());
        let executor = BackportExecutor::new(vcs.clone());
        let commits = vec!["a".to_string()];
        let setup = setup();
        let opts = options(false);

        let failure = executor
            .fetch_patches_and_apply(
                ApplyRequest {
                    commits: &commits,
                    fetcher: PatchFetcher::default(),
                    workdir_parent: None,
                    workdir_label: "fail",
                    setup: &setup,
                    options: &opts,
                },
                |_sha| async move { Err::<String, _>("timeout") },
            )
            .await
            .unwrap_err();

        assert!(matches!(failure.error, BackportError::RetrievalFailure { .. }));
        assert!(failure.workdir.is_none());
        assert!(vcs.calls().is_empty());
    }
}
