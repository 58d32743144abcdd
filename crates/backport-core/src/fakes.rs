//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `MemoryPlatform`, `ScriptedVcs` and `StaticTokens`, which satisfy
//! the trait contracts without network access or a git binary.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{PlatformError, VcsError};
use crate::platform::*;
use crate::vcs::{Vcs, VcsResult};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryPlatform
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PlatformState {
    pull_requests: HashMap<u64, PullRequest>,
    commits: HashMap<u64, Vec<String>>,
    patches: HashMap<String, String>,
    failing_patches: HashSet<String>,
    check_runs: Vec<CheckRun>,
    check_updates: Vec<(u64, CheckRunUpdate)>,
    comments: Vec<(u64, u64, String)>,
    created_pull_requests: Vec<NewPullRequest>,
    labels: HashMap<u64, Vec<String>>,
    branches: HashSet<String>,
    deleted_branches: Vec<String>,
    reject_annotations: bool,
    default_branch: Option<String>,
    next_id: u64,
}

impl PlatformState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        1000 + self.next_id
    }
}

/// In-memory platform recording every side effect.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<PlatformState>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pull request and its commits (patches default to `patch:<sha>`).
    pub fn with_pull_request(self, pr: PullRequest, commits: &[&str]) -> Self {
        {
            let mut state = lock(&self.state);
            for sha in commits {
                state
                    .patches
                    .entry(sha.to_string())
                    .or_insert_with(|| format!("patch:{sha}"));
            }
            state
                .commits
                .insert(pr.number, commits.iter().map(|s| s.to_string()).collect());
            state.labels.insert(pr.number, pr.labels.clone());
            state.pull_requests.insert(pr.number, pr);
        }
        self
    }

    pub fn with_patch(self, sha: &str, patch: &str) -> Self {
        lock(&self.state)
            .patches
            .insert(sha.to_string(), patch.to_string());
        self
    }

    pub fn with_failing_patch(self, sha: &str) -> Self {
        lock(&self.state).failing_patches.insert(sha.to_string());
        self
    }

    pub fn with_branch(self, branch: &str) -> Self {
        lock(&self.state).branches.insert(branch.to_string());
        self
    }

    pub fn with_check_run(self, run: CheckRun) -> Self {
        lock(&self.state).check_runs.push(run);
        self
    }

    /// Default branch reported for every repository (`main` when unset).
    pub fn with_default_branch(self, branch: &str) -> Self {
        lock(&self.state).default_branch = Some(branch.to_string());
        self
    }

    /// Fail any check-run update that carries annotations.
    pub fn rejecting_annotations(self) -> Self {
        lock(&self.state).reject_annotations = true;
        self
    }

    /// Bodies of comments posted on an issue, in order.
    pub fn comments(&self, issue_number: u64) -> Vec<String> {
        lock(&self.state)
            .comments
            .iter()
            .filter(|(issue, _, _)| *issue == issue_number)
            .map(|(_, _, body)| body.clone())
            .collect()
    }

    pub fn labels(&self, issue_number: u64) -> Vec<String> {
        lock(&self.state)
            .labels
            .get(&issue_number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn created_pull_requests(&self) -> Vec<NewPullRequest> {
        lock(&self.state).created_pull_requests.clone()
    }

    pub fn check_run(&self, name: &str) -> Option<CheckRun> {
        lock(&self.state)
            .check_runs
            .iter()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn check_runs(&self) -> Vec<CheckRun> {
        lock(&self.state).check_runs.clone()
    }

    /// Accepted updates for a check run, in order.
    pub fn check_updates(&self, check_run_id: u64) -> Vec<CheckRunUpdate> {
        lock(&self.state)
            .check_updates
            .iter()
            .filter(|(id, _)| *id == check_run_id)
            .map(|(_, u)| u.clone())
            .collect()
    }

    pub fn deleted_branches(&self) -> Vec<String> {
        lock(&self.state).deleted_branches.clone()
    }
}

#[async_trait]
impl PlatformApi for MemoryPlatform {
    async fn default_branch(&self, _repo: &RepoSlug) -> PlatformResult<String> {
        Ok(lock(&self.state)
            .default_branch
            .clone()
            .unwrap_or_else(|| "main".to_string()))
    }

    async fn get_pull_request(&self, _repo: &RepoSlug, number: u64) -> PlatformResult<PullRequest> {
        let state = lock(&self.state);
        let mut pr = state
            .pull_requests
            .get(&number)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("pull request #{number}")))?;
        pr.labels = state.labels.get(&number).cloned().unwrap_or_default();
        Ok(pr)
    }

    async fn list_pull_request_commits(
        &self,
        _repo: &RepoSlug,
        number: u64,
    ) -> PlatformResult<Vec<String>> {
        lock(&self.state)
            .commits
            .get(&number)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("pull request #{number}")))
    }

    async fn get_commit_patch(
        &self,
        _repo: &RepoSlug,
        sha: &str,
        _token: &AccessToken,
    ) -> PlatformResult<String> {
        let state = lock(&self.state);
        if state.failing_patches.contains(sha) {
            return Err(PlatformError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        state
            .patches
            .get(sha)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("commit {sha}")))
    }

    async fn create_pull_request(
        &self,
        _repo: &RepoSlug,
        request: NewPullRequest,
    ) -> PlatformResult<PullRequestRef> {
        let mut state = lock(&self.state);
        let number = state.next_id();
        state.created_pull_requests.push(request);
        state.labels.insert(number, Vec::new());
        Ok(PullRequestRef {
            number,
            html_url: format!("https://example.test/pull/{number}"),
        })
    }

    async fn create_comment(
        &self,
        _repo: &RepoSlug,
        issue_number: u64,
        body: &str,
    ) -> PlatformResult<CommentRef> {
        let mut state = lock(&self.state);
        let id = state.next_id();
        state.comments.push((issue_number, id, body.to_string()));
        Ok(CommentRef { id })
    }

    async fn update_comment(
        &self,
        _repo: &RepoSlug,
        comment_id: u64,
        body: &str,
    ) -> PlatformResult<()> {
        let mut state = lock(&self.state);
        let comment = state
            .comments
            .iter_mut()
            .find(|(_, id, _)| *id == comment_id)
            .ok_or_else(|| PlatformError::NotFound(format!("comment {comment_id}")))?;
        comment.2 = body.to_string();
        Ok(())
    }

    async fn list_check_runs(
        &self,
        _repo: &RepoSlug,
        head_sha: &str,
    ) -> PlatformResult<Vec<CheckRun>> {
        Ok(lock(&self.state)
            .check_runs
            .iter()
            .filter(|r| r.head_sha == head_sha)
            .cloned()
            .collect())
    }

    async fn create_check_run(
        &self,
        _repo: &RepoSlug,
        request: NewCheckRun,
    ) -> PlatformResult<CheckRun> {
        let mut state = lock(&self.state);
        let run = CheckRun {
            id: state.next_id(),
            name: request.name,
            head_sha: request.head_sha,
            status: request.status,
            conclusion: None,
        };
        state.check_runs.push(run.clone());
        Ok(run)
    }

    async fn update_check_run(
        &self,
        _repo: &RepoSlug,
        check_run_id: u64,
        update: CheckRunUpdate,
    ) -> PlatformResult<()> {
        let mut state = lock(&self.state);
        let has_annotations = update
            .output
            .as_ref()
            .is_some_and(|o| o.annotations.is_some());
        if state.reject_annotations && has_annotations {
            return Err(PlatformError::Status {
                status: 422,
                body: "annotations rejected".to_string(),
            });
        }

        let run = state
            .check_runs
            .iter_mut()
            .find(|r| r.id == check_run_id)
            .ok_or_else(|| PlatformError::NotFound(format!("check run {check_run_id}")))?;
        if let Some(status) = update.status {
            run.status = status;
            run.conclusion = None;
        }
        if let Some(conclusion) = update.conclusion {
            run.status = CheckStatus::Completed;
            run.conclusion = Some(conclusion);
        }
        state.check_updates.push((check_run_id, update));
        Ok(())
    }

    async fn add_labels(
        &self,
        _repo: &RepoSlug,
        issue_number: u64,
        labels: &[String],
    ) -> PlatformResult<()> {
        let mut state = lock(&self.state);
        let current = state.labels.entry(issue_number).or_default();
        for label in labels {
            if !current.contains(label) {
                current.push(label.clone());
            }
        }
        Ok(())
    }

    async fn remove_label(
        &self,
        _repo: &RepoSlug,
        issue_number: u64,
        label: &str,
    ) -> PlatformResult<()> {
        if let Some(current) = lock(&self.state).labels.get_mut(&issue_number) {
            current.retain(|l| l != label);
        }
        Ok(())
    }

    async fn branch_exists(&self, _repo: &RepoSlug, branch: &str) -> PlatformResult<bool> {
        Ok(lock(&self.state).branches.contains(branch))
    }

    async fn delete_branch(&self, _repo: &RepoSlug, branch: &str) -> PlatformResult<()> {
        let mut state = lock(&self.state);
        if !state.branches.remove(branch) {
            return Err(PlatformError::NotFound(format!("branch {branch}")));
        }
        state.deleted_branches.push(branch.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScriptedVcs
// ---------------------------------------------------------------------------

/// One recorded version-control operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    CloneRepo(String, String),
    ConfigureIdentity(String, String),
    AddRemote(String, String),
    Fetch(String, String),
    Checkout(String),
    Pull(String, String),
    CheckoutNewBranch(String, String),
    /// Contents of the applied patch file.
    ApplyPatch(String),
    Push(String, String, bool),
    Diff,
}

/// Records operations; fails `apply_patch` for one scripted patch body.
#[derive(Debug, Default)]
pub struct ScriptedVcs {
    calls: Mutex<Vec<VcsCall>>,
    conflict_patch: Option<String>,
    diff_text: String,
}

impl ScriptedVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make applying a patch with exactly this body conflict.
    pub fn conflict_on_patch(mut self, patch: &str) -> Self {
        self.conflict_patch = Some(patch.to_string());
        self
    }

    /// Text returned by `diff`.
    pub fn with_diff(mut self, diff: &str) -> Self {
        self.diff_text = diff.to_string();
        self
    }

    pub fn calls(&self) -> Vec<VcsCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: VcsCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl Vcs for ScriptedVcs {
    async fn clone_repo(&self, url: &str, branch: &str, dest: &Path) -> VcsResult<()> {
        self.record(VcsCall::CloneRepo(url.to_string(), branch.to_string()));
        std::fs::create_dir_all(dest).map_err(|source| VcsError::Spawn {
            program: "git".to_string(),
            source,
        })
    }

    async fn configure_identity(&self, _dir: &Path, name: &str, email: &str) -> VcsResult<()> {
        self.record(VcsCall::ConfigureIdentity(name.to_string(), email.to_string()));
        Ok(())
    }

    async fn add_remote(&self, _dir: &Path, name: &str, url: &str) -> VcsResult<()> {
        self.record(VcsCall::AddRemote(name.to_string(), url.to_string()));
        Ok(())
    }

    async fn fetch(&self, _dir: &Path, remote: &str, branch: &str) -> VcsResult<()> {
        self.record(VcsCall::Fetch(remote.to_string(), branch.to_string()));
        Ok(())
    }

    async fn checkout(&self, _dir: &Path, reference: &str) -> VcsResult<()> {
        self.record(VcsCall::Checkout(reference.to_string()));
        Ok(())
    }

    async fn pull(&self, _dir: &Path, remote: &str, branch: &str) -> VcsResult<()> {
        self.record(VcsCall::Pull(remote.to_string(), branch.to_string()));
        Ok(())
    }

    async fn checkout_new_branch(&self, _dir: &Path, name: &str, from: &str) -> VcsResult<()> {
        self.record(VcsCall::CheckoutNewBranch(name.to_string(), from.to_string()));
        Ok(())
    }

    async fn apply_patch(&self, _dir: &Path, patch_file: &Path) -> VcsResult<()> {
        let body = tokio::fs::read_to_string(patch_file)
            .await
            .map_err(|source| VcsError::Spawn {
                program: "git".to_string(),
                source,
            })?;
        let conflicts = self.conflict_patch.as_deref() == Some(body.as_str());
        self.record(VcsCall::ApplyPatch(body));
        if conflicts {
            return Err(VcsError::CommandFailed {
                command: "git am -3".to_string(),
                code: 128,
                stderr: "error: Failed to merge in the changes.".to_string(),
            });
        }
        Ok(())
    }

    async fn push(
        &self,
        _dir: &Path,
        remote: &str,
        branch: &str,
        set_upstream: bool,
    ) -> VcsResult<()> {
        self.record(VcsCall::Push(
            remote.to_string(),
            branch.to_string(),
            set_upstream,
        ));
        Ok(())
    }

    async fn diff(&self, _dir: &Path) -> VcsResult<String> {
        self.record(VcsCall::Diff);
        Ok(self.diff_text.clone())
    }
}

// ---------------------------------------------------------------------------
// StaticTokens
// ---------------------------------------------------------------------------

/// Hands out a fixed token and counts requests.
#[derive(Debug)]
pub struct StaticTokens {
    token: String,
    issued: AtomicUsize,
}

impl StaticTokens {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            issued: AtomicUsize::new(0),
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn repo_token(&self, _repo: &RepoSlug) -> PlatformResult<AccessToken> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken::new(self.token.clone()))
    }
}
