//! The backport engine: job body plus queue admission.
//!
//! `enqueue_backport` is fire-and-forget; outcomes are observable only through
//! platform side effects. The returned [`JobHandle`] can be awaited to know
//! when those effects have been made.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::annotate::annotate_conflicts;
use crate::config::EngineConfig;
use crate::error::{BackportError, Result};
use crate::executor::{
    temp_branch_name, ApplyFailure, ApplyRequest, BackportExecutor, BackportOptions, RepoSetup,
};
use crate::fetcher::PatchFetcher;
use crate::fingerprint::BackportPurpose;
use crate::outcome::{BackportRequest, BackportSuccess, ConflictReport, JobOutcome, SkipReason};
use crate::platform::{PlatformApi, TokenProvider};
use crate::queue::{FingerprintQueue, JobHandle};
use crate::reporter::StatusReporter;
use crate::vcs::Vcs;
use crate::workdir::WorkDir;

/// Everything a job body needs. Cloned into each job.
#[derive(Clone)]
struct Job {
    platform: Arc<dyn PlatformApi>,
    tokens: Arc<dyn TokenProvider>,
    executor: BackportExecutor,
    reporter: StatusReporter,
    config: Arc<EngineConfig>,
}

/// Admits backport jobs and runs them one-per-fingerprint.
#[derive(Clone)]
pub struct BackportEngine {
    queue: FingerprintQueue,
    job: Job,
}

impl BackportEngine {
    pub fn new(
        config: EngineConfig,
        platform: Arc<dyn PlatformApi>,
        vcs: Arc<dyn Vcs>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::with_queue(FingerprintQueue::new(), config, platform, vcs, tokens)
    }

    /// Build an engine sharing an existing queue.
    pub fn with_queue(
        queue: FingerprintQueue,
        config: EngineConfig,
        platform: Arc<dyn PlatformApi>,
        vcs: Arc<dyn Vcs>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let reporter = StatusReporter::new(Arc::clone(&platform), Arc::clone(&config));
        Self {
            queue,
            job: Job {
                platform,
                tokens,
                executor: BackportExecutor::new(vcs),
                reporter,
                config,
            },
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.job.config
    }

    pub fn platform(&self) -> &Arc<dyn PlatformApi> {
        &self.job.platform
    }

    pub fn queue(&self) -> &FingerprintQueue {
        &self.queue
    }

    /// Queue a backport under its fingerprint.
    pub fn enqueue_backport(&self, request: BackportRequest) -> JobHandle {
        let key = request.fingerprint().key();
        let span = info_span!(
            "backport.job",
            fingerprint = %key,
            repo = %request.repo,
            pr = request.pull_request.number,
            target_branch = %request.target_branch,
            purpose = %request.purpose,
        );
        info!(parent: &span, "queuing backport");

        let request = Arc::new(request);
        let job = self.job.clone();
        let reporter = self.job.reporter.clone();
        let work_request = Arc::clone(&request);

        self.queue.enter_queue(
            key,
            async move { job.run(&work_request).await }.instrument(span.clone()),
            move |settled| {
                async move {
                    let outcome = settled.unwrap_or_else(|panic| JobOutcome::aborted(panic.to_string()));
                    info!(outcome = outcome.label(), "job settled");
                    reporter.dispatch(&request, outcome).await;
                }
                .instrument(span)
            },
        )
    }
}

impl Job {
    /// Run the job to an outcome. Errors become `Aborted`.
    async fn run(&self, request: &BackportRequest) -> JobOutcome {
        match self.execute(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "backport failed");
                JobOutcome::aborted(e.to_string())
            }
        }
    }

    async fn execute(&self, request: &BackportRequest) -> Result<JobOutcome> {
        info!("executing backport");
        let repo = &request.repo;
        let pr = &request.pull_request;

        if request.purpose == BackportPurpose::Check {
            self.reporter.mark_in_progress(request).await?;
        }

        let token = self
            .tokens
            .repo_token(repo)
            .await
            .map_err(|e| BackportError::Credential(e.to_string()))?;

        let commits = self.platform.list_pull_request_commits(repo, pr.number).await?;
        if commits.is_empty() {
            return Ok(JobOutcome::Skipped(SkipReason::NoCommits));
        }
        let fetcher = PatchFetcher::from_config(&self.config);
        if let Err(BackportError::ExcessiveChangeSize { count, limit }) =
            fetcher.check_size(commits.len())
        {
            return Ok(JobOutcome::Skipped(SkipReason::TooManyCommits { count, limit }));
        }
        info!(commits = commits.len(), "found commits to backport");

        let slug = repo.to_string();
        let remote_url = self.config.github.remote_url(&slug, token.secret());
        let setup = RepoSetup {
            clone_url: remote_url.clone(),
            default_branch: pr.base_ref.clone(),
            target_remote: self.config.target_remote.clone(),
            target_remote_url: remote_url,
            committer: self.config.committer.clone(),
        };
        let options = BackportOptions {
            target_remote: self.config.target_remote.clone(),
            target_branch: request.target_branch.clone(),
            temp_branch: temp_branch_name(
                &self.config.branch_prefix,
                &request.target_branch,
                &pr.title,
                Utc::now().timestamp_millis(),
            ),
            should_push: request.purpose.should_push(),
        };
        let label = request.fingerprint().digest();

        let platform = self.platform.as_ref();
        let token = &token;
        let applied = self
            .executor
            .fetch_patches_and_apply(
                ApplyRequest {
                    commits: &commits,
                    fetcher,
                    workdir_parent: self.config.workdir_root.as_deref(),
                    workdir_label: &label,
                    setup: &setup,
                    options: &options,
                },
                |sha| async move { platform.get_commit_patch(repo, &sha, token).await },
            )
            .await;

        match applied {
            Ok(applied) => {
                info!(patches = applied.patch_count, "cherry pick success");
                close_workdir(applied.workdir);
                Ok(JobOutcome::Success(BackportSuccess {
                    temp_branch: applied.temp_branch,
                    patch_count: applied.patch_count,
                }))
            }
            Err(ApplyFailure { workdir, error }) => self.analyze_failure(workdir, error).await,
        }
    }

    /// Turn a failed apply into a conflict report, cleaning up either way.
    async fn analyze_failure(
        &self,
        workdir: Option<WorkDir>,
        error: BackportError,
    ) -> Result<JobOutcome> {
        let Some(workdir) = workdir else {
            return Err(error);
        };
        if !error.is_conflict() {
            close_workdir(workdir);
            return Err(error);
        }

        let raw_diff = self.executor.conflict_diff(&workdir).await;
        close_workdir(workdir);
        let raw_diff = raw_diff?;
        let annotations = annotate_conflicts(&raw_diff);
        info!(annotations = annotations.len(), error = %error, "backport conflicted");

        Ok(JobOutcome::Conflict(ConflictReport {
            raw_diff,
            annotations,
            detail: error.to_string(),
        }))
    }
}

fn close_workdir(workdir: WorkDir) {
    if let Err(e) = workdir.close() {
        warn!(error = %e, "working directory cleanup failed");
    }
}
