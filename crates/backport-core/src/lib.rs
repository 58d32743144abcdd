//! Backport Core Library
//!
//! Orchestrates backports of merged pull requests onto release branches:
//! a fingerprint-keyed single-flight queue, bounded patch fetching,
//! cherry-pick execution on disposable clones, conflict annotation and
//! outcome reporting.

pub mod annotate;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod fetcher;
pub mod fingerprint;
pub mod labels;
pub mod notes;
pub mod outcome;
pub mod platform;
pub mod queue;
pub mod reporter;
pub mod telemetry;
pub mod triggers;
pub mod vcs;
pub mod workdir;

pub use annotate::{annotate_conflicts, parse_unified_diff, AnnotationLevel, ConflictAnnotation};
pub use config::{CommitterConfig, EngineConfig, GitHubConfig, LabelConfig, ValidationConfig};
pub use engine::BackportEngine;
pub use error::{BackportError, PlatformError, Result, VcsError};
pub use executor::{
    sanitize_title, temp_branch_name, AppliedBackport, ApplyFailure, ApplyRequest,
    BackportExecutor, BackportOptions, RepoSetup,
};
pub use fetcher::PatchFetcher;
pub use fingerprint::{BackportPurpose, JobFingerprint};
pub use labels::{label_for, target_branch_from_label};
pub use notes::backport_body;
pub use outcome::{BackportRequest, BackportSuccess, ConflictReport, JobOutcome, SkipReason};
pub use platform::{
    AccessToken, CheckConclusion, CheckOutput, CheckRun, CheckRunUpdate, CheckStatus, CommentRef,
    NewCheckRun, NewPullRequest, PlatformApi, PlatformResult, PullRequest, PullRequestRef,
    RepoSlug, TokenProvider,
};
pub use queue::{FingerprintQueue, JobHandle, JobPanic};
pub use reporter::StatusReporter;
pub use vcs::{GitCli, Vcs};
pub use workdir::WorkDir;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
