//! Error taxonomy for the backport engine.

use thiserror::Error;

/// Errors raised by the version-control capability.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The tool could not be started at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited non-zero.
    #[error("`{command}` exited with {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Errors raised by the platform-API capability.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Transport(String),

    #[error("platform returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode platform response: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl PlatformError {
    /// Whether the platform reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
            || matches!(self, PlatformError::Status { status: 404, .. })
    }
}

/// Backport engine errors.
#[derive(Debug, Error)]
pub enum BackportError {
    /// Retrieving the patch for one commit failed; the whole fetch is void.
    #[error("failed to retrieve patch for commit {commit}: {reason}")]
    RetrievalFailure { commit: String, reason: String },

    /// Three-way application of a patch stopped with conflicts.
    #[error("patch {index} of {total} did not apply cleanly: {detail}")]
    ApplyConflict {
        index: usize,
        total: usize,
        detail: String,
    },

    /// The change is too large to backport automatically.
    #[error("{count} commits is at or above the automatic backport limit of {limit}")]
    ExcessiveChangeSize { count: usize, limit: usize },

    /// A patch slot was never filled.
    #[error("patch set is incomplete, missing slots: {missing:?}")]
    IncompletePatchSet { missing: Vec<usize> },

    #[error("version control error: {0}")]
    Vcs(#[from] VcsError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackportError {
    /// Whether this error is the expected conflict outcome rather than a fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BackportError::ApplyConflict { .. })
    }
}

/// Result type for backport engine operations.
pub type Result<T> = std::result::Result<T, BackportError>;
