//! Job identity: backport purpose and the fingerprint key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Why a backport attempt is being made. Determines every side effect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackportPurpose {
    /// Dry run: pass/fail verdict on a check run, no push, no pull request.
    Check,

    /// Real backport: push, open a pull request, transition labels.
    ExecuteBackport,
}

impl BackportPurpose {
    /// Stable name used in fingerprints and logs.
    pub fn name(&self) -> &'static str {
        match self {
            BackportPurpose::Check => "check",
            BackportPurpose::ExecuteBackport => "execute_backport",
        }
    }

    /// Whether this purpose pushes the temporary branch.
    pub fn should_push(&self) -> bool {
        matches!(self, BackportPurpose::ExecuteBackport)
    }
}

impl std::fmt::Display for BackportPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Composite key identifying one backport attempt.
///
/// Two triggers producing the same fingerprint must never run concurrently;
/// the queue serializes on [`JobFingerprint::key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobFingerprint {
    pub head_sha: String,
    pub target_branch: String,
    pub purpose: BackportPurpose,
}

impl JobFingerprint {
    pub fn new(
        head_sha: impl Into<String>,
        target_branch: impl Into<String>,
        purpose: BackportPurpose,
    ) -> Self {
        Self {
            head_sha: head_sha.into(),
            target_branch: target_branch.into(),
            purpose,
        }
    }

    /// Queue key for this attempt.
    pub fn key(&self) -> String {
        format!(
            "backport-{}-{}-{}",
            self.head_sha, self.target_branch, self.purpose
        )
    }

    /// Short SHA-256 of the key, safe for use in file names.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key().as_bytes());
        let full = hex::encode(hasher.finalize());
        full[..12].to_string()
    }
}

impl std::fmt::Display for JobFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}
