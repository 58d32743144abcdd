//! Engine configuration, loaded from TOML and overlaid from the environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BackportError, Result};

/// Label prefixes that encode backport state on pull requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Requested backport target, e.g. `target/1-2-x`.
    pub target: String,
    /// Backport PR opened, not yet merged.
    pub in_flight: String,
    /// Backport PR merged.
    pub merged: String,
    /// Automatic backport failed.
    pub needs_manual: String,
    /// Label applied to every generated backport PR.
    pub backport: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            target: "target/".to_string(),
            in_flight: "in-flight/".to_string(),
            merged: "merged/".to_string(),
            needs_manual: "needs-manual-bp/".to_string(),
            backport: "backport".to_string(),
        }
    }
}

/// Git identity used when applying patches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitterConfig {
    pub name: String,
    pub email: String,
}

impl Default for CommitterConfig {
    fn default() -> Self {
        Self {
            name: "backport-bot".to_string(),
            email: "backport-bot@users.noreply.github.com".to_string(),
        }
    }
}

/// Rules for the check that validates manual backport PRs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Check-run name.
    pub check_name: String,
    /// Titles with one of these prefixes need no backport declaration.
    pub fast_track_prefixes: Vec<String>,
    /// Labels that waive the backport declaration.
    pub fast_track_labels: Vec<String>,
    /// Link shown on the validation check.
    pub docs_url: Option<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_name: "Valid Backport".to_string(),
            fast_track_prefixes: vec!["build:".to_string(), "ci:".to_string()],
            fast_track_labels: vec!["fast-track 🚅".to_string()],
            docs_url: None,
        }
    }
}

/// Platform endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Host used for git remotes.
    pub host: String,
    /// REST API base URL.
    pub api_url: String,
    /// Login of the bot account that authors backport PRs.
    pub bot_user: String,
    /// Static token, normally supplied via `GITHUB_TOKEN` instead.
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            host: "github.com".to_string(),
            api_url: "https://api.github.com".to_string(),
            bot_user: "backport-bot[bot]".to_string(),
            token: None,
        }
    }
}

impl GitHubConfig {
    /// Point both endpoints at a GitHub Enterprise host.
    pub fn enterprise(host: &str) -> Self {
        Self {
            host: host.to_string(),
            api_url: format!("https://{host}/api/v3"),
            ..Self::default()
        }
    }

    /// Remote URL carrying a repository token.
    pub fn remote_url(&self, slug: &str, token: &str) -> String {
        format!("https://x-access-token:{token}@{}/{slug}.git", self.host)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent patch retrievals per job.
    pub fetch_concurrency: usize,
    /// Refuse automatic backports at or above this many commits.
    pub max_commits: usize,
    /// Check-run name prefix; the suffix is the target branch.
    pub check_prefix: String,
    /// Namespace for temporary backport branches.
    pub branch_prefix: String,
    /// Remote name registered in every working directory.
    pub target_remote: String,
    /// Parent directory for working directories (system temp when unset).
    pub workdir_root: Option<PathBuf>,
    /// Link shown on check runs.
    pub details_url: Option<String>,
    pub committer: CommitterConfig,
    pub labels: LabelConfig,
    pub validation: ValidationConfig,
    pub github: GitHubConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 5,
            max_commits: 240,
            check_prefix: "Backportable? - ".to_string(),
            branch_prefix: "backport".to_string(),
            target_remote: "target_repo".to_string(),
            workdir_root: None,
            details_url: None,
            committer: CommitterConfig::default(),
            labels: LabelConfig::default(),
            validation: ValidationConfig::default(),
            github: GitHubConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| BackportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overlay `BACKPORT_*` and `GHE_HOST` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("GHE_HOST") {
            let bot_user = std::mem::take(&mut self.github.bot_user);
            let token = self.github.token.take();
            self.github = GitHubConfig {
                bot_user,
                token,
                ..GitHubConfig::enterprise(&host)
            };
        }
        if let Some(n) = lookup("BACKPORT_FETCH_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.fetch_concurrency = n;
        }
        if let Some(n) = lookup("BACKPORT_MAX_COMMITS").and_then(|v| v.parse().ok()) {
            self.max_commits = n;
        }
        if let Some(dir) = lookup("BACKPORT_WORKDIR") {
            self.workdir_root = Some(PathBuf::from(dir));
        }
        if let Some(name) = lookup("BACKPORT_COMMITTER_NAME") {
            self.committer.name = name;
        }
        if let Some(email) = lookup("BACKPORT_COMMITTER_EMAIL") {
            self.committer.email = email;
        }
        if let Some(user) = lookup("BACKPORT_BOT_USER") {
            self.github.bot_user = user;
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_concurrency == 0 {
            return Err(BackportError::Config(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_commits == 0 {
            return Err(BackportError::Config(
                "max_commits must be at least 1".to_string(),
            ));
        }
        if self.target_remote.trim().is_empty() {
            return Err(BackportError::Config(
                "target_remote must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Authors whose PRs need no backport declaration.
    pub fn fast_track_users(&self) -> [&str; 2] {
        [self.github.bot_user.as_str(), self.committer.name.as_str()]
    }

    /// Check-run name for a target branch.
    pub fn check_name(&self, target_branch: &str) -> String {
        format!("{}{}", self.check_prefix, target_branch)
    }
}
