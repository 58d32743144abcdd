//! Token providers.

use async_trait::async_trait;
use backport_core::{AccessToken, GitHubConfig, PlatformResult, RepoSlug, TokenProvider};
use tracing::debug;

use crate::error::{GitHubError, Result};

/// Hands every job the same pre-issued token (a PAT or a CI token).
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }

    pub fn from_config(config: &GitHubConfig) -> Result<Self> {
        config
            .token
            .as_deref()
            .map(Self::new)
            .ok_or(GitHubError::MissingToken)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn repo_token(&self, repo: &RepoSlug) -> PlatformResult<AccessToken> {
        debug!(repo = %repo, "issuing static repository token");
        Ok(self.token.clone())
    }
}
