//! Error types for backport-github

use backport_core::PlatformError;
use thiserror::Error;

/// Errors talking to the GitHub REST API
#[derive(Error, Debug)]
pub enum GitHubError {
    /// Request could not be sent or the connection failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// GitHub answered with a non-success status
    #[error("GitHub returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("could not decode GitHub response: {0}")]
    Decode(String),

    /// No token configured
    #[error("no GitHub token configured (set GITHUB_TOKEN)")]
    MissingToken,

    /// API base URL could not be used to build a request
    #[error("invalid API URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for GitHubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GitHubError::Decode(err.to_string())
        } else {
            GitHubError::Http(err.to_string())
        }
    }
}

impl From<GitHubError> for PlatformError {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::Status { status, body } => PlatformError::Status { status, body },
            GitHubError::Decode(msg) => PlatformError::Decode(msg),
            other => PlatformError::Transport(other.to_string()),
        }
    }
}

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, GitHubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_maps_to_platform_status() {
        let err: PlatformError = GitHubError::Status {
            status: 404,
            body: "Not Found".to_string(),
        }
        .into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_missing_token_is_transport() {
        let err: PlatformError = GitHubError::MissingToken.into();
        assert!(matches!(err, PlatformError::Transport(_)));
    }
}
