//! Version-control capability and its `git` command-line implementation.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::VcsError;

/// Result type for version-control operations.
pub type VcsResult<T> = std::result::Result<T, VcsError>;

/// Ordered, fallible operations on a working directory.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Clone `url` at `branch` into `dest` (which must not exist yet).
    async fn clone_repo(&self, url: &str, branch: &str, dest: &Path) -> VcsResult<()>;

    /// Set the identity used for commits created by `apply_patch`.
    async fn configure_identity(&self, dir: &Path, name: &str, email: &str) -> VcsResult<()>;

    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> VcsResult<()>;

    async fn fetch(&self, dir: &Path, remote: &str, branch: &str) -> VcsResult<()>;

    async fn checkout(&self, dir: &Path, reference: &str) -> VcsResult<()>;

    async fn pull(&self, dir: &Path, remote: &str, branch: &str) -> VcsResult<()>;

    async fn checkout_new_branch(&self, dir: &Path, name: &str, from: &str) -> VcsResult<()>;

    /// Three-way apply of a mailbox-format patch file, committing on success.
    async fn apply_patch(&self, dir: &Path, patch_file: &Path) -> VcsResult<()>;

    async fn push(&self, dir: &Path, remote: &str, branch: &str, set_upstream: bool)
        -> VcsResult<()>;

    /// Pending unified diff of the working tree.
    async fn diff(&self, dir: &Path) -> VcsResult<String>;
}

/// [`Vcs`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run git with `args` in `dir`, returning stdout.
    async fn run(&self, dir: &Path, args: &[&str]) -> VcsResult<String> {
        debug!(dir = %dir.display(), "git {}", redact(args).join(" "));

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| VcsError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Err(VcsError::CommandFailed {
                command: format!("git {}", redact(args).join(" ")),
                code: output.status.code().unwrap_or(-1),
                stderr: if stderr.is_empty() { stdout } else { stderr },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Hide credentials embedded in remote URLs.
fn redact(args: &[&str]) -> Vec<String> {
    args.iter()
        .map(|arg| match (arg.find("://"), arg.find('@')) {
            (Some(scheme), Some(at)) if at > scheme => {
                format!("{}://***@{}", &arg[..scheme], &arg[at + 1..])
            }
            _ => (*arg).to_string(),
        })
        .collect()
}

#[async_trait]
impl Vcs for GitCli {
    async fn clone_repo(&self, url: &str, branch: &str, dest: &Path) -> VcsResult<()> {
        let parent = dest.parent().unwrap_or(dest);
        let dest_str = dest.to_string_lossy();
        self.run(parent, &["clone", "--branch", branch, url, &dest_str])
            .await
            .map(|_| ())
    }

    async fn configure_identity(&self, dir: &Path, name: &str, email: &str) -> VcsResult<()> {
        self.run(dir, &["config", "user.name", name]).await?;
        self.run(dir, &["config", "user.email", email]).await?;
        Ok(())
    }

    async fn add_remote(&self, dir: &Path, name: &str, url: &str) -> VcsResult<()> {
        self.run(dir, &["remote", "add", name, url]).await.map(|_| ())
    }

    async fn fetch(&self, dir: &Path, remote: &str, branch: &str) -> VcsResult<()> {
        // Explicit refspec so `<remote>/<branch>` exists as a remote-tracking ref.
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        self.run(dir, &["fetch", remote, &refspec]).await.map(|_| ())
    }

    async fn checkout(&self, dir: &Path, reference: &str) -> VcsResult<()> {
        self.run(dir, &["checkout", reference]).await.map(|_| ())
    }

    async fn pull(&self, dir: &Path, remote: &str, branch: &str) -> VcsResult<()> {
        self.run(dir, &["pull", remote, branch]).await.map(|_| ())
    }

    async fn checkout_new_branch(&self, dir: &Path, name: &str, from: &str) -> VcsResult<()> {
        self.run(dir, &["checkout", "-b", name, from]).await.map(|_| ())
    }

    async fn apply_patch(&self, dir: &Path, patch_file: &Path) -> VcsResult<()> {
        let patch = patch_file.to_string_lossy();
        self.run(dir, &["am", "-3", &patch]).await.map(|_| ())
    }

    async fn push(
        &self,
        dir: &Path,
        remote: &str,
        branch: &str,
        set_upstream: bool,
    ) -> VcsResult<()> {
        let mut args = vec!["push"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.extend([remote, branch]);
        self.run(dir, &args).await.map(|_| ())
    }

    async fn diff(&self, dir: &Path) -> VcsResult<String> {
        self.run(dir, &["diff"]).await
    }
}
