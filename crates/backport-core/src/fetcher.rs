//! Bounded-concurrency patch retrieval.
//!
//! Slot `i` of the output always holds the patch for commit `i`, whatever
//! order the retrievals complete in.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{BackportError, Result};

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_COMMITS: usize = 240;

/// Fetches one patch per commit through a bounded pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchFetcher {
    concurrency: usize,
    max_commits: usize,
}

impl Default for PatchFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY, DEFAULT_MAX_COMMITS)
    }
}

impl PatchFetcher {
    pub fn new(concurrency: usize, max_commits: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            max_commits,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.fetch_concurrency, config.max_commits)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn max_commits(&self) -> usize {
        self.max_commits
    }

    /// Refuse change sets at or above the commit ceiling.
    pub fn check_size(&self, count: usize) -> Result<()> {
        if count >= self.max_commits {
            return Err(BackportError::ExcessiveChangeSize {
                count,
                limit: self.max_commits,
            });
        }
        Ok(())
    }

    /// Retrieve every patch. The first failure aborts the whole fetch.
    pub async fn fetch<F, Fut, E>(&self, commits: &[String], retrieve: F) -> Result<Vec<String>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<String, E>>,
        E: std::fmt::Display,
    {
        self.check_size(commits.len())?;

        let total = commits.len();
        let mut slots: Vec<Option<String>> = vec![None; total];
        let mut filled = 0usize;

        let mut pending = stream::iter(commits.iter().cloned().enumerate())
            .map(|(index, sha)| {
                let retrieval = retrieve(sha.clone());
                async move { (index, sha, retrieval.await) }
            })
            .buffer_unordered(self.concurrency);

        while let Some((index, sha, result)) = pending.next().await {
            let patch = result.map_err(|e| BackportError::RetrievalFailure {
                commit: sha.clone(),
                reason: e.to_string(),
            })?;
            slots[index] = Some(patch);
            filled += 1;
            debug!(commit = %sha, "Got patch ({filled}/{total})");
        }

        collect_slots(slots)
    }
}

/// Unwrap filled slots, reporting any that were never filled.
fn collect_slots(slots: Vec<Option<String>>) -> Result<Vec<String>> {
    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(i, _)| i)
        .collect();
    if !missing.is_empty() {
        return Err(BackportError::IncompletePatchSet { missing });
    }
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn commits(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sha{i}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_follows_commit_order_not_completion_order() {
        let fetcher = PatchFetcher::new(3, 240);
        let list = commits(7);
        let total = list.len() as u64;

        // Later commits finish first.
        let patches = fetcher
            .fetch(&list, |sha| async move {
                let i: u64 = sha.trim_start_matches("sha").parse().unwrap();
                tokio::time::sleep(Duration::from_millis((total - i) * 10)).await;
                Ok::<_, String>(format!("patch-of-{sha}"))
            })
            .await
            .unwrap();

        let expected: Vec<String> = list.iter().map(|s| format!("patch-of-{s}")).collect();
        assert_eq!(patches, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let fetcher = PatchFetcher::new(2, 240);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let patches = fetcher
            .fetch(&commits(6), |sha| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(sha)
                }
            })
            .await
            .unwrap();

        assert_eq!(patches.len(), 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_commit_list() {
        let patches = PatchFetcher::default()
            .fetch(&[], |sha| async move { Ok::<_, String>(sha) })
            .await
            .unwrap();
        assert!(patches.is_empty());
    }

    #[tokio::test]
    async fn test_single_failure_aborts_fetch() {
        let err = PatchFetcher::default()
            .fetch(&commits(4), |sha| async move {
                if sha == "sha2" {
                    Err("HTTP 502".to_string())
                } else {
                    Ok(sha)
                }
            })
            .await
            .unwrap_err();

        match err {
            BackportError::RetrievalFailure { commit, reason } => {
                assert_eq!(commit, "sha2");
                assert_eq!(reason, "HTTP 502");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_too_many_commits_refused_before_any_retrieval() {
        let calls = AtomicUsize::new(0);
        let err = PatchFetcher::new(5, 240)
            .fetch(&commits(240), |sha| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, String>(sha) }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BackportError::ExcessiveChangeSize {
                count: 240,
                limit: 240
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_check_size_boundary() {
        let fetcher = PatchFetcher::new(5, 240);
        assert!(fetcher.check_size(239).is_ok());
        assert!(fetcher.check_size(240).is_err());
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(PatchFetcher::new(0, 10).concurrency(), 1);
    }

    #[test]
    fn test_collect_slots_reports_missing() {
        let err = collect_slots(vec![Some("a".into()), None, Some("c".into()), None]).unwrap_err();
        match err {
            BackportError::IncompletePatchSet { missing } => assert_eq!(missing, vec![1, 3]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
