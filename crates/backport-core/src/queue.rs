//! Single-flight job scheduler keyed by fingerprint.
//!
//! Guarantees:
//! - at most one job body per key runs at any instant
//! - jobs sharing a key run in enqueue order
//! - jobs with distinct keys run concurrently, unbounded
//! - a job's dispatcher finishes before the next job for that key starts
//!
//! A panicking job body is caught and handed to its dispatcher as
//! [`JobPanic`]; the backlog for that key keeps draining.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error};

type QueuedJob = BoxFuture<'static, ()>;
type Backlogs = HashMap<String, VecDeque<QueuedJob>>;

/// A job body that panicked instead of returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPanic {
    pub message: String,
}

impl JobPanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "job panicked".to_string()
        };
        Self { message }
    }
}

impl std::fmt::Display for JobPanic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job panicked: {}", self.message)
    }
}

/// How a job body settled.
pub type Settled<T> = std::result::Result<T, JobPanic>;

/// Resolves once the job's dispatcher has returned.
///
/// Dropping the handle does not cancel the job.
#[derive(Debug)]
pub struct JobHandle {
    key: String,
    done: oneshot::Receiver<()>,
}

impl JobHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the job to settle and be dispatched.
    pub async fn settled(self) {
        // A dropped sender means the runtime shut down under the job.
        let _ = self.done.await;
    }
}

/// Process-wide single-flight queue. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct FingerprintQueue {
    backlogs: Arc<Mutex<Backlogs>>,
}

impl FingerprintQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `work` under `key`; `dispatch` receives how it settled.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enter_queue<W, T, D, F>(&self, key: impl Into<String>, work: W, dispatch: D) -> JobHandle
    where
        W: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(Settled<T>) -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let (done_tx, done_rx) = oneshot::channel();

        let job_key = key.clone();
        let job: QueuedJob = Box::pin(async move {
            let settled = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .map_err(JobPanic::from_payload);
            if let Err(e) = settled.as_ref() {
                error!(key = %job_key, error = %e, "job body panicked");
            }

            let dispatched = AssertUnwindSafe(async move { dispatch(settled).await })
                .catch_unwind()
                .await;
            if let Err(payload) = dispatched {
                let e = JobPanic::from_payload(payload);
                error!(key = %job_key, error = %e, "job dispatcher panicked");
            }

            let _ = done_tx.send(());
        });

        let start_now = {
            let mut backlogs = self.lock();
            match backlogs.get_mut(&key) {
                Some(backlog) => {
                    backlog.push_back(job);
                    debug!(key = %key, position = backlog.len(), "job queued behind active job");
                    None
                }
                None => {
                    backlogs.insert(key.clone(), VecDeque::new());
                    Some(job)
                }
            }
        };

        if let Some(job) = start_now {
            debug!(key = %key, "job admitted");
            tokio::spawn(drain(Arc::clone(&self.backlogs), key.clone(), job));
        }

        JobHandle { key, done: done_rx }
    }

    /// Whether a job is currently running under `key`.
    pub fn is_active(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Jobs waiting behind the active job for `key`.
    pub fn backlog_len(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, VecDeque::len)
    }

    /// Keys with an active job.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, Backlogs> {
        lock_backlogs(&self.backlogs)
    }
}

/// Run `first`, then everything queued behind it, then release the key.
async fn drain(backlogs: Arc<Mutex<Backlogs>>, key: String, first: QueuedJob) {
    let mut next = Some(first);
    while let Some(job) = next {
        job.await;
        next = take_next(&backlogs, &key);
    }
    debug!(key = %key, "key released");
}

fn take_next(backlogs: &Mutex<Backlogs>, key: &str) -> Option<QueuedJob> {
    let mut backlogs = lock_backlogs(backlogs);
    let next = backlogs.get_mut(key).and_then(VecDeque::pop_front);
    if next.is_none() {
        backlogs.remove(key);
    }
    next
}

fn lock_backlogs(backlogs: &Mutex<Backlogs>) -> MutexGuard<'_, Backlogs> {
    backlogs.lock().unwrap_or_else(PoisonError::into_inner)
}
