//! The job object and completion handle passed to a processing callback.

use std::sync::Arc;

use parking_lot::Mutex;
use redis::AsyncCommands;
use tokio::sync::oneshot;
use tracing::warn;

use qube_common::Job as JobInfo;
use qube_store::{keys, StorePool};

pub type BoxFuture = futures::future::BoxFuture<'static, ()>;

/// Registered processing callback for a queue (spec.md §4.4's `processMap`).
pub type Callback = Arc<dyn Fn(Job, DoneHandle) -> BoxFuture + Send + Sync>;

/// A job handed to a processing callback: the opaque payload, its
/// addressing, and a handle back to the store for progress reporting.
#[derive(Clone)]
pub struct Job {
    info: JobInfo,
    store: Arc<StorePool>,
    key_prefix: String,
}

impl Job {
    pub(crate) fn new(
        id: u64,
        queue: String,
        group: String,
        data: Vec<u8>,
        store: Arc<StorePool>,
        key_prefix: String,
    ) -> Self {
        Self {
            info: JobInfo { id, queue, group, data },
            store,
            key_prefix,
        }
    }

    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn queue(&self) -> &str {
        &self.info.queue
    }

    pub fn group_name(&self) -> &str {
        &self.info.group
    }

    pub fn data(&self) -> &[u8] {
        &self.info.data
    }

    /// Writes the Job record's `progress` field (0-100). Best-effort: a
    /// failed write is logged, not propagated, since progress is advisory
    /// and the core does not gate any transition on it.
    pub async fn progress(&self, value: u8) {
        let job_key = keys::job_key(&self.key_prefix, self.info.id);
        match self.store.get_validated().await {
            Ok(mut conn) => {
                let result: redis::RedisResult<()> = conn.hset(&job_key, "progress", value).await;
                if let Err(e) = result {
                    warn!(error = %e, job_id = self.info.id, "failed to write job progress");
                }
            }
            Err(e) => warn!(error = %e, job_id = self.info.id, "failed to acquire connection for progress update"),
        }
    }
}

pub(crate) enum JobOutcome {
    Completed,
    Failed(String),
}

/// Single-completion-wins signal a callback uses to report its result. The
/// original source let a callback either throw/reject or call `done(err)`;
/// here both paths resolve the same oneshot channel, so whichever happens
/// first is the one that takes effect (spec.md §9).
#[derive(Clone)]
pub struct DoneHandle {
    tx: Arc<Mutex<Option<oneshot::Sender<JobOutcome>>>>,
}

impl DoneHandle {
    pub(crate) fn new(tx: oneshot::Sender<JobOutcome>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Report completion. `err = None` marks the job `completed`; `Some(message)`
    /// marks it `failed`. Calls after the first are no-ops.
    pub fn done(&self, err: Option<String>) {
        if let Some(tx) = self.tx.lock().take() {
            let outcome = match err {
                Some(message) => JobOutcome::Failed(message),
                None => JobOutcome::Completed,
            };
            let _ = tx.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_done_call_wins() {
        let (tx, rx) = oneshot::channel();
        let done = DoneHandle::new(tx);

        done.done(None);
        done.done(Some("too late".to_string()));

        match rx.await.unwrap() {
            JobOutcome::Completed => {}
            JobOutcome::Failed(_) => panic!("second done() call should have been a no-op"),
        }
    }

    #[tokio::test]
    async fn cloned_handles_share_the_same_winner() {
        let (tx, rx) = oneshot::channel();
        let done = DoneHandle::new(tx);
        let done_clone = done.clone();

        done_clone.done(Some("boom".to_string()));
        done.done(None);

        match rx.await.unwrap() {
            JobOutcome::Failed(reason) => assert_eq!(reason, "boom"),
            JobOutcome::Completed => panic!("first caller was the clone, which reported failure"),
        }
    }

    #[tokio::test]
    async fn dropping_every_handle_without_calling_done_closes_the_channel() {
        let (tx, rx) = oneshot::channel::<JobOutcome>();
        let done = DoneHandle::new(tx);
        drop(done);

        assert!(rx.await.is_err());
    }
}
