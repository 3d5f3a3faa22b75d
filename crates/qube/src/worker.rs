//! A cooperative loop that repeatedly dequeues from one group (spec.md §4.5).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use qube_common::JobStatus;
use qube_store::{keys, ConsumerRegistry};

use crate::job::{DoneHandle, Job, JobOutcome};
use crate::scheduler::GroupScheduler;

pub(crate) struct GroupWorker {
    scheduler: Arc<GroupScheduler>,
    queue: String,
    group: String,
    group_key: String,
    worker_id: String,
}

impl GroupWorker {
    pub(crate) fn new(scheduler: Arc<GroupScheduler>, queue: String, group: String, group_key: String, worker_id: String) -> Self {
        Self {
            scheduler,
            queue,
            group,
            group_key,
            worker_id,
        }
    }

    pub(crate) async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(queue = %self.queue, group = %self.group, worker_id = %self.worker_id, "group worker started");

        loop {
            if self.should_stop().await {
                break;
            }

            match self.dequeue().await {
                Ok(Some((job_id, data, group_name))) => {
                    self.scheduler.reset_inactivity_timer(&self.queue, &self.group, &self.worker_id);
                    self.process_job(job_id, data, group_name).await;
                }
                Ok(None) => {
                    let poll = Duration::from_millis(self.scheduler.config.poll_interval_ms);
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
                Err(e) if Self::is_terminal(&e) => {
                    debug!(queue = %self.queue, group = %self.group, worker_id = %self.worker_id, "store closed, worker treating next operation as terminal");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, queue = %self.queue, group = %self.group, "dequeue failed, will retry next iteration");
                    let poll = Duration::from_millis(self.scheduler.config.poll_interval_ms);
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }

        self.scheduler.on_worker_exit(&self.queue, &self.group, &self.worker_id).await;
        info!(queue = %self.queue, group = %self.group, worker_id = %self.worker_id, "group worker exited");
    }

    async fn should_stop(&self) -> bool {
        let mut conn = match self.scheduler.store.get_validated().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "should_stop check failed to acquire connection, assuming not stopped");
                return false;
            }
        };
        match ConsumerRegistry::get(&mut conn, &self.queue, &self.group, &self.worker_id).await {
            Ok(Some(info)) => info.should_stop,
            Ok(None) => true, // record vanished (e.g. external cleanup); nothing left to own
            Err(_) => false,
        }
    }

    /// A closed pool means `close()` was called — there is no store left to
    /// observe the consumer record against, so the loop must not spin
    /// forever retrying. Any other error is transient (spec.md §7) and the
    /// loop retries on its next iteration.
    fn is_terminal(err: &qube_common::QubeError) -> bool {
        matches!(err, qube_common::QubeError::Closed)
    }

    async fn dequeue(&self) -> Result<Option<(u64, Vec<u8>, String)>, qube_common::QubeError> {
        let job_prefix = keys::job_key_prefix(&self.scheduler.config.key_prefix);
        let mut conn = self.scheduler.store.get_validated().await?;
        let result = self.scheduler.scripts.dequeue(&mut conn, &self.group_key, &job_prefix).await?;
        Ok(result)
    }

    /// Runs the callback and resolves exactly one status transition, racing
    /// an explicit `done()` call against the callback future's own
    /// completion/panic (spec.md §4.5, §9).
    async fn process_job(&self, job_id: u64, data: Vec<u8>, group_name: String) {
        let callback = match self.scheduler.process_map_callback(&self.queue) {
            Some(callback) => callback,
            None => {
                warn!(job_id, queue = %self.queue, "job dequeued but no callback is registered for this queue");
                return;
            }
        };

        let job = Job::new(
            job_id,
            self.queue.clone(),
            group_name,
            data,
            self.scheduler.store.clone(),
            self.scheduler.config.key_prefix.clone(),
        );

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let done = DoneHandle::new(tx);

        let mut callback_task = tokio::spawn((callback)(job, done));

        let outcome = tokio::select! {
            recv = &mut rx => match recv {
                Ok(outcome) => outcome,
                Err(_) => JobOutcome::Failed("callback task ended without reporting a result".to_string()),
            },
            joined = &mut callback_task => match joined {
                Ok(()) => match rx.await {
                    Ok(outcome) => outcome,
                    // Callback returned without calling `done` and without panicking;
                    // treated as an implicit success (an Open Question in the
                    // original design, resolved this way here).
                    Err(_) => JobOutcome::Completed,
                },
                Err(join_err) => JobOutcome::Failed(format!("callback panicked: {join_err}")),
            },
        };

        let new_status = match outcome {
            JobOutcome::Completed => JobStatus::Completed,
            JobOutcome::Failed(reason) => {
                debug!(job_id, reason = %reason, "job callback reported failure");
                JobStatus::Failed
            }
        };

        self.update_status(job_id, new_status).await;
    }

    async fn update_status(&self, job_id: u64, status: JobStatus) {
        let job_key = keys::job_key(&self.scheduler.config.key_prefix, job_id);
        let mut conn = match self.scheduler.store.get_validated().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, job_id, "failed to acquire connection for status update");
                return;
            }
        };
        match self.scheduler.scripts.update_status(&mut conn, &job_key, status.as_str()).await {
            Ok(true) => {}
            Ok(false) => warn!(job_id, %status, "status transition rejected (already terminal or non-monotonic)"),
            Err(e) => warn!(error = %e, job_id, "failed to write job status"),
        }
    }
}
