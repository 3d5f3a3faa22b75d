//! Per-process scheduling: tracks registered callbacks, spawns group
//! workers up to quota, and drains admissions deferred by saturation
//! (spec.md §4.4).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;

use qube_common::{ConsumerInfo, JobStatus, NewJobNotification, QubeError};
use qube_config::QubeConfig;
use qube_store::{keys, ConsumerRegistry, ScriptRegistry, StorePool};

use crate::job::Callback;
use crate::worker::GroupWorker;

type Result<T> = std::result::Result<T, QubeError>;

struct ProcessEntry {
    callback: Callback,
    n_consumers: usize,
}

struct PendingAdmission {
    queue: String,
    group: String,
    group_key: String,
}

/// Node-local scheduling state: `processMap`, `pendingGroupConsumers`, and
/// `localTimers` from spec.md §3, confined behind this struct's methods so
/// workers and the notifier never touch them directly (spec.md §9).
pub struct GroupScheduler {
    pub(crate) instance_id: String,
    pub(crate) config: QubeConfig,
    pub(crate) store: Arc<StorePool>,
    pub(crate) scripts: Arc<ScriptRegistry>,
    publisher: ConnectionManager,
    process_map: DashMap<String, ProcessEntry>,
    pending: Mutex<VecDeque<PendingAdmission>>,
    local_timers: DashMap<String, Arc<AtomicU64>>,
    /// One lock per `(queue, group)`, held across the admission count-read
    /// and consumer-record write in `start_group_consumer` so two racing
    /// admissions on this node (a notification and a pending-drain, say)
    /// cannot both observe spare capacity and both spawn (spec.md I2/I3).
    admission_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GroupScheduler {
    pub(crate) fn new(
        config: QubeConfig,
        store: Arc<StorePool>,
        scripts: Arc<ScriptRegistry>,
        publisher: ConnectionManager,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            instance_id: Uuid::new_v4().to_string(),
            config,
            store,
            scripts,
            publisher,
            process_map: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
            local_timers: DashMap::new(),
            admission_locks: DashMap::new(),
            shutdown_tx,
        })
    }

    fn consumer_key(queue: &str, group: &str, worker_id: &str) -> String {
        format!("qube:{queue}:{group}:{worker_id}")
    }

    /// The per-`(queue, group)` admission lock, created on first use.
    fn admission_lock(&self, queue: &str, group: &str) -> Arc<AsyncMutex<()>> {
        let key = format!("{queue}:{group}");
        self.admission_locks
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// `add(queue, group, data) -> jobId` (spec.md §4.4).
    pub async fn add(&self, queue: &str, group: &str, data: Vec<u8>) -> Result<u64> {
        let prefix = &self.config.key_prefix;
        let group_key = keys::group_key(prefix, queue, group);
        let groups_key = keys::groups_key(prefix, queue);
        let counter_key = keys::counter_key(prefix);
        let job_prefix = keys::job_key_prefix(prefix);

        let mut conn = self.store.get_validated().await?;
        let job_id = self
            .scripts
            .enqueue(&mut conn, &group_key, &groups_key, &counter_key, &job_prefix, &data, group)
            .await?;
        drop(conn);

        let notification = NewJobNotification {
            queue_name: queue.to_string(),
            group_name: group.to_string(),
        };
        let payload = serde_json::to_string(&notification)?;
        let mut publisher = self.publisher.clone();
        if let Err(e) = publisher
            .publish::<_, _, i64>(&self.config.notify_channel, payload)
            .await
        {
            // At-least-once: the job is already durably enqueued; the next
            // poll on this or another node will still pick it up.
            warn!(error = %e, queue, group, "notification publish failed after enqueue");
        }

        Ok(job_id)
    }

    /// `process(queue, nConsumers, callback)` (spec.md §4.4). Iterates the
    /// groups known at registration time only; groups that appear later are
    /// discovered purely through notifications (spec.md §9, intentional).
    pub async fn process(self: &Arc<Self>, queue: &str, n_consumers: usize, callback: Callback) -> Result<()> {
        self.process_map.insert(
            queue.to_string(),
            ProcessEntry {
                callback,
                n_consumers,
            },
        );

        let groups_key = keys::groups_key(&self.config.key_prefix, queue);
        let groups: Vec<String> = match self.store.get_validated().await {
            Ok(mut conn) => conn.smembers(&groups_key).await.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, queue, "failed to read known groups at process() registration");
                Vec::new()
            }
        };

        for group_key in groups {
            if let Some(group) = keys::group_name_from_key(&group_key) {
                for _ in 0..n_consumers {
                    self.start_group_consumer(queue, group, Some(group_key.clone()), false, n_consumers)
                        .await;
                }
            }
        }

        Ok(())
    }

    /// Invoked by the Notifier when `QUEUE:NEWJOB` delivers a message for a
    /// queue this process has registered a callback for.
    pub(crate) async fn handle_notification(self: &Arc<Self>, notification: NewJobNotification) {
        let n_consumers = match self.process_map.get(&notification.queue_name) {
            Some(entry) => entry.n_consumers,
            None => return,
        };
        self.start_group_consumer(&notification.queue_name, &notification.group_name, None, false, n_consumers)
            .await;
    }

    /// `startGroupConsumer` (spec.md §4.4): admits a new worker if the
    /// cross-node quota allows it, otherwise queues the admission.
    pub(crate) async fn start_group_consumer(
        self: &Arc<Self>,
        queue: &str,
        group: &str,
        group_key: Option<String>,
        from_pending: bool,
        n_consumers: usize,
    ) {
        let group_key = group_key.unwrap_or_else(|| keys::group_key(&self.config.key_prefix, queue, group));

        // Held across the count-read and the record-write below so two
        // racing admissions on this node can't both observe spare capacity
        // and both spawn a worker (spec.md I2/I3) — the registry's atomic
        // hash op is still the cross-node source of truth, this lock only
        // serializes this node's own admission decisions against each other.
        let lock = self.admission_lock(queue, group);
        let _admission_guard = lock.lock().await;

        let mut conn = match self.store.get_validated().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, queue, group, "failed to acquire connection for admission check");
                return;
            }
        };

        let count = match ConsumerRegistry::count_for_group(&mut conn, queue, group).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, queue, group, "failed to count active consumers");
                return;
            }
        };

        if count >= n_consumers {
            if !from_pending {
                debug!(queue, group, count, n_consumers, "group at capacity, admission queued");
                self.pending.lock().push_back(PendingAdmission {
                    queue: queue.to_string(),
                    group: group.to_string(),
                    group_key,
                });
            }
            return;
        }

        let worker_id = Uuid::new_v4().to_string();
        let consumer_key = Self::consumer_key(queue, group, &worker_id);
        let info = ConsumerInfo {
            owner: self.instance_id.clone(),
            worker_id: worker_id.clone(),
            should_stop: false,
        };

        if let Err(e) = ConsumerRegistry::add(&mut conn, queue, group, &worker_id, &info).await {
            warn!(error = %e, queue, group, worker_id, "failed to register consumer record");
            return;
        }
        drop(conn);
        drop(_admission_guard);

        let epoch = Arc::new(AtomicU64::new(0));
        self.local_timers.insert(consumer_key, epoch.clone());
        self.arm_inactivity_timer(queue.to_string(), group.to_string(), worker_id.clone(), epoch, 0);

        let worker = GroupWorker::new(self.clone(), queue.to_string(), group.to_string(), group_key, worker_id);
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        });
    }

    /// Only the owner node re-arms its own worker's timer; ownership is
    /// implicit since `local_timers` only ever holds entries this node
    /// created (invariant I5).
    pub(crate) fn reset_inactivity_timer(self: &Arc<Self>, queue: &str, group: &str, worker_id: &str) {
        let consumer_key = Self::consumer_key(queue, group, worker_id);
        if let Some(epoch) = self.local_timers.get(&consumer_key) {
            let epoch = epoch.clone();
            let armed_at = epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.arm_inactivity_timer(queue.to_string(), group.to_string(), worker_id.to_string(), epoch, armed_at);
        }
    }

    /// Schedules a deadline that, if it fires without the epoch having
    /// moved on, flips the consumer record's `shouldStop` to true. Acts as
    /// a cancellable timer without needing a cancellable sleep primitive
    /// (spec.md §9's "deadline + generation counter").
    fn arm_inactivity_timer(
        self: &Arc<Self>,
        queue: String,
        group: String,
        worker_id: String,
        epoch: Arc<AtomicU64>,
        armed_at: u64,
    ) {
        let scheduler = self.clone();
        let timeout = Duration::from_millis(self.config.inactivity_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if epoch.load(Ordering::SeqCst) != armed_at {
                return;
            }

            let mut conn = match scheduler.store.get_validated().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, queue, group, worker_id, "inactivity timer failed to acquire connection");
                    return;
                }
            };

            match ConsumerRegistry::get(&mut conn, &queue, &group, &worker_id).await {
                Ok(Some(consumer)) if !consumer.should_stop => {
                    if let Err(e) = ConsumerRegistry::set_should_stop(&mut conn, &queue, &group, &worker_id).await {
                        warn!(error = %e, queue, group, worker_id, "failed to flip shouldStop on inactivity");
                    } else {
                        debug!(queue, group, worker_id, "inactivity timeout elapsed, requesting worker stop");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, queue, group, worker_id, "inactivity timer failed to read consumer record"),
            }
        });
    }

    /// Called by a worker right before it terminates: clears local
    /// bookkeeping, deletes its consumer record, and drains admissions
    /// that were waiting on capacity (spec.md §4.4's "Pending drain").
    pub(crate) async fn on_worker_exit(self: &Arc<Self>, queue: &str, group: &str, worker_id: &str) {
        let consumer_key = Self::consumer_key(queue, group, worker_id);
        self.local_timers.remove(&consumer_key);

        if let Ok(mut conn) = self.store.get_validated().await {
            if let Err(e) = ConsumerRegistry::delete(&mut conn, queue, group, worker_id).await {
                warn!(error = %e, queue, group, worker_id, "failed to delete consumer record on exit");
            }
        }

        self.drain_pending().await;
    }

    async fn drain_pending(self: &Arc<Self>) {
        let snapshot: Vec<PendingAdmission> = {
            let mut guard = self.pending.lock();
            std::mem::take(&mut *guard).into_iter().collect()
        };

        let mut still_pending = VecDeque::new();

        for admission in snapshot {
            let n_consumers = match self.process_map.get(&admission.queue) {
                Some(entry) => entry.n_consumers,
                None => continue, // registration withdrawn; drop the stale admission
            };

            let count = match self.store.get_validated().await {
                Ok(mut conn) => ConsumerRegistry::count_for_group(&mut conn, &admission.queue, &admission.group)
                    .await
                    .unwrap_or(n_consumers),
                Err(_) => n_consumers,
            };

            if count < n_consumers {
                self.start_group_consumer(&admission.queue, &admission.group, Some(admission.group_key.clone()), true, n_consumers)
                    .await;
            } else {
                still_pending.push_back(admission);
            }
        }

        *self.pending.lock() = still_pending;
    }

    pub async fn update_job_status(&self, job_id: u64, status: JobStatus) -> Result<()> {
        let job_key = keys::job_key(&self.config.key_prefix, job_id);
        let mut conn = self.store.get_validated().await?;
        let applied = self.scripts.update_status(&mut conn, &job_key, status.as_str()).await?;
        if !applied {
            debug!(job_id, %status, "update_status was a no-op (already terminal or non-monotonic)");
        }
        Ok(())
    }

    pub async fn get_status(&self, job_id: u64) -> Result<Option<JobStatus>> {
        let job_key = keys::job_key(&self.config.key_prefix, job_id);
        let mut conn = self.store.get_validated().await?;
        let raw = self.scripts.get_status(&mut conn, &job_key).await?;
        Ok(raw.and_then(|s| JobStatus::parse(&s)))
    }

    /// Signals every worker to stop sleeping and closes the store pool so
    /// any operation still in flight fails on its next store round-trip
    /// (spec.md §6's `close()`, §5's shutdown contract).
    pub(crate) fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.store.close();
    }

    pub(crate) fn process_map_callback(&self, queue: &str) -> Option<Callback> {
        self.process_map.get(queue).map(|entry| entry.callback.clone())
    }
}
