//! `qube`: the public facade over the group-ordered job queue — construct,
//! init, add, process, maintenance, and close (spec.md §6).

mod job;
mod notifier;
mod scheduler;
mod worker;

pub use job::{BoxFuture, DoneHandle, Job};
pub use qube_common::{JobStatus, QubeError};
pub use qube_config::QubeConfig;

use std::sync::Arc;

use parking_lot::Mutex;

use job::Callback;
use notifier::Notifier;
use qube_store::{pool, ScriptRegistry, StorePool};
use scheduler::GroupScheduler;

type Result<T> = std::result::Result<T, QubeError>;

/// A node's handle onto the queue: one `StoreClient` pool, one dedicated
/// publisher and subscriber connection, and the local scheduling state that
/// spawns and supervises group workers.
pub struct Qube {
    config: QubeConfig,
    scheduler: Mutex<Option<Arc<GroupScheduler>>>,
    notifier: Mutex<Option<Notifier>>,
}

impl Qube {
    /// `construct(credentials, logLevel?)` in spec.md §6; here `credentials`
    /// and tunables both live on `QubeConfig` (see `QubeConfig::credentials`
    /// for the `{host, port, password, db}` view spec.md names).
    pub fn construct(config: QubeConfig) -> Self {
        Self {
            config,
            scheduler: Mutex::new(None),
            notifier: Mutex::new(None),
        }
    }

    /// Loads scripts and subscribes to notifications; must complete before
    /// `add` or `process` (spec.md §6).
    pub async fn init(&self) -> Result<()> {
        self.config.validate().map_err(|e| QubeError::Config(e.to_string()))?;

        let store = Arc::new(StorePool::new(&self.config.redis_url, self.config.pool_min, self.config.pool_max).await?);

        let mut conn = store.get_validated().await?;
        let scripts = Arc::new(ScriptRegistry::load(&mut conn).await?);
        drop(conn);

        let publisher = pool::open_publisher(&self.config.redis_url).await?;
        let scheduler = GroupScheduler::new(self.config.clone(), store, scripts, publisher);

        let notifier = Notifier::spawn(&self.config.redis_url, &self.config.notify_channel, scheduler.clone()).await?;

        *self.scheduler.lock() = Some(scheduler);
        *self.notifier.lock() = Some(notifier);

        Ok(())
    }

    fn scheduler(&self) -> Result<Arc<GroupScheduler>> {
        self.scheduler.lock().clone().ok_or(QubeError::NotInitialized)
    }

    /// `add(queueName, groupName, data) -> jobId` (spec.md §6).
    pub async fn add(&self, queue: &str, group: &str, data: Vec<u8>) -> Result<u64> {
        self.scheduler()?.add(queue, group, data).await
    }

    /// `process(queueName, nConsumers, callback)` (spec.md §6). Registers
    /// the callback and admits workers for groups known at this instant;
    /// groups created afterward are picked up via notifications.
    pub async fn process<F>(&self, queue: &str, n_consumers: usize, callback: F) -> Result<()>
    where
        F: Fn(Job, DoneHandle) -> BoxFuture + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.scheduler()?.process(queue, n_consumers, callback).await
    }

    /// Maintenance: force a status transition outside the normal
    /// dequeue/callback flow.
    pub async fn update_job_status(&self, job_id: u64, status: JobStatus) -> Result<()> {
        self.scheduler()?.update_job_status(job_id, status).await
    }

    /// Maintenance: read the current status of a job, or `None` if unknown.
    pub async fn get_status(&self, job_id: u64) -> Result<Option<JobStatus>> {
        self.scheduler()?.get_status(job_id).await
    }

    /// Shuts down the pool and dedicated connections. In-flight workers
    /// observe their next store operation fail and treat it as terminal;
    /// graceful draining of in-flight jobs is not attempted (spec.md §5).
    pub async fn close(&self) -> Result<()> {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
        }
        self.notifier.lock().take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_does_not_require_a_live_store() {
        let qube = Qube::construct(QubeConfig::default());
        assert!(qube.scheduler.lock().is_none());
    }
}
