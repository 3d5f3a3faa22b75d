use serde::{Deserialize, Serialize};

pub mod error;
pub mod logging;

pub use error::QubeError;

// ============================================================================
// Job status
// ============================================================================

/// Status of a job record. Transitions only `Pending -> Active -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether `self -> next` is a permitted transition (invariant I4).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Active)
                | (JobStatus::Active, JobStatus::Completed)
                | (JobStatus::Active, JobStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "active" => Some(JobStatus::Active),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Job
// ============================================================================

/// A job handed to a consumer callback: the opaque payload plus addressing.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub queue: String,
    pub group: String,
    pub data: Vec<u8>,
}

// ============================================================================
// Consumer registry entries
// ============================================================================

/// Value stored at `activeGroupConsumers[qube:{queue}:{group}:{workerId}]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub owner: String,
    pub worker_id: String,
    pub should_stop: bool,
}

// ============================================================================
// Notification fabric
// ============================================================================

/// Payload published to `QUEUE:NEWJOB` and consumed by every node's Notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJobNotification {
    pub queue_name: String,
    pub group_name: String,
}
