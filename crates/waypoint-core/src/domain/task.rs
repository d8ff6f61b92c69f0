use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{JobEnvelope, TaskId};

/// Runtime record of one in-flight job.
///
/// `TaskTracker` が所有する。処理側は `Arc<JobEnvelope>` の clone だけを持つ。
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    job: Arc<JobEnvelope>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    is_completed: bool,
}

impl Task {
    pub fn new(id: TaskId, job: JobEnvelope) -> Self {
        Self {
            id,
            job: Arc::new(job),
            started_at: Utc::now(),
            completed_at: None,
            is_completed: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn job(&self) -> &Arc<JobEnvelope> {
        &self.job
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    /// Mark the task finished (success or failure).
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        self.is_completed = true;
    }
}
