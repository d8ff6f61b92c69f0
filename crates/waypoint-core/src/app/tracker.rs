//! TaskTracker - 処理中タスクの登録簿
//!
//! consumer loop・処理タスク・shutdown の三者から同時に触られる唯一の共有状態。
//! `Service` が所有し、`Arc` で配る（グローバル状態にはしない）。

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::domain::{Task, TaskId};

/// Diagnostic view of one in-flight task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub id: TaskId,
    pub scan_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Concurrent map of in-flight tasks.
///
/// Invariant: an id is present iff its processing has started and not finished.
#[derive(Debug, Default)]
pub struct TaskTracker {
    tasks: DashMap<TaskId, Task>,
    removed: Notify,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the entry for `id`.
    pub fn insert(&self, id: TaskId, task: Task) {
        if self.tasks.insert(id, task).is_some() {
            tracing::debug!(task_id = %id, "replaced tracked task");
        }
    }

    /// Remove the entry for `id`. Absent ids are a no-op.
    pub fn remove(&self, id: TaskId) -> Option<Task> {
        let removed = self.tasks.remove(&id).map(|(_, task)| task);
        if removed.is_none() {
            tracing::debug!(task_id = %id, "remove of untracked task ignored");
        }
        self.removed.notify_waiters();
        removed
    }

    /// Number of in-flight tasks right now. Not linearizable with
    /// concurrent inserts; good enough for drain decisions.
    pub fn count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    /// Summaries sorted by task id.
    pub fn snapshot(&self) -> Vec<TaskSummary> {
        let mut out: Vec<TaskSummary> = self
            .tasks
            .iter()
            .map(|entry| {
                let task = entry.value();
                TaskSummary {
                    id: task.id(),
                    scan_id: task.job().scan_id(),
                    started_at: task.started_at(),
                }
            })
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    /// Resolve once the tracker is empty.
    ///
    /// removal で起こされ、少なくとも `poll_interval` ごとに再確認する。
    pub async fn wait_until_empty(&self, poll_interval: Duration) {
        loop {
            // notified() を count 確認より先に登録して取りこぼしを防ぐ
            let notified = self.removed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let count = self.count();
            if count == 0 {
                return;
            }
            tracing::info!(count, "waiting for in-flight tasks");

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}
