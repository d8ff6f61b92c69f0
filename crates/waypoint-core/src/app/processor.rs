//! TaskProcessor - 1 タスク分の処理
//!
//! initialize（任意）→ URL 解決 → scan 実行 →（完了時 ack）→ tracker から削除。
//! どの段階で失敗しても（panic を含む）最後に必ず tracker から外す。
//! panic したタスクは Failure として扱い、不正メッセージと同じく ack して捨てる。
//! ack を削除より先に行うので、drain 完了時には ack も送信済み。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;

use super::resolver::{ResolveRequest, UrlResolver};
use super::tracker::TaskTracker;
use crate::domain::{JobEnvelope, ScanOutcome, TaskId};
use crate::ports::{Acker, ScanApi, ScanExecutor};

pub struct TaskProcessor {
    tracker: Arc<TaskTracker>,
    resolver: Arc<UrlResolver>,
    executor: Arc<dyn ScanExecutor>,
    initializer: Option<Arc<dyn ScanApi>>,
}

impl TaskProcessor {
    pub fn new(
        tracker: Arc<TaskTracker>,
        resolver: Arc<UrlResolver>,
        executor: Arc<dyn ScanExecutor>,
    ) -> Self {
        Self {
            tracker,
            resolver,
            executor,
            initializer: None,
        }
    }

    /// Call the scan API's initialize endpoint before resolving.
    pub fn with_initializer(mut self, api: Arc<dyn ScanApi>) -> Self {
        self.initializer = Some(api);
        self
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    /// Run one task to completion and remove it from the tracker.
    ///
    /// `ack` is sent after execution and before removal. A panic in the
    /// initializer, resolver or executor becomes a `Failure` outcome.
    pub async fn process(
        &self,
        id: TaskId,
        job: Arc<JobEnvelope>,
        ack: Option<Box<dyn Acker>>,
    ) -> ScanOutcome {
        tracing::debug!(
            task_id = %id,
            scan_id = %job.scan_id(),
            customer_id = %job.customer_id(),
            "processing task"
        );

        let (url_count, outcome) = match AssertUnwindSafe(self.run_pipeline(id, &job))
            .catch_unwind()
            .await
        {
            Ok(done) => done,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(task_id = %id, scan_id = %job.scan_id(), panic = %message, "task panicked");
                (0, ScanOutcome::failure(format!("panicked: {message}")))
            }
        };

        if let Some(acker) = ack {
            if let Err(err) = acker.ack().await {
                tracing::error!(task_id = %id, error = %err, "ack after completion failed");
            }
        }

        match self.tracker.remove(id) {
            Some(mut task) => {
                task.complete();
                let elapsed = task
                    .completed_at()
                    .map(|done| (done - task.started_at()).num_milliseconds())
                    .unwrap_or_default();
                tracing::info!(
                    task_id = %id,
                    scan_id = %job.scan_id(),
                    url_count,
                    outcome = ?outcome.kind,
                    elapsed_ms = elapsed,
                    "task finished"
                );
            }
            None => tracing::warn!(task_id = %id, "finished task was not tracked"),
        }

        outcome
    }

    async fn run_pipeline(&self, id: TaskId, job: &JobEnvelope) -> (usize, ScanOutcome) {
        if let Some(api) = &self.initializer {
            let started_ms = Utc::now().timestamp_millis();
            match api
                .initialize_scan(job.credential(), job.scan_id(), started_ms)
                .await
            {
                Ok(()) => tracing::debug!(task_id = %id, "scan initialized"),
                Err(err) => {
                    tracing::error!(task_id = %id, error = %err, "failed to initialize scan")
                }
            }
        }

        let urls = self.resolver.resolve(&ResolveRequest::from_job(job)).await;
        if urls.is_empty() {
            tracing::info!(task_id = %id, scan_id = %job.scan_id(), "job produced an empty target set");
        }

        let outcome = self.executor.execute(job, &urls).await;
        (urls.len(), outcome)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
