//! Consumer - 受信ループ
//!
//! # フロー
//! 1. DeliveryStream から 1 件受け取る（shutdown と select）
//! 2. JobEnvelope に decode（失敗したら log して捨てる）
//! 3. 同時実行 permit を取る（満杯なら待つ = backpressure）。
//!    manual ack なら shutdown で待ちを打ち切り、auto ack なら最後まで待つ
//! 4. TaskTracker に登録し、処理を spawn
//! 5. manual ack のとき ack（dispatch 直後 or 処理完了後）
//!
//! ループ自身は in-flight タスクを待たない。待つのは shutdown 側の仕事。

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};

use super::processor::TaskProcessor;
use super::tracker::TaskTracker;
use crate::domain::{JobEnvelope, Task, TaskId};
use crate::ports::{Delivery, DeliveryStream, TransportError};

/// When a manually acknowledged delivery is acked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckTiming {
    /// Right after the handoff. A crash mid-processing loses the message.
    OnDispatch,
    /// After processing finished. A crash mid-processing redelivers it.
    #[default]
    OnCompletion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub auto_ack: bool,
    pub ack_timing: AckTiming,
    pub max_in_flight: usize,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            auto_ack: false,
            ack_timing: AckTiming::OnCompletion,
            max_in_flight: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Running,
    Stopped,
}

/// Why [`Consumer::run`] returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Shutdown was requested.
    Stopped,
}

pub struct Consumer {
    processor: Arc<TaskProcessor>,
    settings: ConsumerSettings,
    permits: Arc<Semaphore>,
    state: ConsumerState,
}

impl Consumer {
    pub fn new(processor: Arc<TaskProcessor>, settings: ConsumerSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));
        Self {
            processor,
            settings,
            permits,
            state: ConsumerState::Running,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    fn tracker(&self) -> &Arc<TaskTracker> {
        self.processor.tracker()
    }

    /// Receive until shutdown is requested.
    ///
    /// Transport errors and the end of the stream are returned as `Err`;
    /// the caller decides whether to reconnect.
    pub async fn run(
        &mut self,
        mut deliveries: DeliveryStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<ConsumerExit, TransportError> {
        if self.state == ConsumerState::Stopped {
            return Ok(ConsumerExit::Stopped);
        }

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // sender が drop された場合も停止扱い
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => return Err(err),
                None => return Err(TransportError::StreamClosed),
            };

            if !self.handle(delivery, shutdown).await? {
                break;
            }
        }

        self.state = ConsumerState::Stopped;
        tracing::info!(in_flight = self.tracker().count(), "stopped the consumer");
        Ok(ConsumerExit::Stopped)
    }

    /// Returns `Ok(false)` when a manually acked delivery was released
    /// because shutdown arrived while waiting for a permit.
    ///
    /// Auto-acked deliveries are always dispatched.
    async fn handle(
        &self,
        delivery: Delivery,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, TransportError> {
        let tag = delivery.delivery_tag;
        let manual_ack = !self.settings.auto_ack;

        let job = match JobEnvelope::decode(&delivery.body) {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(delivery_tag = tag, error = %err, "dropping malformed job envelope");
                // 再配送ループを避けるため manual でも ack して捨てる
                if manual_ack {
                    delivery.ack().await?;
                }
                return Ok(true);
            }
        };

        let permit = if manual_ack {
            let Some(permit) = self.acquire_permit(shutdown).await else {
                // 未 ack のまま手放すと broker が再配送する
                tracing::info!(delivery_tag = tag, "shutdown while waiting for capacity, releasing delivery");
                return Ok(false);
            };
            permit
        } else {
            // auto ack は受信時点で broker 側 ack 済み。shutdown 中でも permit を待って処理する
            match Arc::clone(&self.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    tracing::warn!(delivery_tag = tag, scan_id = %job.scan_id(), "permits closed, auto-acked job lost");
                    return Ok(false);
                }
            }
        };

        let id = TaskId::from_delivery_tag(tag);
        let task = Task::new(id, job);
        let job = Arc::clone(task.job());
        tracing::info!(task_id = %id, scan_id = %job.scan_id(), "received job");
        self.tracker().insert(id, task);

        let processor = Arc::clone(&self.processor);
        let Delivery { acker, .. } = delivery;

        if manual_ack && self.settings.ack_timing == AckTiming::OnCompletion {
            tokio::spawn(async move {
                processor.process(id, job, Some(acker)).await;
                drop(permit);
            });
        } else {
            tokio::spawn(async move {
                processor.process(id, job, None).await;
                drop(permit);
            });
            if manual_ack {
                acker.ack().await?;
            }
        }

        Ok(true)
    }

    async fn acquire_permit(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<OwnedSemaphorePermit> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            tokio::select! {
                biased;
                permit = Arc::clone(&self.permits).acquire_owned() => return permit.ok(),
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::resolver::UrlResolver;
    use crate::app::shutdown::{DrainConfig, DrainOutcome, drain};
    use crate::domain::ScanOutcome;
    use crate::impls::inmem_transport::InMemoryBroker;
    use crate::ports::{
        ApiError, ObjectStore, ScanApi, ScanExecutor, StorageError, TransportConnector,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct NoStore;

    #[async_trait]
    impl ObjectStore for NoStore {
        async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound { key: key.into() })
        }
    }

    struct EmptyApi;

    #[async_trait]
    impl ScanApi for EmptyApi {
        async fn spider_results(&self, _: &str, _: Uuid) -> Result<Vec<String>, ApiError> {
            Ok(vec![])
        }
        async fn live_hosts(&self, _: &str, _: Uuid) -> Result<Vec<String>, ApiError> {
            Ok(vec![])
        }
        async fn scan_chunk(&self, _: &str, _: Uuid, _: u64) -> Result<Vec<String>, ApiError> {
            Ok(vec![])
        }
        async fn initialize_scan(&self, _: &str, _: Uuid, _: i64) -> Result<(), ApiError> {
            Ok(())
        }
    }

    /// Executor that blocks until released.
    struct GatedExecutor {
        gate: Semaphore,
        executed: AtomicUsize,
    }

    impl GatedExecutor {
        fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }
    }

    #[async_trait]
    impl ScanExecutor for GatedExecutor {
        async fn execute(&self, _job: &JobEnvelope, _urls: &[String]) -> ScanOutcome {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            self.executed.fetch_add(1, Ordering::SeqCst);
            ScanOutcome::no_targets()
        }
    }

    fn body() -> Vec<u8> {
        JobEnvelope::builder(
            "d457aca4-c14c-4e3f-aa2a-9b767eadd438",
            "db53e4db-b173-4565-905c-7a976afc08dc",
            "k",
            "https://example.com",
        )
        .build()
        .unwrap()
        .encode()
        .unwrap()
    }

    fn consumer(
        settings: ConsumerSettings,
    ) -> (Consumer, Arc<TaskTracker>, Arc<GatedExecutor>) {
        let tracker = Arc::new(TaskTracker::new());
        let executor = Arc::new(GatedExecutor {
            gate: Semaphore::new(0),
            executed: AtomicUsize::new(0),
        });
        let resolver = Arc::new(UrlResolver::new(Arc::new(NoStore), Arc::new(EmptyApi)));
        let processor = Arc::new(TaskProcessor::new(
            tracker.clone(),
            resolver,
            executor.clone(),
        ));
        (Consumer::new(processor, settings), tracker, executor)
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn malformed_message_is_dropped_and_acked() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        transport.publish(b"{garbage").await.unwrap();

        let (mut consumer, tracker, _exec) = consumer(ConsumerSettings::default());
        let (tx, mut rx) = watch::channel(false);
        let stream = transport.consume(false).await.unwrap();

        let run = tokio::spawn(async move { consumer.run(stream, &mut rx).await });
        wait_for(|| broker.acked().len() == 1).await;
        assert_eq!(tracker.count(), 0);

        tx.send(true).unwrap();
        assert_eq!(run.await.unwrap().unwrap(), ConsumerExit::Stopped);
    }

    #[tokio::test]
    async fn ack_on_completion_waits_for_processing() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        transport.publish(&body()).await.unwrap();

        let (mut consumer, tracker, exec) = consumer(ConsumerSettings::default());
        let (tx, mut rx) = watch::channel(false);
        let stream = transport.consume(false).await.unwrap();
        let run = tokio::spawn(async move { consumer.run(stream, &mut rx).await });

        wait_for(|| tracker.count() == 1).await;
        assert!(broker.acked().is_empty());

        exec.release(1);
        wait_for(|| tracker.count() == 0).await;
        wait_for(|| broker.acked().len() == 1).await;

        tx.send(true).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn ack_on_dispatch_acks_before_processing_ends() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        transport.publish(&body()).await.unwrap();

        let settings = ConsumerSettings {
            ack_timing: AckTiming::OnDispatch,
            ..Default::default()
        };
        let (mut consumer, tracker, exec) = consumer(settings);
        let (tx, mut rx) = watch::channel(false);
        let stream = transport.consume(false).await.unwrap();
        let run = tokio::spawn(async move { consumer.run(stream, &mut rx).await });

        wait_for(|| broker.acked().len() == 1).await;
        assert_eq!(tracker.count(), 1);

        exec.release(1);
        wait_for(|| tracker.count() == 0).await;
        tx.send(true).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn auto_ack_never_acks_explicitly() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        transport.publish(&body()).await.unwrap();

        let settings = ConsumerSettings {
            auto_ack: true,
            ..Default::default()
        };
        let (mut consumer, tracker, exec) = consumer(settings);
        let (tx, mut rx) = watch::channel(false);
        let stream = transport.consume(true).await.unwrap();
        let run = tokio::spawn(async move { consumer.run(stream, &mut rx).await });

        wait_for(|| tracker.count() == 1).await;
        exec.release(1);
        wait_for(|| tracker.count() == 0).await;
        tx.send(true).unwrap();
        run.await.unwrap().unwrap();

        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn max_in_flight_bounds_concurrency() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        for _ in 0..3 {
            transport.publish(&body()).await.unwrap();
        }

        let settings = ConsumerSettings {
            max_in_flight: 2,
            ..Default::default()
        };
        let (mut consumer, tracker, exec) = consumer(settings);
        let (tx, mut rx) = watch::channel(false);
        let stream = transport.consume(false).await.unwrap();
        let run = tokio::spawn(async move { consumer.run(stream, &mut rx).await });

        wait_for(|| tracker.count() == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tracker.count(), 2);

        // 1 つ終わらせると 3 件目が入る
        exec.release(1);
        wait_for(|| broker.acked().len() == 1).await;
        wait_for(|| tracker.count() == 2).await;

        exec.release(2);
        wait_for(|| tracker.count() == 0).await;

        tx.send(true).unwrap();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn auto_ack_dispatches_a_waiting_job_after_shutdown() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        transport.publish(&body()).await.unwrap();
        transport.publish(&body()).await.unwrap();

        let settings = ConsumerSettings {
            auto_ack: true,
            max_in_flight: 1,
            ..Default::default()
        };
        let (mut consumer, tracker, exec) = consumer(settings);
        let (tx, mut rx) = watch::channel(false);
        let stream = transport.consume(true).await.unwrap();
        let run = tokio::spawn(async move { consumer.run(stream, &mut rx).await });

        // 1 件目が permit を握り、2 件目は permit 待ち
        wait_for(|| tracker.count() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        exec.release(2);

        assert_eq!(run.await.unwrap().unwrap(), ConsumerExit::Stopped);
        wait_for(|| exec.executed.load(Ordering::SeqCst) == 2).await;
        wait_for(|| tracker.count() == 0).await;
        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn manual_ack_releases_a_waiting_delivery_on_shutdown() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        transport.publish(&body()).await.unwrap();
        transport.publish(&body()).await.unwrap();

        let settings = ConsumerSettings {
            max_in_flight: 1,
            ..Default::default()
        };
        let (mut consumer, tracker, exec) = consumer(settings);
        let (tx, mut rx) = watch::channel(false);
        let stream = transport.consume(false).await.unwrap();
        let run = tokio::spawn(async move { consumer.run(stream, &mut rx).await });

        wait_for(|| tracker.count() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        tx.send(true).unwrap();
        assert_eq!(run.await.unwrap().unwrap(), ConsumerExit::Stopped);

        exec.release(2);
        wait_for(|| tracker.count() == 0).await;
        assert_eq!(exec.executed.load(Ordering::SeqCst), 1);
        assert_eq!(broker.acked().len(), 1);
    }

    struct PanickingExecutor;

    #[async_trait]
    impl ScanExecutor for PanickingExecutor {
        async fn execute(&self, _job: &JobEnvelope, _urls: &[String]) -> ScanOutcome {
            panic!("scanner bug");
        }
    }

    #[tokio::test]
    async fn panicking_task_is_acked_and_does_not_block_drain() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        transport.publish(&body()).await.unwrap();

        let tracker = Arc::new(TaskTracker::new());
        let resolver = Arc::new(UrlResolver::new(Arc::new(NoStore), Arc::new(EmptyApi)));
        let processor = Arc::new(TaskProcessor::new(
            tracker.clone(),
            resolver,
            Arc::new(PanickingExecutor),
        ));
        let mut consumer = Consumer::new(processor, ConsumerSettings::default());
        let (tx, mut rx) = watch::channel(false);
        let stream = transport.consume(false).await.unwrap();
        let run = tokio::spawn(async move { consumer.run(stream, &mut rx).await });

        wait_for(|| broker.acked().len() == 1).await;
        tx.send(true).unwrap();
        run.await.unwrap().unwrap();

        let config = DrainConfig {
            poll_interval: Duration::from_millis(10),
            max_wait: Some(Duration::from_secs(2)),
        };
        assert_eq!(drain(&tracker, &config).await, DrainOutcome::Drained);
    }

    #[tokio::test]
    async fn closed_stream_is_a_transport_error() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        let stream = transport.consume(false).await.unwrap();
        transport.close().await;

        let (mut consumer, _tracker, _exec) = consumer(ConsumerSettings::default());
        let (_tx, mut rx) = watch::channel(false);
        let err = consumer.run(stream, &mut rx).await.unwrap_err();
        assert!(matches!(err, TransportError::StreamClosed));
        assert_eq!(consumer.state(), ConsumerState::Running);
    }
}
