//! Service - consumer の監督と終了処理
//!
//! # ライフサイクル
//! 1. connect（初回の失敗は致命的）
//! 2. consume → Consumer::run
//! 3. transport が落ちたら backoff 付きで再接続（tracker と処理中タスクはそのまま）
//! 4. shutdown で consumer が止まったら drain → close

use std::sync::Arc;

use tokio::sync::watch;

use super::consumer::{Consumer, ConsumerExit, ConsumerSettings};
use super::processor::TaskProcessor;
use super::retry::RetryPolicy;
use super::shutdown::{DrainConfig, DrainOutcome, drain};
use super::tracker::TaskTracker;
use crate::error::WaypointError;
use crate::ports::{Transport, TransportConnector, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub consumer: ConsumerSettings,
    pub drain: DrainConfig,
    pub reconnect: RetryPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            consumer: ConsumerSettings::default(),
            drain: DrainConfig::default(),
            reconnect: RetryPolicy::reconnect(10),
        }
    }
}

pub struct Service {
    settings: ServiceSettings,
    connector: Arc<dyn TransportConnector>,
    tracker: Arc<TaskTracker>,
    consumer: Consumer,
}

impl Service {
    pub fn new(
        settings: ServiceSettings,
        connector: Arc<dyn TransportConnector>,
        processor: Arc<TaskProcessor>,
    ) -> Self {
        let tracker = Arc::clone(processor.tracker());
        let consumer = Consumer::new(processor, settings.consumer.clone());
        Self {
            settings,
            connector,
            tracker,
            consumer,
        }
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    /// Consume until `shutdown` turns `true`, then wait for in-flight tasks.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DrainOutcome, WaypointError> {
        let mut transport = Some(self.connector.connect().await?);
        tracing::info!("connected to broker");

        while let Some(current) = transport.as_ref() {
            let result = match current.consume(self.settings.consumer.auto_ack).await {
                Ok(stream) => self.consumer.run(stream, &mut shutdown).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(ConsumerExit::Stopped) => break,
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        in_flight = self.tracker.count(),
                        "lost broker connection"
                    );
                    current.close().await;
                    transport = self.reconnect(&mut shutdown, err).await?;
                }
            }
        }

        let outcome = drain(&self.tracker, &self.settings.drain).await;
        if let Some(transport) = transport {
            transport.close().await;
        }
        Ok(outcome)
    }

    /// `Ok(None)` when shutdown arrived during backoff.
    async fn reconnect(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        mut last: TransportError,
    ) -> Result<Option<Box<dyn Transport>>, WaypointError> {
        let policy = &self.settings.reconnect;
        let mut attempts = 0u32;

        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }
            if !policy.allows_another(attempts) {
                return Err(WaypointError::ReconnectExhausted { attempts, last });
            }

            let delay = policy.next_delay(attempts + 1);
            tracing::info!(
                attempt = attempts + 1,
                delay_ms = delay.as_millis() as u64,
                "reconnecting to broker"
            );
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                    continue;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            attempts += 1;
            match self.connector.connect().await {
                Ok(transport) => {
                    tracing::info!(attempt = attempts, "reconnected to broker");
                    return Ok(Some(transport));
                }
                Err(err) => {
                    tracing::warn!(attempt = attempts, error = %err, "reconnect failed");
                    last = err;
                }
            }
        }
    }
}
