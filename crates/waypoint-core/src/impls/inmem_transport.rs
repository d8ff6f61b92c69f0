//! InMemoryBroker - 開発・テスト用の配送路
//!
//! # 実装詳細
//! - 1 本の mpsc キューを全 channel で共有（durable queue 相当）
//! - connect() ごとに新しい channel（`InMemoryTransport`）を作る
//! - channel の close は watch で consume 中の stream に伝える
//! - ack された delivery tag を記録する（テストで検査する）

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::ports::{
    Acker, Delivery, DeliveryStream, Transport, TransportConnector, TransportError,
};

struct BrokerInner {
    queue_tx: mpsc::UnboundedSender<Vec<u8>>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    next_tag: AtomicU64,
    acked: Mutex<Vec<u64>>,
    channels: Mutex<Vec<Arc<watch::Sender<bool>>>>,
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
}

/// In-process stand-in for the message broker.
///
/// # 使用例
/// ```ignore
/// let broker = InMemoryBroker::new();
/// broker.connect().await?.publish(b"{...}").await?;
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(BrokerInner {
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                next_tag: AtomicU64::new(0),
                acked: Mutex::new(Vec::new()),
                channels: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                failing_connects: AtomicUsize::new(0),
            }),
        }
    }

    /// Delivery tags acknowledged so far, in ack order.
    pub fn acked(&self) -> Vec<u64> {
        self.inner
            .acked
            .lock()
            .map(|acked| acked.clone())
            .unwrap_or_default()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Make the next `n` connects fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Close every open channel, as a broker restart would.
    pub fn drop_connections(&self) {
        if let Ok(mut channels) = self.inner.channels.lock() {
            for closed in channels.drain(..) {
                closed.send_replace(true);
            }
        }
    }

    /// Channels not yet closed.
    pub fn open_channels(&self) -> usize {
        self.inner
            .channels
            .lock()
            .map(|mut channels| {
                prune_closed(&mut channels);
                channels.len()
            })
            .unwrap_or_default()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let failing = self.inner.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner
                .failing_connects
                .store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Connect("broker unavailable".into()));
        }

        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        if let Ok(mut channels) = self.inner.channels.lock() {
            prune_closed(&mut channels);
            channels.push(Arc::clone(&closed));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryTransport {
            inner: Arc::clone(&self.inner),
            closed,
        }))
    }
}

/// close 済みの channel を外す
fn prune_closed(channels: &mut Vec<Arc<watch::Sender<bool>>>) {
    channels.retain(|closed| !*closed.borrow());
}

/// One channel on an [`InMemoryBroker`].
pub struct InMemoryTransport {
    inner: Arc<BrokerInner>,
    closed: Arc<watch::Sender<bool>>,
}

struct InMemoryAcker {
    tag: u64,
    inner: Arc<BrokerInner>,
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        let mut acked = self.inner.acked.lock().map_err(|e| TransportError::Ack {
            tag: self.tag,
            reason: e.to_string(),
        })?;
        acked.push(self.tag);
        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, body: &[u8]) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Publish("channel closed".into()));
        }
        self.inner
            .queue_tx
            .send(body.to_vec())
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn consume(&self, _auto_ack: bool) -> Result<DeliveryStream, TransportError> {
        let state = (Arc::clone(&self.inner), self.closed.subscribe());

        let stream = futures::stream::unfold(state, |(inner, mut closed)| async move {
            if *closed.borrow() {
                return None;
            }
            let body = {
                let mut rx = inner.queue_rx.lock().await;
                tokio::select! {
                    body = rx.recv() => body,
                    _ = closed.changed() => None,
                }
            }?;

            let tag = inner.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
            let delivery = Delivery {
                delivery_tag: tag,
                body,
                acker: Box::new(InMemoryAcker {
                    tag,
                    inner: Arc::clone(&inner),
                }),
            };
            Some((Ok(delivery), (inner, closed)))
        });

        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_consume_ack_roundtrip() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        transport.publish(b"one").await.unwrap();
        transport.publish(b"two").await.unwrap();

        let mut stream = transport.consume(false).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.body, b"one");
        assert_eq!(second.body, b"two");
        assert!(first.delivery_tag < second.delivery_tag);

        second.ack().await.unwrap();
        assert_eq!(broker.acked(), vec![2]);
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let broker = InMemoryBroker::new();
        let transport = broker.connect().await.unwrap();
        let mut stream = transport.consume(false).await.unwrap();

        let next = tokio::spawn(async move { stream.next().await.is_none() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.close().await;

        assert!(next.await.unwrap());
        assert!(transport.publish(b"late").await.is_err());
    }

    #[tokio::test]
    async fn queue_survives_reconnect() {
        let broker = InMemoryBroker::new();
        let first = broker.connect().await.unwrap();
        first.publish(b"kept").await.unwrap();
        broker.drop_connections();

        let second = broker.connect().await.unwrap();
        let mut stream = second.consume(false).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().body, b"kept");
        assert_eq!(broker.connect_count(), 2);
    }

    #[tokio::test]
    async fn closed_channels_are_not_retained() {
        let broker = InMemoryBroker::new();
        for _ in 0..5 {
            let transport = broker.connect().await.unwrap();
            transport.close().await;
        }
        let live = broker.connect().await.unwrap();
        assert_eq!(broker.open_channels(), 1);

        broker.drop_connections();
        assert_eq!(broker.open_channels(), 0);
        assert!(live.publish(b"late").await.is_err());
    }

    #[tokio::test]
    async fn scripted_connect_failures() {
        let broker = InMemoryBroker::new();
        broker.fail_next_connects(1);
        assert!(broker.connect().await.is_err());
        assert!(broker.connect().await.is_ok());
    }
}
