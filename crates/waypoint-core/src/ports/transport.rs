//! Transport port - メッセージ配送路（AMQP または InMemory）
//!
//! connect / declare-queue / publish / consume / ack の最小セット。
//! 実装: `impls::amqp::AmqpConnector`（本番）、`impls::inmem_transport`（テスト・ローカル）

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Errors from the messaging transport.
///
/// すべて transport-fatal として扱う（consumer loop は終了する）。
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    #[error("failed to publish message: {0}")]
    Publish(String),

    #[error("failed to start consuming: {0}")]
    Consume(String),

    #[error("failed to acknowledge delivery {tag}: {reason}")]
    Ack { tag: u64, reason: String },

    #[error("delivery stream closed")]
    StreamClosed,
}

/// Acknowledges exactly one delivery. Consumed on use.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<(), TransportError>;
}

/// One message pulled from the queue.
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub acker: Box<dyn Acker>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

impl Delivery {
    pub async fn ack(self) -> Result<(), TransportError> {
        self.acker.ack().await
    }
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, TransportError>>;

/// An open channel bound to one durable queue.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a message body to the bound queue.
    async fn publish(&self, body: &[u8]) -> Result<(), TransportError>;

    /// Start consuming. `auto_ack` のとき broker 側で即 ack される。
    async fn consume(&self, auto_ack: bool) -> Result<DeliveryStream, TransportError>;

    /// Close channel and connection. Errors are logged, not returned.
    async fn close(&self);
}

/// Opens a fresh [`Transport`] (connect + channel + declare).
///
/// reconnect のたびに呼ばれる。
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}
