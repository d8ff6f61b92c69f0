//! AMQP 0-9-1 transport (lapin)
//!
//! connect ごとに connection + channel を 1 本ずつ張り、queue を declare する。
//! publish は default exchange 経由で queue 名を routing key にする。

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use ulid::Ulid;

use crate::config::RabbitMqConfig;
use crate::ports::{
    Acker, Delivery, DeliveryStream, Transport, TransportConnector, TransportError,
};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

#[derive(Debug, Clone)]
pub struct AmqpConnector {
    url: String,
    queue: String,
    durable: bool,
    /// 0 = unlimited
    prefetch: u16,
}

impl AmqpConnector {
    pub fn new(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
            durable: true,
            prefetch: 0,
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn from_config(config: &RabbitMqConfig) -> Self {
        Self::new(&config.url, &config.queue_name)
            .durable(config.durable)
            .prefetch(config.prefetch)
    }
}

#[async_trait]
impl TransportConnector for AmqpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;

        if self.prefetch > 0 {
            channel
                .basic_qos(self.prefetch, BasicQosOptions::default())
                .await
                .map_err(|e| TransportError::Channel(e.to_string()))?;
        }

        channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: self.durable,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Declare {
                queue: self.queue.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!(queue = %self.queue, durable = self.durable, "declared queue");
        Ok(Box::new(AmqpTransport {
            connection,
            channel,
            queue: self.queue.clone(),
            durable: self.durable,
        }))
    }
}

pub struct AmqpTransport {
    connection: Connection,
    channel: Channel,
    queue: String,
    durable: bool,
}

struct AmqpAcker {
    tag: u64,
    inner: lapin::acker::Acker,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        self.inner
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| TransportError::Ack {
                tag: self.tag,
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn publish(&self, body: &[u8]) -> Result<(), TransportError> {
        let mut properties = BasicProperties::default().with_content_type("application/json".into());
        if self.durable {
            properties = properties.with_delivery_mode(PERSISTENT);
        }

        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, auto_ack: bool) -> Result<DeliveryStream, TransportError> {
        let consumer_tag = format!("waypoint-{}", Ulid::new());
        let consumer = self
            .channel
            .basic_consume(
                &self.queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: auto_ack,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Consume(e.to_string()))?;

        tracing::info!(queue = %self.queue, consumer_tag = %consumer_tag, auto_ack, "consuming");

        let stream = consumer.map(|item| match item {
            Ok(delivery) => Ok(Delivery {
                delivery_tag: delivery.delivery_tag,
                body: delivery.data,
                acker: Box::new(AmqpAcker {
                    tag: delivery.delivery_tag,
                    inner: delivery.acker,
                }) as Box<dyn Acker>,
            }),
            Err(e) => Err(TransportError::Consume(e.to_string())),
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close(200, "OK").await {
            tracing::debug!(error = %e, "channel close failed");
        }
        if let Err(e) = self.connection.close(200, "OK").await {
            tracing::debug!(error = %e, "connection close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_copies_queue_settings() {
        let config = RabbitMqConfig {
            url: "amqp://localhost:5672/%2f".into(),
            queue_name: "scans".into(),
            durable: false,
            auto_ack: false,
            prefetch: 8,
            max_reconnect_attempts: 10,
        };
        let connector = AmqpConnector::from_config(&config);
        assert_eq!(connector.queue, "scans");
        assert!(!connector.durable);
        assert_eq!(connector.prefetch, 8);
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connect_error() {
        let connector = AmqpConnector::new("amqp://127.0.0.1:1/%2f", "scans");
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
