//! Publisher - JobEnvelope を queue に積む側

use crate::domain::JobEnvelope;
use crate::error::WaypointError;
use crate::ports::Transport;

pub struct Publisher {
    transport: Box<dyn Transport>,
}

impl Publisher {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn publish(&self, job: &JobEnvelope) -> Result<(), WaypointError> {
        let body = job.encode()?;
        self.transport.publish(&body).await?;
        tracing::info!(
            scan_id = %job.scan_id(),
            customer_id = %job.customer_id(),
            bytes = body.len(),
            "published job"
        );
        Ok(())
    }

    pub async fn close(self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::inmem_transport::InMemoryBroker;
    use crate::ports::TransportConnector;
    use futures::StreamExt;

    #[tokio::test]
    async fn published_body_decodes_back() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(broker.connect().await.unwrap());
        let job = JobEnvelope::builder(
            "d457aca4-c14c-4e3f-aa2a-9b767eadd438",
            "db53e4db-b173-4565-905c-7a976afc08dc",
            "k",
            "https://example.com",
        )
        .chunk_id(3)
        .build()
        .unwrap();

        publisher.publish(&job).await.unwrap();

        let transport = broker.connect().await.unwrap();
        let mut stream = transport.consume(false).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(JobEnvelope::decode(&delivery.body).unwrap(), job);
    }

    #[tokio::test]
    async fn publish_on_closed_channel_fails() {
        let broker = InMemoryBroker::new();
        let publisher = Publisher::new(broker.connect().await.unwrap());
        broker.drop_connections();

        let job = JobEnvelope::builder(
            "d457aca4-c14c-4e3f-aa2a-9b767eadd438",
            "db53e4db-b173-4565-905c-7a976afc08dc",
            "k",
            "https://example.com",
        )
        .build()
        .unwrap();
        assert!(matches!(
            publisher.publish(&job).await,
            Err(WaypointError::Transport(_))
        ));
    }
}
