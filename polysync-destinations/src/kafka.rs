use async_trait::async_trait;
use polysync::clients::{EventHeaders, EventPublisher};
use polysync::error::{ErrorKind, SyncResult};
use polysync::sync_error;
use polysync_config::shared::KafkaConfig;
use rdkafka::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tracing::debug;

/// Event bus adapter producing to Kafka.
///
/// Records are keyed by the caller's key so every event of one row lands on the same
/// partition and keeps its order.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> SyncResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("enable.idempotence", "true")
            .create()
            .map_err(|err| {
                sync_error!(
                    ErrorKind::DestinationConnectionFailed,
                    "Could not create the Kafka producer",
                    err.to_string()
                )
            })?;

        Ok(Self {
            producer,
            send_timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }
}

fn owned_headers(headers: &EventHeaders) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |owned, (key, value)| {
            owned.insert(Header {
                key,
                value: Some(value.as_bytes()),
            })
        })
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
        headers: &EventHeaders,
    ) -> SyncResult<()> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(&payload)
            .headers(owned_headers(headers));

        let (partition, offset) = self
            .producer
            .send(record, self.send_timeout)
            .await
            .map_err(|(err, _)| {
                sync_error!(
                    ErrorKind::PublishFailed,
                    "Kafka delivery failed",
                    format!("topic `{topic}`, key `{key}`: {err}")
                )
            })?;
        debug!(topic, key, partition, offset, "event delivered");

        Ok(())
    }
}
