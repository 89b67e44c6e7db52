use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use seatflip_core::{BroadcastGateway, StoreError};
use seatflip_shared::{EventPayload, PushEvent};
use std::time::Duration;
use tracing::{debug, error};

/// Mirrors broadcast events onto a Kafka topic, keyed by channel name so
/// each channel keeps its order within a partition.
#[derive(Clone)]
pub struct KafkaBroadcastGateway {
    producer: FutureProducer,
    topic: String,
}

impl KafkaBroadcastGateway {
    pub fn new(brokers: &str, topic: impl Into<String>) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.into(),
        })
    }
}

#[async_trait]
impl BroadcastGateway for KafkaBroadcastGateway {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn publish(&self, channel: &str, event: &str, payload: &EventPayload) -> Result<(), StoreError> {
        let body = serde_json::to_string(&PushEvent {
            channel: channel.to_string(),
            event: event.to_string(),
            data: payload.clone(),
        })?;
        let record = FutureRecord::to(&self.topic).key(channel).payload(&body);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                debug!(
                    topic = %self.topic,
                    channel = %channel,
                    event = %event,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Broadcast event mirrored to Kafka"
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!(topic = %self.topic, channel = %channel, error = %e, "Failed to mirror broadcast event");
                Err(StoreError::Gateway(e.to_string()))
            }
        }
    }
}
