//! Kafka adapters: event publisher, consumer and dead-letter sink.
//!
//! Record layout: key = aggregate id, `messageTypeName` header = event type,
//! payload = event JSON. Topics are named after the aggregate type.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Message};

use crate::domain::dead_letter::DeadLetter;
use crate::domain::envelope::{Delivery, MessageEnvelope, MESSAGE_TYPE_HEADER};
use crate::domain::events::IntegrationEvent;
use crate::domain::ports::{DeadLetterSink, EventPublisher, MessageSource};
use crate::errors::{BrokerError, PublishError};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Producer that only reports success once all in-sync replicas have the record.
pub fn create_producer(brokers: &str) -> Result<FutureProducer, KafkaError> {
    ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("acks", "all")
        .set("enable.idempotence", "true")
        .set("message.timeout.ms", "30000")
        .create()
}

pub fn topic_for(prefix: &str, event: &IntegrationEvent) -> String {
    format!("{}{}", prefix, event.aggregate_type())
}

fn envelope_headers(envelope: &MessageEnvelope) -> OwnedHeaders {
    OwnedHeaders::new().insert(Header {
        key: MESSAGE_TYPE_HEADER,
        value: Some(envelope.message_type_name.as_str()),
    })
}

async fn produce(
    producer: &FutureProducer,
    topic: &str,
    key: Option<&str>,
    payload: &[u8],
    headers: OwnedHeaders,
) -> Result<(), PublishError> {
    let mut record: FutureRecord<'_, str, [u8]> =
        FutureRecord::to(topic).payload(payload).headers(headers);
    if let Some(key) = key {
        record = record.key(key);
    }

    producer
        .send(record, Timeout::After(SEND_TIMEOUT))
        .await
        .map(|_| ())
        .map_err(|(e, _)| PublishError::Broker(e.to_string()))
}

pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic_prefix: String,
}

impl KafkaEventPublisher {
    pub fn new(producer: FutureProducer, topic_prefix: impl Into<String>) -> Self {
        Self {
            producer,
            topic_prefix: topic_prefix.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &IntegrationEvent) -> Result<(), PublishError> {
        let envelope = MessageEnvelope::from_event(event)?;
        let topic = topic_for(&self.topic_prefix, event);
        produce(
            &self.producer,
            &topic,
            envelope.key.as_deref(),
            &envelope.message,
            envelope_headers(&envelope),
        )
        .await
    }
}

pub struct KafkaMessageSource {
    consumer: StreamConsumer,
}

impl KafkaMessageSource {
    /// Offsets are stored explicitly through [`MessageSource::commit`] and
    /// flushed by the auto-commit timer, so only processed messages count.
    pub fn new(brokers: &str, group_id: &str) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        Ok(Self { consumer })
    }
}

fn to_delivery(message: &BorrowedMessage<'_>) -> Delivery {
    let message_type_name = message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|header| header.key == MESSAGE_TYPE_HEADER)
                .and_then(|header| header.value)
                .map(|value| String::from_utf8_lossy(value).into_owned())
        })
        .unwrap_or_default();

    Delivery {
        envelope: MessageEnvelope {
            message_type_name,
            message: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
        },
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| BrokerError::Subscribe(e.to_string()))
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(message)) => Ok(Some(to_delivery(&message))),
            Ok(Err(e)) => Err(BrokerError::Poll(e.to_string())),
        }
    }

    fn commit(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        // The stored offset is the next one to read.
        self.consumer
            .store_offset(&delivery.topic, delivery.partition, delivery.offset + 1)
            .map_err(|e| BrokerError::Commit(e.to_string()))
    }
}

pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaDeadLetterSink {
    pub fn new(producer: FutureProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

fn dead_letter_headers(letter: &DeadLetter) -> OwnedHeaders {
    let delivery = &letter.delivery;
    let fields = [
        (MESSAGE_TYPE_HEADER, delivery.envelope.message_type_name.clone()),
        ("error", letter.error.clone()),
        ("attempts", letter.attempts.to_string()),
        ("worker", letter.worker.clone()),
        ("failedAt", letter.failed_at.to_rfc3339()),
        ("originalTopic", delivery.topic.clone()),
        ("originalPartition", delivery.partition.to_string()),
        ("originalOffset", delivery.offset.to_string()),
    ];
    fields
        .iter()
        .fold(OwnedHeaders::new_with_capacity(fields.len()), |headers, (key, value)| {
            headers.insert(Header {
                key: *key,
                value: Some(value.as_str()),
            })
        })
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn send(&self, letter: &DeadLetter) -> Result<(), PublishError> {
        produce(
            &self.producer,
            &self.topic,
            letter.delivery.envelope.key.as_deref(),
            &letter.delivery.envelope.message,
            dead_letter_headers(letter),
        )
        .await
    }
}
