use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use envconfig::Envconfig;
use futures::future::join_all;
use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    message::{Header, Headers as _, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    ClientConfig, Message,
};
use tracing::{debug, error, info};

use crate::pipeline::{Extractor, Loader};
use crate::types::{CommitHandle, OutputMessage, RawMessage};

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(from = "KAFKA_BROKERS", default = "localhost:9092")]
    pub brokers: String,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("consumer gone")]
    Gone,
}

/// Consumer over the single source topic. Offsets are never auto-stored; each
/// message carries a `StoredOffset` commit handle instead, and the periodic
/// auto-commit flushes whatever has been stored, which makes the per-message
/// commit idempotent.
#[derive(Clone)]
pub struct SourceConsumer {
    inner: Arc<Inner>,
    batch_timeout: Duration,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

impl SourceConsumer {
    pub fn new(
        config: &KafkaConfig,
        group_id: &str,
        topic: &str,
        offset_reset: &str,
        batch_timeout: Duration,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("statistics.interval.ms", "10000")
            .set("group.id", group_id)
            .set("auto.offset.reset", offset_reset);

        client_config.set("enable.auto.offset.store", "false");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;

        Ok(Self {
            inner: Arc::new(Inner {
                consumer,
                topic: topic.to_string(),
            }),
            batch_timeout,
        })
    }

    async fn recv(&self) -> Result<RawMessage, KafkaError> {
        let message = self.inner.consumer.recv().await?;

        let mut headers = HashMap::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        let timestamp = message
            .timestamp()
            .to_millis()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        let commit = Box::new(StoredOffset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        });

        Ok(RawMessage {
            key: message.key().map(<[u8]>::to_vec).unwrap_or_default(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
            topic: self.inner.topic.clone(),
            partition: message.partition(),
            offset: message.offset(),
            timestamp,
            commit,
        })
    }

    /// Receives up to `max` messages, returning early once `batch_timeout`
    /// elapses so quiet topics still flush partial batches.
    pub async fn recv_batch(&self, max: usize) -> Result<Vec<RawMessage>, KafkaError> {
        let mut batch = Vec::with_capacity(max);
        let mut first_err = None;

        tokio::select! {
            _ = tokio::time::sleep(self.batch_timeout) => {}
            _ = async {
                while batch.len() < max {
                    match self.recv().await {
                        Ok(msg) => batch.push(msg),
                        Err(err) => {
                            first_err = Some(err);
                            break;
                        }
                    }
                }
            } => {}
        }

        match first_err {
            // A batch already under way is still delivered; the error will
            // resurface on the next extract if it persists.
            Some(err) if batch.is_empty() => Err(err),
            _ => Ok(batch),
        }
    }
}

#[async_trait]
impl Extractor for SourceConsumer {
    async fn extract_batch(&self, max: usize) -> anyhow::Result<Vec<RawMessage>> {
        let batch = self
            .recv_batch(max)
            .await
            .context("extract batch from source topic")?;
        Ok(batch)
    }
}

/// Commit handle tied to one message's offset on the source consumer.
pub struct StoredOffset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl CommitHandle for StoredOffset {
    fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let inner = self.handle.upgrade().ok_or(OffsetError::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)
            .map_err(OffsetError::Kafka)?;
        Ok(())
    }
}

pub async fn create_producer(config: &KafkaConfig) -> Result<FutureProducer, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.brokers)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer = client_config.create()?;

    // "Ping" the brokers by requesting metadata, failing fast when the cluster
    // is unreachable.
    match producer
        .client()
        .fetch_metadata(None, Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "connected to kafka brokers, found {} topics",
                metadata.topics().len()
            );
        }
        Err(err) => {
            error!("failed to fetch metadata from kafka brokers: {err:?}");
            return Err(err);
        }
    }

    Ok(producer)
}

/// Publishes output batches to the sink topic. Any failed delivery in the
/// batch surfaces as an error so the pipeline retries the whole batch.
pub struct SinkProducer {
    producer: FutureProducer,
    topic: String,
}

impl SinkProducer {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl Loader for SinkProducer {
    async fn load_batch(&self, batch: &[OutputMessage]) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut deliveries = Vec::with_capacity(batch.len());
        for msg in batch {
            let mut headers = OwnedHeaders::new_with_capacity(msg.headers.len());
            for (key, value) in &msg.headers {
                headers = headers.insert(Header {
                    key,
                    value: Some(value.as_bytes()),
                });
            }
            let record = FutureRecord::to(&self.topic)
                .key(&msg.key)
                .payload(&msg.payload)
                .headers(headers);
            match self.producer.send_result(record) {
                Ok(delivery) => deliveries.push(delivery),
                Err((err, _)) => return Err(err).context("enqueue message for sink topic"),
            }
        }

        for result in join_all(deliveries).await {
            match result {
                Ok(Ok(_)) => {}
                Ok(Err((err, _))) => return Err(err).context("produce message to sink topic"),
                Err(_) => {
                    // Cancelled due to timeout while retrying.
                    anyhow::bail!("produce to sink topic cancelled (timeout)");
                }
            }
        }

        Ok(())
    }
}
