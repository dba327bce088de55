//! Kafka adapter (feature `transport-kafka`), using rdkafka with the tokio runtime.
//!
//! One `FutureProducer` is shared by every publisher handle; each handle keeps
//! its own pending delivery futures so a worker's flush waits only for its own
//! batch. Consumers are created per subscription.
use crate::transport::{
    ConnectOptions, Publisher, SubscribeOptions, Transport, TransportError, TransportMessage,
    TransportStream,
};
use bytes::Bytes;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

// Connect params consumed here rather than handed to librdkafka
const RESERVED_PARAMS: [&str; 2] = ["broker", "metadata_timeout_ms"];

pub struct KafkaTransport {
    brokers: String,
    client_params: BTreeMap<String, String>,
    producer: FutureProducer,
    metadata_timeout: Duration,
}

// Upper bound on how long a publisher waits for its last deliveries at shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect params handed to librdkafka as client properties
fn client_params(opts: &ConnectOptions) -> BTreeMap<String, String> {
    opts.params
        .iter()
        .filter(|(k, _)| !RESERVED_PARAMS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub async fn connect(opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    let brokers = opts.broker().to_string();
    let client_params = client_params(&opts);
    let metadata_timeout = opts
        .params
        .get("metadata_timeout_ms")
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5));

    let mut cfg = ClientConfig::new();
    cfg.set("bootstrap.servers", &brokers)
        .set("message.timeout.ms", "5000");
    apply_params(&mut cfg, &client_params);
    let producer: FutureProducer = cfg
        .create()
        .map_err(|e| TransportError::Connect(format!("create producer: {e}")))?;

    let transport = KafkaTransport {
        brokers,
        client_params,
        producer,
        metadata_timeout,
    };
    // librdkafka connects lazily; fetch metadata so an unreachable broker fails here
    transport.health_check().await?;
    info!(brokers = %transport.brokers, "connected to kafka");
    Ok(Box::new(transport))
}

fn apply_params(cfg: &mut ClientConfig, params: &BTreeMap<String, String>) {
    for (k, v) in params {
        cfg.set(k, v);
    }
}

#[async_trait::async_trait]
impl Transport for KafkaTransport {
    async fn create_publisher(&self) -> Result<Box<dyn Publisher>, TransportError> {
        Ok(Box::new(KafkaPublisher::new(self.producer.clone(), DRAIN_TIMEOUT)))
    }

    async fn subscribe(&self, opts: &SubscribeOptions) -> Result<TransportStream, TransportError> {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.brokers)
            .set("group.id", &opts.group_id)
            .set("auto.offset.reset", opts.offset_reset.as_str())
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000");
        apply_params(&mut cfg, &self.client_params);
        let consumer: StreamConsumer = cfg
            .create()
            .map_err(|e| TransportError::Subscribe(format!("create consumer: {e}")))?;
        let topics: Vec<&str> = opts.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        debug!(group = %opts.group_id, ?topics, "kafka consumer subscribed");

        let stream = futures::stream::unfold(Arc::new(consumer), |consumer| async move {
            let item = match consumer.recv().await {
                Ok(msg) => Ok(TransportMessage {
                    topic: msg.topic().to_string(),
                    payload: Bytes::copy_from_slice(msg.payload().unwrap_or_default()),
                    timestamp_ms: msg.timestamp().to_millis(),
                }),
                Err(e) => Err(TransportError::Receive(e.to_string())),
            };
            Some((item, consumer))
        });
        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        let producer = self.producer.clone();
        let timeout = self.metadata_timeout;
        let (brokers, topics) = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|m| (m.brokers().len(), m.topics().len()))
        })
        .await
        .map_err(|e| TransportError::Other(e.to_string()))?
        .map_err(|e| TransportError::Connect(format!("broker unreachable at {}: {e}", self.brokers)))?;
        debug!(brokers, topics, "kafka metadata fetched");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Duration::from_secs(5)))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?
            .map_err(|e| TransportError::Flush(e.to_string()))
    }
}

struct KafkaPublisher {
    producer: FutureProducer,
    pending: Mutex<Vec<DeliveryFuture>>,
    drain_timeout: Duration,
}

impl KafkaPublisher {
    fn new(producer: FutureProducer, drain_timeout: Duration) -> Self {
        Self {
            producer,
            pending: Mutex::new(Vec::new()),
            drain_timeout,
        }
    }
}

#[async_trait::async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload.as_ref());
        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| TransportError::Publish(e.to_string()))?;
        self.pending.lock().await.push(delivery);
        Ok(())
    }

    async fn flush(&self) -> Result<(), TransportError> {
        let pending = std::mem::take(&mut *self.pending.lock().await);
        for outcome in futures::future::join_all(pending).await {
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err((e, _))) => return Err(TransportError::Flush(e.to_string())),
                // The producer went away before reporting the outcome
                Err(_) => return Err(TransportError::Disconnected),
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        tokio::time::timeout(self.drain_timeout, self.flush())
            .await
            .map_err(|_| TransportError::Timeout(self.drain_timeout))?
    }
}
