//! Transport abstraction: trait, types, and builder factory.

pub mod config;
#[cfg(feature = "transport-kafka")]
pub mod kafka;
#[cfg(any(test, feature = "transport-mock"))]
pub mod mock;

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Kafka,
    Mock,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub params: BTreeMap<String, String>,
}

impl ConnectOptions {
    pub fn with_broker(broker: impl Into<String>) -> Self {
        let mut opts = Self::default();
        opts.params.insert("broker".into(), broker.into());
        opts
    }

    pub fn broker(&self) -> &str {
        self.params
            .get("broker")
            .map(String::as_str)
            .unwrap_or(config::DEFAULT_BROKER)
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.params.get(key).map(String::as_str),
            Some("1" | "true" | "yes")
        )
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("publish: {0}")]
    Publish(String),
    #[error("flush: {0}")]
    Flush(String),
    #[error("subscribe: {0}")]
    Subscribe(String),
    #[error("receive: {0}")]
    Receive(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("disconnected")]
    Disconnected,
    #[error("other: {0}")]
    Other(String),
}

/// Where a consumer group starts when it has no committed position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            other => Err(format!("unknown offset reset policy: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SubscribeOptions {
    pub group_id: String,
    pub topics: Vec<String>,
    pub offset_reset: OffsetReset,
}

#[derive(Clone, Debug)]
pub struct TransportMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Broker-assigned timestamp, milliseconds since the UNIX epoch
    pub timestamp_ms: Option<i64>,
}

pub type TransportStream =
    Pin<Box<dyn Stream<Item = Result<TransportMessage, TransportError>> + Send>>;

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// A publishing handle with its own delivery buffer. Handles are cheap and
    /// meant to be owned by a single worker.
    async fn create_publisher(&self) -> Result<Box<dyn Publisher>, TransportError>;
    /// Join `group_id` on all `topics`. The stream is unbounded while the
    /// broker is fed and advances the group's committed position as it is read.
    async fn subscribe(&self, opts: &SubscribeOptions) -> Result<TransportStream, TransportError>;
    async fn health_check(&self) -> Result<(), TransportError>;
    async fn shutdown(&self) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Buffer a send to `topic`. Delivery is only guaranteed after `flush`.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;
    /// Block until every buffered send is acknowledged; returns the first
    /// delivery failure.
    async fn flush(&self) -> Result<(), TransportError>;
    /// Deliver whatever is still buffered and release the handle.
    async fn shutdown(&self) -> Result<(), TransportError>;
}

pub struct TransportBuilder;

impl TransportBuilder {
    pub async fn connect(
        engine: Engine,
        opts: ConnectOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match engine {
            Engine::Kafka => {
                #[cfg(feature = "transport-kafka")]
                {
                    crate::transport::kafka::connect(opts).await
                }
                #[cfg(not(feature = "transport-kafka"))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("kafka feature disabled".into()))
                }
            }
            Engine::Mock => {
                #[cfg(any(test, feature = "transport-mock"))]
                {
                    crate::transport::mock::connect(opts).await
                }
                #[cfg(not(any(test, feature = "transport-mock")))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("mock feature disabled".into()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_reset_parses() {
        assert_eq!("Earliest".parse::<OffsetReset>().unwrap(), OffsetReset::Earliest);
        assert_eq!("latest".parse::<OffsetReset>().unwrap(), OffsetReset::Latest);
        assert!("newest".parse::<OffsetReset>().is_err());
    }

    #[test]
    fn broker_defaults_and_flags() {
        let mut opts = ConnectOptions::default();
        assert_eq!(opts.broker(), "localhost:9092");
        opts.params.insert("fail_flush".into(), "true".into());
        assert!(opts.flag("fail_flush"));
        assert!(!opts.flag("fail_connect"));
        assert_eq!(ConnectOptions::with_broker("kafka:29092").broker(), "kafka:29092");
    }

    #[tokio::test]
    async fn builder_connects_mock() {
        let t = TransportBuilder::connect(Engine::Mock, ConnectOptions::default())
            .await
            .expect("connect");
        t.health_check().await.expect("healthy");
    }
}
