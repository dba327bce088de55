//! File-based harness configuration (YAML). Command-line flags override
//! anything set here; anything unset falls back to the defaults below.

use crate::transport::config::DEFAULT_BROKER;
use crate::transport::{Engine, OffsetReset};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_GROUP_ID: &str = "hospital-consumer-group";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub broker: String,
    pub engine: Engine,
    /// Extra transport parameters, e.g. librdkafka client properties
    pub connect: BTreeMap<String, String>,
    pub publisher: PublisherSection,
    pub subscriber: SubscriberSection,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            broker: DEFAULT_BROKER.to_string(),
            engine: Engine::Kafka,
            connect: BTreeMap::new(),
            publisher: PublisherSection::default(),
            subscriber: SubscriberSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublisherSection {
    pub workers: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Cycles per worker; unset means run until interrupted
    pub cycles: Option<u64>,
    pub seed: Option<u64>,
    pub fail_fast: bool,
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            workers: 5,
            min_delay_ms: 500,
            max_delay_ms: 2000,
            cycles: None,
            seed: None,
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubscriberSection {
    pub group_id: String,
    pub offset_reset: OffsetReset,
    pub report_every: u64,
    pub max_messages: Option<u64>,
    pub quiet: bool,
}

impl Default for SubscriberSection {
    fn default() -> Self {
        Self {
            group_id: DEFAULT_GROUP_ID.to_string(),
            offset_reset: OffsetReset::Earliest,
            report_every: 100,
            max_messages: None,
            quiet: false,
        }
    }
}

impl HarnessConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).context("parse harness config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// Load `path` if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
