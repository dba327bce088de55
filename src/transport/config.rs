use super::{ConnectOptions, Engine};

pub const DEFAULT_BROKER: &str = "localhost:9092";

pub fn parse_engine(s: &str) -> Option<Engine> {
    match s.to_lowercase().as_str() {
        "kafka" | "redpanda" => Some(Engine::Kafka),
        "mock" => Some(Engine::Mock),
        _ => None,
    }
}

/// Build connect options from `key=value` pairs; malformed entries are skipped.
/// An explicit `broker` pair wins over the `broker` argument.
pub fn parse_connect_kv(broker: &str, pairs: &[String]) -> ConnectOptions {
    let mut opts = ConnectOptions::with_broker(broker);
    for p in pairs {
        if let Some((k, v)) = p.split_once('=') {
            opts.params.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    opts
}
