use crate::config::DEFAULT_GROUP_ID;
use crate::metrics::stats::{Stats, StatsSnapshot};
use crate::output::OutputWriter;
use crate::records::{Topic, decode};
use crate::time_sync::latency_since_ms;
use crate::transport::{OffsetReset, SubscribeOptions, Transport};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct SubscriberConfig {
    pub group_id: String,
    pub topics: Vec<String>,
    pub offset_reset: OffsetReset,
    /// Emit a rate report every this many messages; 0 disables reports
    pub report_every: u64,
    /// Stop after this many messages
    pub max_messages: Option<u64>,
    /// Skip printing individual records
    pub quiet: bool,
    pub output_file: Option<String>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            group_id: DEFAULT_GROUP_ID.to_string(),
            topics: Topic::ALL.iter().map(|t| t.as_str().to_string()).collect(),
            offset_reset: OffsetReset::Earliest,
            report_every: 100,
            max_messages: None,
            quiet: false,
            output_file: None,
        }
    }
}

/// Cumulative consumption since the subscriber started
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateReport {
    pub consumed: u64,
    pub elapsed: Duration,
    pub rate: f64,
}

impl fmt::Display for RateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Consumed {} messages in {:.2}s ({:.2} msg/s)",
            self.consumed,
            self.elapsed.as_secs_f64(),
            self.rate
        )
    }
}

/// Counts messages and produces a [`RateReport`] on every `every`-th one
pub struct ThroughputTracker {
    started: Instant,
    consumed: u64,
    every: u64,
}

impl ThroughputTracker {
    pub fn new(every: u64) -> Self {
        Self {
            started: Instant::now(),
            consumed: 0,
            every,
        }
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn record(&mut self) -> Option<RateReport> {
        self.consumed += 1;
        if self.every == 0 || self.consumed % self.every != 0 {
            return None;
        }
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { self.consumed as f64 / secs } else { 0.0 };
        Some(RateReport {
            consumed: self.consumed,
            elapsed,
            rate,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    MaxMessages,
    StreamEnded,
}

#[derive(Debug, Clone)]
pub struct SubscriberSummary {
    pub consumed: u64,
    pub reports: Vec<RateReport>,
    pub stopped_by: StopReason,
    pub stats: StatsSnapshot,
}

/// Consume every configured topic under one consumer group in a single pass,
/// printing each decoded record and a rate report every `report_every`
/// messages to `out`. Receive and decode failures are fatal.
pub async fn run_subscriber<W: Write>(
    config: SubscriberConfig,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
    out: &mut W,
) -> Result<SubscriberSummary> {
    let opts = SubscribeOptions {
        group_id: config.group_id.clone(),
        topics: config.topics.clone(),
        offset_reset: config.offset_reset,
    };
    let mut stream = transport
        .subscribe(&opts)
        .await
        .with_context(|| format!("subscribe group {} to {:?}", opts.group_id, opts.topics))?;
    info!(
        group = %opts.group_id,
        topics = ?opts.topics,
        offset_reset = %opts.offset_reset,
        "subscribed"
    );

    let stats = Stats::new();
    let mut output = config
        .output_file
        .as_deref()
        .map(OutputWriter::new_csv)
        .transpose()?;
    let mut tracker = ThroughputTracker::new(config.report_every);
    let mut reports = Vec::new();

    let stopped_by = loop {
        if config.max_messages.is_some_and(|max| tracker.consumed() >= max) {
            break StopReason::MaxMessages;
        }
        let polled = tokio::select! {
            _ = shutdown.cancelled() => None,
            next = stream.next() => Some(next),
        };
        let Some(next) = polled else {
            break StopReason::Interrupted;
        };
        let Some(received) = next else {
            break StopReason::StreamEnded;
        };
        let msg = received.context("receive from broker")?;
        let value: serde_json::Value = decode(&msg.payload)
            .with_context(|| format!("malformed payload on topic {}", msg.topic))?;
        if !config.quiet {
            writeln!(out, "{}: {}", msg.topic, value)?;
        }
        stats
            .record_consumed(msg.timestamp_ms.map(latency_since_ms))
            .await;
        if let Some(report) = tracker.record() {
            writeln!(out, "{report}")?;
            if let Some(o) = output.as_mut() {
                o.write_snapshot(&stats.snapshot().await, "sub")?;
            }
            reports.push(report);
        }
    };
    if stopped_by == StopReason::Interrupted {
        info!("shutdown requested, stopping subscriber");
    }

    let final_stats = stats.snapshot().await;
    writeln!(out, "\nFinal Subscriber Statistics:")?;
    writeln!(out, "  Messages consumed: {}", final_stats.consumed_count)?;
    writeln!(out, "  Average rate: {:.2} msg/s", final_stats.consume_rate())?;
    writeln!(out, "  Latency P50: {}ms", final_stats.latency_ms_p50)?;
    writeln!(out, "  Latency P95: {}ms", final_stats.latency_ms_p95)?;
    writeln!(out, "  Latency P99: {}ms", final_stats.latency_ms_p99)?;
    writeln!(
        out,
        "  Total duration: {:.2}s",
        final_stats.total_duration.as_secs_f64()
    )?;
    if let Some(o) = output.as_mut() {
        o.write_snapshot(&final_stats, "sub")?;
    }

    Ok(SubscriberSummary {
        consumed: tracker.consumed(),
        reports,
        stopped_by,
        stats: final_stats,
    })
}
