use hdrhistogram::Histogram;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Statistics collector shared by workers of one role
pub struct Stats {
    // End-to-end latency histogram (millisecond precision, broker timestamps)
    latency_hist: RwLock<Histogram<u64>>,

    // Counters
    published_count: AtomicU64,
    cycle_count: AtomicU64,
    consumed_count: AtomicU64,
    error_count: AtomicU64,

    // Timing
    start_time: Instant,
    last_snapshot: RwLock<(Instant, u64, u64)>,
}

impl Stats {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            // 1ms to 1h range, 3 significant digits
            latency_hist: RwLock::new(
                Histogram::new_with_bounds(1, 3_600_000, 3).expect("valid histogram bounds"),
            ),
            published_count: AtomicU64::new(0),
            cycle_count: AtomicU64::new(0),
            consumed_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            start_time: now,
            last_snapshot: RwLock::new((now, 0, 0)),
        }
    }

    /// Record one flushed cycle of `messages` publications
    pub fn record_cycle(&self, messages: u64) {
        self.cycle_count.fetch_add(1, Ordering::Relaxed);
        self.published_count.fetch_add(messages, Ordering::Relaxed);
    }

    /// Record a consumed message, with end-to-end latency when known
    pub async fn record_consumed(&self, latency_ms: Option<u64>) {
        self.consumed_count.fetch_add(1, Ordering::Relaxed);
        if let Some(lat) = latency_ms {
            let mut hist = self.latency_hist.write().await;
            hist.saturating_record(lat.max(1));
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn published(&self) -> u64 {
        self.published_count.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed_count.load(Ordering::Relaxed)
    }

    /// Get current snapshot of statistics
    pub async fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();
        let published = self.published();
        let consumed = self.consumed();

        let hist = self.latency_hist.read().await;
        let (p50, p95, p99, max) = if hist.is_empty() {
            (0, 0, 0, 0)
        } else {
            (
                hist.value_at_quantile(0.5),
                hist.value_at_quantile(0.95),
                hist.value_at_quantile(0.99),
                hist.max(),
            )
        };
        drop(hist);

        let (interval, interval_published, interval_consumed) = {
            let mut last = self.last_snapshot.write().await;
            let (at, prev_pub, prev_con) = *last;
            *last = (now, published, consumed);
            (
                now.duration_since(at),
                published.saturating_sub(prev_pub),
                consumed.saturating_sub(prev_con),
            )
        };

        StatsSnapshot {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            published_count: published,
            cycle_count: self.cycles(),
            consumed_count: consumed,
            error_count: self.error_count.load(Ordering::Relaxed),
            total_duration: now.duration_since(self.start_time),
            interval_duration: interval,
            interval_published,
            interval_consumed,
            latency_ms_p50: p50,
            latency_ms_p95: p95,
            latency_ms_p99: p99,
            latency_ms_max: max,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub timestamp: u64,
    pub published_count: u64,
    pub cycle_count: u64,
    pub consumed_count: u64,
    pub error_count: u64,
    pub total_duration: Duration,
    pub interval_duration: Duration,
    pub interval_published: u64,
    pub interval_consumed: u64,
    pub latency_ms_p50: u64,
    pub latency_ms_p95: u64,
    pub latency_ms_p99: u64,
    pub latency_ms_max: u64,
}

fn per_sec(count: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

impl StatsSnapshot {
    pub fn publish_rate(&self) -> f64 {
        per_sec(self.published_count, self.total_duration)
    }

    pub fn consume_rate(&self) -> f64 {
        per_sec(self.consumed_count, self.total_duration)
    }

    pub fn interval_publish_rate(&self) -> f64 {
        per_sec(self.interval_published, self.interval_duration)
    }

    pub fn interval_consume_rate(&self) -> f64 {
        per_sec(self.interval_consumed, self.interval_duration)
    }

    pub fn to_row(&self) -> SnapshotRow {
        SnapshotRow {
            timestamp: self.timestamp,
            published: self.published_count,
            cycles: self.cycle_count,
            consumed: self.consumed_count,
            errors: self.error_count,
            elapsed_secs: round2(self.total_duration.as_secs_f64()),
            publish_rate: round2(self.publish_rate()),
            consume_rate: round2(self.consume_rate()),
            latency_ms_p50: self.latency_ms_p50,
            latency_ms_p95: self.latency_ms_p95,
            latency_ms_p99: self.latency_ms_p99,
            latency_ms_max: self.latency_ms_max,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Flat record written to CSV output, one per snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRow {
    pub timestamp: u64,
    pub published: u64,
    pub cycles: u64,
    pub consumed: u64,
    pub errors: u64,
    pub elapsed_secs: f64,
    pub publish_rate: f64,
    pub consume_rate: f64,
    pub latency_ms_p50: u64,
    pub latency_ms_p95: u64,
    pub latency_ms_p99: u64,
    pub latency_ms_max: u64,
}
