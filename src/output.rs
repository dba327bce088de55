use crate::metrics::stats::StatsSnapshot;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::Path;

pub enum OutputWriter {
    Csv(csv::Writer<File>),
    Stdout,
}

impl OutputWriter {
    pub fn new_csv(path: &str) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create output directory {}", parent.display()))?;
            }
        }
        let writer =
            csv::Writer::from_path(path).with_context(|| format!("open csv output {path}"))?;
        tracing::info!(path, "writing csv snapshots");
        Ok(Self::Csv(writer))
    }

    pub fn new_stdout() -> Self {
        Self::Stdout
    }

    /// CSV file when a path is given, stdout otherwise
    pub fn from_option(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::new_csv(p),
            None => Ok(Self::new_stdout()),
        }
    }

    pub fn write_snapshot(&mut self, snapshot: &StatsSnapshot, role: &str) -> Result<()> {
        match self {
            Self::Csv(writer) => {
                // Header row comes from the first serialize call
                writer.serialize(snapshot.to_row())?;
                // Flush so external tail/readers see progress promptly
                writer.flush()?;
            }
            Self::Stdout => println!("{}", snapshot_line(snapshot, role)),
        }
        Ok(())
    }
}

/// One stdout line with the columns that apply to `role` (`pub` or `sub`)
pub fn snapshot_line(snapshot: &StatsSnapshot, role: &str) -> String {
    match role {
        "sub" => format!(
            "[sub] consumed={} errors={} rate={:.2}/s interval={:.2}/s p50={}ms p95={}ms p99={}ms",
            snapshot.consumed_count,
            snapshot.error_count,
            snapshot.consume_rate(),
            snapshot.interval_consume_rate(),
            snapshot.latency_ms_p50,
            snapshot.latency_ms_p95,
            snapshot.latency_ms_p99,
        ),
        _ => format!(
            "[{role}] published={} cycles={} errors={} rate={:.2}/s interval={:.2}/s",
            snapshot.published_count,
            snapshot.cycle_count,
            snapshot.error_count,
            snapshot.publish_rate(),
            snapshot.interval_publish_rate(),
        ),
    }
}
