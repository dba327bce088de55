use crate::generator::RecordGenerator;
use crate::metrics::stats::Stats;
use crate::output::OutputWriter;
use crate::pacing::JitterPacer;
use crate::records::RecordBatch;
use crate::transport::{Publisher, Transport};
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How long each worker keeps cycling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleMode {
    /// Until shutdown or failure
    Continuous,
    /// A fixed number of cycles per worker
    Cycles(u64),
}

impl CycleMode {
    pub fn from_limit(cycles: Option<u64>) -> Self {
        cycles.map_or(CycleMode::Continuous, CycleMode::Cycles)
    }

    fn is_done(&self, completed: u64) -> bool {
        matches!(self, CycleMode::Cycles(n) if completed >= *n)
    }
}

pub struct PublisherConfig {
    pub workers: u32,
    pub mode: CycleMode,
    pub pacer: JitterPacer,
    /// Worker `i` is seeded with `seed + i`; unseeded workers draw from the OS
    pub seed: Option<u64>,
    /// Cancel the remaining workers as soon as one fails
    pub fail_fast: bool,
    /// Periodic stats output; 0 disables it
    pub snapshot_interval_secs: u64,
    pub output_file: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            mode: CycleMode::Continuous,
            pacer: JitterPacer::default(),
            seed: None,
            fail_fast: false,
            snapshot_interval_secs: 0,
            output_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublisherSummary {
    pub workers: u32,
    pub cycles: u64,
    pub messages: u64,
    pub duration: Duration,
}

/// Independent unit of publishing: owns its generator and publisher handle,
/// shares nothing with its siblings but the stats collector.
pub struct PublisherWorker {
    id: usize,
    generator: RecordGenerator,
    publisher: Box<dyn Publisher>,
    pacer: JitterPacer,
    stats: Arc<Stats>,
}

impl PublisherWorker {
    pub fn new(
        id: usize,
        generator: RecordGenerator,
        publisher: Box<dyn Publisher>,
        pacer: JitterPacer,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            id,
            generator,
            publisher,
            pacer,
            stats,
        }
    }

    /// Generate one linked batch, publish its four records and wait for the
    /// broker to acknowledge them.
    pub async fn run_cycle(&mut self) -> Result<RecordBatch> {
        let batch = self.generator.generate_batch();
        let publications = batch.publications()?;
        let count = publications.len() as u64;
        for (topic, payload) in publications {
            self.publisher
                .publish(topic.as_str(), payload)
                .await
                .with_context(|| format!("worker {} publish to {topic}", self.id))?;
        }
        self.publisher
            .flush()
            .await
            .with_context(|| format!("worker {} flush", self.id))?;
        self.stats.record_cycle(count);
        info!(
            worker = self.id,
            patient = %batch.patient.name,
            "produced patient with appointment and prescription"
        );
        Ok(batch)
    }

    /// Cycle until `mode` is satisfied or `shutdown` fires. Any publish or
    /// flush failure ends the worker with that error.
    pub async fn run(mut self, mode: CycleMode, shutdown: CancellationToken) -> Result<u64> {
        let mut completed = 0u64;
        while !shutdown.is_cancelled() && !mode.is_done(completed) {
            if let Err(e) = self.run_cycle().await {
                self.stats.record_error();
                return Err(e);
            }
            completed += 1;
            if mode.is_done(completed) {
                break;
            }
            let delay = self.pacer.next_delay(self.generator.rng());
            if !self.pacer.pause(delay, &shutdown).await {
                break;
            }
        }
        if let Err(e) = self.publisher.shutdown().await {
            debug!(worker = self.id, error = %e, "publisher shutdown");
        }
        Ok(completed)
    }
}

/// Spawn `config.workers` publisher workers over one shared transport and
/// supervise them until all have ended. Returns an error if any worker failed.
pub async fn run_publisher(
    config: PublisherConfig,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
) -> Result<PublisherSummary> {
    if config.workers == 0 {
        return Err(anyhow!("at least one publisher worker is required"));
    }
    let (min, max) = config.pacer.bounds();
    info!(
        workers = config.workers,
        mode = ?config.mode,
        min_delay_ms = min.as_millis() as u64,
        max_delay_ms = max.as_millis() as u64,
        seed = ?config.seed,
        "starting publisher harness"
    );

    // Every handle exists before any worker starts, so a failing transport
    // never leaves a partial pool running
    let mut publishers = Vec::with_capacity(config.workers as usize);
    for _ in 0..config.workers {
        publishers.push(
            transport
                .create_publisher()
                .await
                .context("create publisher")?,
        );
    }

    let stats = Arc::new(Stats::new());
    let output = Arc::new(Mutex::new(OutputWriter::from_option(
        config.output_file.as_deref(),
    )?));

    let snapshot_handle = (config.snapshot_interval_secs > 0).then(|| {
        let stats = Arc::clone(&stats);
        let output = Arc::clone(&output);
        let secs = config.snapshot_interval_secs;
        tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(secs));
            // First tick completes immediately
            timer.tick().await;
            loop {
                timer.tick().await;
                let snapshot = stats.snapshot().await;
                if let Err(e) = output.lock().await.write_snapshot(&snapshot, "pub") {
                    error!(error = %e, "write snapshot");
                }
            }
        })
    });

    let started = Instant::now();
    let worker_shutdown = shutdown.child_token();
    let mut set = JoinSet::new();
    for (id, publisher) in publishers.into_iter().enumerate() {
        let generator = match config.seed {
            Some(seed) => RecordGenerator::seeded(seed.wrapping_add(id as u64)),
            None => RecordGenerator::new(),
        };
        let worker = PublisherWorker::new(id, generator, publisher, config.pacer, stats.clone());
        let token = worker_shutdown.clone();
        let mode = config.mode;
        set.spawn(async move { (id, worker.run(mode, token).await) });
    }

    let mut failures: Vec<anyhow::Error> = Vec::new();
    while let Some(joined) = set.join_next().await {
        let failure = match joined {
            Ok((id, Ok(cycles))) => {
                debug!(worker = id, cycles, "worker finished");
                None
            }
            Ok((id, Err(e))) => {
                error!(worker = id, error = ?e, "worker failed");
                Some(e)
            }
            Err(e) => {
                error!(error = %e, "worker task aborted");
                Some(anyhow!("worker task aborted: {e}"))
            }
        };
        if let Some(e) = failure {
            failures.push(e);
            if config.fail_fast {
                worker_shutdown.cancel();
            }
        }
    }

    if let Some(h) = snapshot_handle {
        h.abort();
    }
    let final_stats = stats.snapshot().await;
    info!(
        messages = final_stats.published_count,
        cycles = final_stats.cycle_count,
        errors = final_stats.error_count,
        rate = final_stats.publish_rate(),
        duration_secs = final_stats.total_duration.as_secs_f64(),
        "publisher finished"
    );
    if config.output_file.is_some() {
        output.lock().await.write_snapshot(&final_stats, "pub")?;
    }

    let failed = failures.len();
    if let Some(first) = failures.into_iter().next() {
        return Err(first.context(format!(
            "{failed} of {} publisher workers failed",
            config.workers
        )));
    }

    Ok(PublisherSummary {
        workers: config.workers,
        cycles: final_stats.cycle_count,
        messages: final_stats.published_count,
        duration: started.elapsed(),
    })
}
