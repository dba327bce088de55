use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use hospital_sim::config::HarnessConfig;
use hospital_sim::logging;
use hospital_sim::pacing::JitterPacer;
use hospital_sim::roles::publisher::{CycleMode, PublisherConfig, run_publisher};
use hospital_sim::roles::subscriber::{SubscriberConfig, run_subscriber};
use hospital_sim::transport::config::{parse_connect_kv, parse_engine};
use hospital_sim::transport::{OffsetReset, Transport, TransportBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hospital-sim")]
#[command(about = "Synthetic hospital traffic generator and consumer for Kafka-compatible brokers")]
struct Cli {
    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// YAML config file; command-line flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Broker address (host:port)
    #[arg(long, env = "HOSPITAL_SIM_BROKER", global = true)]
    broker: Option<String>,

    /// Transport engine (kafka, mock)
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Extra transport parameters as key=value, repeatable
    #[arg(long = "connect", value_name = "KEY=VALUE", global = true)]
    connect: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publisher role: a pool of workers producing linked hospital records
    Pub {
        /// Number of concurrent workers
        #[arg(long)]
        workers: Option<u32>,

        /// Send a single batch from a single worker, then exit
        #[arg(long, conflicts_with_all = ["workers", "cycles"])]
        once: bool,

        /// Cycles per worker; runs until Ctrl+C when omitted
        #[arg(long)]
        cycles: Option<u64>,

        /// Minimum pause between cycles (ms)
        #[arg(long)]
        min_delay_ms: Option<u64>,

        /// Maximum pause between cycles (ms)
        #[arg(long)]
        max_delay_ms: Option<u64>,

        /// Seed for reproducible records (worker i uses seed + i)
        #[arg(long)]
        seed: Option<u64>,

        /// Stop every worker as soon as one fails
        #[arg(long)]
        fail_fast: bool,

        /// Snapshot interval in seconds for periodic stats output (0 disables)
        #[arg(long, default_value = "10")]
        snapshot_interval: u64,

        /// Optional CSV output file path (stdout if omitted)
        #[arg(long)]
        csv: Option<String>,
    },
    /// Subscriber role: consume all hospital topics and report throughput
    Sub {
        /// Consumer group id
        #[arg(long)]
        group: Option<String>,

        /// Start position for a group without committed offsets (earliest/latest)
        #[arg(long)]
        offset_reset: Option<OffsetReset>,

        /// Print a rate report every N messages
        #[arg(long)]
        report_every: Option<u64>,

        /// Exit after N messages
        #[arg(long)]
        max_messages: Option<u64>,

        /// Do not print individual records
        #[arg(long)]
        quiet: bool,

        /// Optional CSV output file path for rate snapshots
        #[arg(long)]
        csv: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    logging::init(&cli.log_level)?;

    let file = HarnessConfig::load_or_default(cli.config.as_deref())?;
    let broker = cli.broker.clone().unwrap_or_else(|| file.broker.clone());
    let engine = match cli.engine.as_deref() {
        Some(s) => parse_engine(s).ok_or_else(|| anyhow!("unknown engine: {s}"))?,
        None => file.engine,
    };
    let mut pairs: Vec<String> = file
        .connect
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    pairs.extend(cli.connect.iter().cloned());
    let opts = parse_connect_kv(&broker, &pairs);

    let transport: Arc<dyn Transport> = TransportBuilder::connect(engine, opts)
        .await
        .with_context(|| format!("connect to {broker} ({engine:?})"))?
        .into();
    info!(%broker, ?engine, "broker connection established");

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, stopping");
            ctrl_c.cancel();
        }
    });

    let result = match cli.command {
        Commands::Pub {
            workers,
            once,
            cycles,
            min_delay_ms,
            max_delay_ms,
            seed,
            fail_fast,
            snapshot_interval,
            csv,
        } => {
            let section = &file.publisher;
            let config = if once {
                PublisherConfig {
                    workers: 1,
                    mode: CycleMode::Cycles(1),
                    pacer: JitterPacer::none(),
                    seed: seed.or(section.seed),
                    fail_fast: true,
                    snapshot_interval_secs: 0,
                    output_file: csv,
                }
            } else {
                PublisherConfig {
                    workers: workers.unwrap_or(section.workers),
                    mode: CycleMode::from_limit(cycles.or(section.cycles)),
                    pacer: JitterPacer::from_millis(
                        min_delay_ms.unwrap_or(section.min_delay_ms),
                        max_delay_ms.unwrap_or(section.max_delay_ms),
                    ),
                    seed: seed.or(section.seed),
                    fail_fast: fail_fast || section.fail_fast,
                    snapshot_interval_secs: snapshot_interval,
                    output_file: csv,
                }
            };
            run_publisher(config, transport.clone(), shutdown.clone())
                .await
                .map(|summary| {
                    info!(
                        workers = summary.workers,
                        cycles = summary.cycles,
                        messages = summary.messages,
                        duration_secs = summary.duration.as_secs_f64(),
                        "publisher harness done"
                    );
                })
        }
        Commands::Sub {
            group,
            offset_reset,
            report_every,
            max_messages,
            quiet,
            csv,
        } => {
            let section = &file.subscriber;
            let config = SubscriberConfig {
                group_id: group.unwrap_or_else(|| section.group_id.clone()),
                offset_reset: offset_reset.unwrap_or(section.offset_reset),
                report_every: report_every.unwrap_or(section.report_every),
                max_messages: max_messages.or(section.max_messages),
                quiet: quiet || section.quiet,
                output_file: csv,
                ..Default::default()
            };
            let mut out = std::io::stdout();
            run_subscriber(config, transport.clone(), shutdown.clone(), &mut out)
                .await
                .map(|summary| {
                    info!(
                        consumed = summary.consumed,
                        stopped_by = ?summary.stopped_by,
                        "subscriber done"
                    );
                })
        }
    };

    if let Err(e) = transport.shutdown().await {
        warn!(error = %e, "transport shutdown");
    }
    result
}
