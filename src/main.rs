//! Ringlane demo runner
//!
//! Builds a worker pool pipeline from a JSON config file and/or command line
//! flags, pushes a number of events through it from one or more producer
//! threads, and prints a JSON run summary.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use ringlane::disruptor::{
    thread_management::get_available_cores, DataProvider, DefaultExceptionHandler,
    EventPublisher, PipelineConfig, ProducerType, RingBuffer, WaitStrategyKind, WorkHandler,
    WorkerPool,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "ringlane")]
#[command(about = "Run events through a lock-free worker pool pipeline")]
#[command(version)]
struct Args {
    /// JSON pipeline configuration; flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ring buffer size (must be power of 2)
    #[arg(short, long)]
    buffer_size: Option<usize>,

    /// Producer type (single, multi)
    #[arg(short, long)]
    producer_type: Option<ProducerType>,

    /// Wait strategy (blocking, yielding, busy-spin, sleeping, timeout-blocking)
    #[arg(short, long)]
    wait_strategy: Option<WaitStrategyKind>,

    /// Timeout for the timeout-blocking wait strategy, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Number of competing workers
    #[arg(long)]
    workers: Option<usize>,

    /// Number of producer threads
    #[arg(long, default_value = "1")]
    producers: usize,

    /// Total number of events to publish
    #[arg(short, long, default_value = "1000000")]
    events: u64,

    /// Pin worker threads to CPU cores
    #[arg(long)]
    pin_cores: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Message {
    value: u64,
}

/// Counts and sums the events one worker receives
struct Tally {
    count: Arc<AtomicU64>,
    sum: Arc<AtomicU64>,
}

impl WorkHandler<Message> for Tally {
    fn on_event(&mut self, event: &Message) -> ringlane::Result<()> {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(event.value, Ordering::Relaxed);
        Ok(())
    }

    fn on_timeout(&mut self, sequence: i64) -> ringlane::Result<()> {
        tracing::debug!(sequence, "worker idle");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RunSummary {
    config: PipelineConfig,
    producers: usize,
    events: u64,
    per_worker: Vec<u64>,
    checksum_ok: bool,
    elapsed_ms: u128,
    events_per_sec: f64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = load_config(&args)?;
    let producers = match config.producer_type {
        ProducerType::Single if args.producers > 1 => {
            warn!(
                requested = args.producers,
                "single producer sequencer allows one producer thread"
            );
            1
        }
        _ => args.producers.max(1),
    };
    info!(?config, producers, events = args.events, "starting pipeline");

    let summary = run(config, producers, args.events)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Merge the config file (if any) with command line overrides
fn load_config(args: &Args) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(buffer_size) = args.buffer_size {
        config.buffer_size = buffer_size;
    }
    if let Some(producer_type) = args.producer_type {
        config.producer_type = producer_type;
    }
    if let Some(wait_strategy) = args.wait_strategy {
        config.wait_strategy = wait_strategy;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = Some(timeout_ms);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.pin_cores |= args.pin_cores;

    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}

fn run(config: PipelineConfig, producers: usize, events: u64) -> anyhow::Result<RunSummary> {
    let sequencer = config.build_sequencer()?;
    let ring_buffer = Arc::new(RingBuffer::new(config.buffer_size, Message::default)?);
    let barrier = Arc::clone(&sequencer).new_barrier(&[]);

    let counts: Vec<Arc<AtomicU64>> = (0..config.workers)
        .map(|_| Arc::new(AtomicU64::new(0)))
        .collect();
    let sum = Arc::new(AtomicU64::new(0));
    let handlers: Vec<Box<dyn WorkHandler<Message>>> = counts
        .iter()
        .map(|count| {
            Box::new(Tally {
                count: Arc::clone(count),
                sum: Arc::clone(&sum),
            }) as Box<dyn WorkHandler<Message>>
        })
        .collect();

    let mut pool = WorkerPool::new(
        Arc::clone(&ring_buffer) as Arc<dyn DataProvider<Message>>,
        Arc::clone(&sequencer),
        barrier,
        Arc::new(DefaultExceptionHandler::new()),
        handlers,
    )?;
    sequencer.add_gating_sequences(&pool.worker_sequences());
    if config.pin_cores {
        pool.pin_to_cores(get_available_cores());
    }

    let publisher = EventPublisher::new(ring_buffer, sequencer)?;
    pool.start()?;
    let start = Instant::now();

    let per_producer = events / producers as u64;
    let remainder = events % producers as u64;
    let handles: Vec<_> = (0..producers as u64)
        .map(|producer| {
            let publisher = publisher.clone();
            let share = per_producer + u64::from(producer < remainder);
            thread::Builder::new()
                .name(format!("ringlane-producer-{producer}"))
                .spawn(move || -> ringlane::Result<()> {
                    for value in 1..=share {
                        publisher.publish_with(|message, _| message.value = value)?;
                    }
                    Ok(())
                })
                .context("spawning producer thread")
        })
        .collect::<anyhow::Result<_>>()?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
    }
    pool.drain_and_halt()?;
    let elapsed = start.elapsed();

    let expected_sum: u64 = (0..producers as u64)
        .map(|producer| {
            let share = per_producer + u64::from(producer < remainder);
            share * (share + 1) / 2
        })
        .sum();
    let per_worker: Vec<u64> = counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
    let processed: u64 = per_worker.iter().sum();

    info!(processed, elapsed_ms = elapsed.as_millis(), "pipeline drained");

    Ok(RunSummary {
        config,
        producers,
        events,
        checksum_ok: processed == events && sum.load(Ordering::Relaxed) == expected_sum,
        per_worker,
        elapsed_ms: elapsed.as_millis(),
        events_per_sec: events as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    })
}

/// Initialize logging based on the specified level
fn init_logging(level: &str) {
    let filter = match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}
