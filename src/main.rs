//! rl-queue relay - main entry point.
//!
//! Reads lines from stdin and writes each one to stdout through a
//! rate-limited queue, standing in for an outbound chat transport:
//! at most `max_slots` lines go out per `window`.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use rl_queue::{observability, Config, RateLimitedQueue};

#[derive(Debug, Parser)]
#[command(name = "rl-queue", version, about = "Relay stdin to stdout at a bounded rate")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "RLQ_CONFIG")]
    config: Option<PathBuf>,

    /// Lines allowed per window (overrides the config file).
    #[arg(long)]
    max_slots: Option<u32>,

    /// Window length in milliseconds (overrides the config file).
    #[arg(long)]
    window_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(max_slots) = args.max_slots {
        config.queue.max_slots = max_slots;
    }
    if let Some(window_ms) = args.window_ms {
        config.queue.window = Duration::from_millis(window_ms);
    }

    // Initialize observability
    observability::init_tracing_with(&config.observability);

    let queue = RateLimitedQueue::from_config(&config.queue)?;
    tracing::info!(
        max_slots = config.queue.max_slots,
        window = ?config.queue.window,
        "relay_started"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut handles = Vec::new();
    while let Some(line) = lines.next_line().await? {
        handles.push(queue.submit(move || {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{line}")?;
            out.flush()
        }));
    }

    for handle in handles {
        let task_id = handle.id().clone();
        if let Err(e) = handle.await {
            tracing::error!(task_id = %task_id, error = %e, "relay_send_failed");
        }
    }

    queue.close();
    let stats = queue.stats();
    tracing::info!(
        sent = stats.succeeded,
        failed = stats.failed + stats.panicked,
        peak_pending = stats.peak_pending,
        "relay_finished"
    );

    Ok(())
}
