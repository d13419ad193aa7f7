//! Halyard command-line driver.
//!
//! # Usage
//!
//! ```bash
//! # 100 messages over a reliable link, OS randomness
//! halyard
//!
//! # Reproducible hostile run
//! halyard --seed 7 --messages 500 --reorder --duplicate-rate 10 --drop-rate 5
//! ```

use clap::Parser;
use halyard_cli::{RunConfig, SystemEnv, run_conversation};
use halyard_core::{DEFAULT_SKIPPED_KEY_CAPACITY, Environment, SessionConfig};
use halyard_harness::{ChannelConfig, SimEnv};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Halyard session driver
#[derive(Parser, Debug)]
#[command(name = "halyard")]
#[command(about = "Run a Halyard conversation over a simulated link")]
#[command(version)]
struct Args {
    /// Messages to send
    #[arg(short, long, default_value = "100")]
    messages: u32,

    /// Seed for a reproducible run (OS randomness when absent)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Deliver in random order
    #[arg(long)]
    reorder: bool,

    /// Percentage of messages duplicated by the link
    #[arg(long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=100))]
    duplicate_rate: u8,

    /// Percentage of messages lost by the link
    #[arg(long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=100))]
    drop_rate: u8,

    /// Skipped-message key capacity per session
    #[arg(long, default_value_t = DEFAULT_SKIPPED_KEY_CAPACITY)]
    capacity: usize,

    /// One-time prekeys to publish before the handshake
    #[arg(long, default_value = "1")]
    one_time_prekeys: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = RunConfig {
        messages: args.messages,
        channel: ChannelConfig {
            reorder: args.reorder,
            duplicate_percent: args.duplicate_rate,
            drop_percent: args.drop_rate,
        },
        channel_seed: args.seed.unwrap_or_default(),
        one_time_prekeys: args.one_time_prekeys,
        session: SessionConfig { skipped_key_capacity: args.capacity, ..SessionConfig::default() },
    };

    let report = match args.seed {
        Some(seed) => {
            tracing::info!(seed, "deterministic run");
            run_conversation(SimEnv::with_seed(seed), &config)?
        },
        None => {
            let env = SystemEnv::new();
            let config = RunConfig { channel_seed: u64::from_le_bytes(env.random_array()), ..config };
            run_conversation(env, &config)?
        },
    };

    tracing::info!(
        sent = report.sent,
        delivered = report.delivered,
        dropped = report.dropped,
        duplicates = report.duplicates,
        rejected = report.rejected,
        "run complete"
    );

    Ok(())
}
