use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use quotagate::config::{memory_store, QuotagateConfig, StoreConfig};
use quotagate::middleware::ResponseMetadata;
use quotagate::ratelimit::{LimiterRegistry, RateLimitDecision, RateLimitStore, TracingObserver};

#[derive(Debug, Parser)]
#[command(name = "quotagate", version, about = "Sliding-window admission control")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check an identifier against a named limiter
    Check {
        /// Limiter name, e.g. billing-portal
        #[arg(short, long)]
        limiter: String,
        /// Identifier to count against
        #[arg(short, long)]
        identifier: String,
        /// Number of checks to run
        #[arg(short = 'n', long, default_value_t = 1)]
        times: usize,
        /// Issue the checks concurrently instead of one after another
        #[arg(long)]
        concurrent: bool,
    },
    /// List configured limiters
    Limiters,
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    decision: &'a RateLimitDecision,
    response: ResponseMetadata,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = QuotagateConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Limiters => {
            for (name, policy) in config.policies() {
                println!(
                    "{:<24} {:>6} per {:?} ({:?})",
                    name,
                    policy.requests_per_window,
                    policy.window.duration(),
                    policy.failure_policy
                );
            }
        }
        Command::Check {
            limiter,
            identifier,
            times,
            concurrent,
        } => {
            let store = open_store(&config).await?;
            let registry = LimiterRegistry::new(store, config.policies())
                .with_observer(Arc::new(TracingObserver));
            registry.preload()?;

            let limiter = registry.get(&limiter)?;
            let decisions = if concurrent {
                join_all((0..times).map(|_| limiter.check_limit(&identifier))).await
            } else {
                let mut decisions = Vec::with_capacity(times);
                for _ in 0..times {
                    decisions.push(limiter.check_limit(&identifier).await);
                }
                decisions
            };

            for decision in &decisions {
                let output = CheckOutput {
                    decision,
                    response: ResponseMetadata::from_decision(decision, config.headers.on_allow),
                };
                println!("{}", serde_json::to_string(&output)?);
            }
        }
    }

    Ok(())
}

/// Connect the configured store, falling back to an in-process store when
/// the shared backend cannot be reached.
async fn open_store(config: &QuotagateConfig) -> anyhow::Result<Arc<dyn RateLimitStore>> {
    match config.connect_store().await {
        Ok(store) => Ok(store),
        Err(e) => {
            error!(error = %e, "Failed to open configured store");
            warn!("Falling back to in-process store; limits are no longer shared");
            let sweep_interval_secs = match config.store {
                StoreConfig::Memory {
                    sweep_interval_secs,
                } => sweep_interval_secs,
                StoreConfig::Redis { .. } => 60,
            };
            Ok(memory_store(sweep_interval_secs)?)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
