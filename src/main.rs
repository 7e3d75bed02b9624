use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewarden::clock::{Clock, SystemClock};
use ratewarden::config::{LoggingConfig, RatewardenConfig, StoreBackend};
use ratewarden::ratelimit::{
    client_identifier, Algorithm, QuotaSettings, RateLimitCategory, RateLimitContext,
    RateLimitFacade,
};
use ratewarden::store::{InMemoryStore, QuotaStore, RedisStore};

#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about = "Distributed rate limiting engine")]
struct Cli {
    /// YAML configuration file; RATEWARDEN__* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Consume quota for an identifier and print the decision
    Check {
        #[arg(short, long)]
        identifier: String,
        #[arg(short = 'C', long)]
        category: String,
        #[arg(short, long, value_enum, default_value_t = Mode::TokenBucket)]
        mode: Mode,
        /// Tokens to consume (token bucket only)
        #[arg(short, long, default_value_t = 1)]
        tokens: u64,
        /// Report availability without consuming (token bucket only)
        #[arg(long)]
        estimate: bool,
    },
    /// Delete all quota state for an identifier
    Reset {
        #[arg(short, long)]
        identifier: String,
        #[arg(short = 'C', long)]
        category: String,
    },
    /// List the registered category quotas
    Categories,
    /// Show the category and client identifier a request would be checked under
    Classify {
        #[arg(short, long)]
        path: String,
        #[arg(long)]
        forwarded_for: Option<String>,
        #[arg(long, default_value = "127.0.0.1")]
        remote_addr: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    TokenBucket,
    FixedWindow,
    SlidingWindow,
    Composite,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RatewardenConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Ratewarden");

    run(&config, cli.command).await
}

async fn run(config: &RatewardenConfig, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Check {
            identifier,
            category,
            mode,
            tokens,
            estimate,
        } => {
            let facade = build_facade(config).await?;
            let category = RateLimitCategory::from(category);
            let decision = match (mode, estimate) {
                (_, true) => facade.estimate(&identifier, &category, tokens).await?,
                (Mode::TokenBucket, false) => {
                    facade.check_tokens(&identifier, &category, tokens).await?
                }
                (Mode::FixedWindow, false) => {
                    facade
                        .check_with(&identifier, &category, Algorithm::FixedWindow)
                        .await?
                }
                (Mode::SlidingWindow, false) => {
                    facade
                        .check_with(&identifier, &category, Algorithm::SlidingWindow)
                        .await?
                }
                (Mode::Composite, false) => facade.check_composite(&identifier, &category).await?,
            };
            print_json(&json!({
                "category": category,
                "algorithm": decision.algorithm,
                "degraded": decision.degraded,
                "decision": decision.to_response(),
            }))
        }
        Command::Reset {
            identifier,
            category,
        } => {
            let facade = build_facade(config).await?;
            let category = RateLimitCategory::from(category);
            let reset = facade.reset(&identifier, &category).await;
            print_json(&json!({ "category": category, "reset": reset }))
        }
        Command::Categories => {
            let facade = build_facade(config).await?;
            let mut quotas: Vec<_> = facade
                .registry()
                .snapshot()
                .into_iter()
                .map(|(category, quota)| (category.to_string(), QuotaSettings::from(quota)))
                .collect();
            quotas.sort_by(|a, b| a.0.cmp(&b.0));

            let default = QuotaSettings::from(facade.registry().default_quota());
            let categories: Vec<_> = quotas
                .into_iter()
                .map(|(name, quota)| json!({ "category": name, "quota": quota }))
                .collect();
            print_json(&json!({ "default": default, "categories": categories }))
        }
        Command::Classify {
            path,
            forwarded_for,
            remote_addr,
        } => {
            let category = config.classifier.classifier().classify(&path);
            let client = client_identifier(forwarded_for.as_deref(), &remote_addr);
            print_json(&json!({
                "path": path,
                "category": category,
                "client": client,
                "identifier": format!("{}:{}", client, path),
            }))
        }
    }
}

async fn build_facade(config: &RatewardenConfig) -> anyhow::Result<RateLimitFacade> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    let store: Arc<dyn QuotaStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new(Arc::clone(&clock))),
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store.redis_url)
                .await
                .with_context(|| format!("Failed to connect to {}", config.store.redis_url))?;
            Arc::new(store)
        }
    };
    info!(backend = ?config.store.backend, "Store initialized");

    let context = RateLimitContext::from_config(config, clock)?;
    Ok(RateLimitFacade::from_config(store, context, config))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
