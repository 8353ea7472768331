use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use creel::config::Config;
use creel::crawler::Orchestrator;
use creel::models::Platform;
use creel::proxy::{parse_host_port, ProxyEntry, ProxyPool, ProxyProtocol};
use creel::ratelimit::RateLimiter;
use creel::scraper::build_scraper;
use creel::storage::checkpoint::CheckpointStore;
use creel::storage::{JsonDirSink, Sink, SqliteSink};

#[derive(Parser)]
#[command(
    name = "creel",
    version,
    about = "Resumable short-video platform crawler with proxy rotation and rate limiting",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); falls back to environment variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the given seed accounts
    Crawl {
        /// Seed account IDs
        accounts: Vec<String>,

        /// File with one seed account ID per line
        #[arg(short, long)]
        accounts_file: Option<PathBuf>,

        /// Platform override
        #[arg(short, long)]
        platform: Option<Platform>,

        /// Session cookie string override
        #[arg(long)]
        cookies: Option<String>,

        /// Worker count override
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Manage the proxy pool
    Proxy {
        #[command(subcommand)]
        action: ProxyAction,
    },
}

#[derive(Subcommand)]
enum ProxyAction {
    /// Add a proxy to the pool
    Add {
        /// Proxy as host:port
        proxy: String,

        /// Proxy protocol
        #[arg(long, default_value = "http")]
        protocol: String,

        /// Username for authenticated proxies
        #[arg(long)]
        username: Option<String>,

        /// Password for authenticated proxies
        #[arg(long)]
        password: Option<String>,
    },

    /// Remove a proxy from the pool
    Remove {
        /// Proxy as host:port
        proxy: String,
    },

    /// List all proxies with their health state
    List,

    /// Validate every proxy against the configured test URL
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Commands::Crawl {
            accounts,
            accounts_file,
            platform,
            cookies,
            concurrency,
        } => {
            let mut config = config;
            if let Some(platform) = platform {
                config.crawler.platform = platform;
            }
            if let Some(cookies) = cookies {
                config.crawler.cookies = cookies;
            }
            if let Some(concurrency) = concurrency {
                config.crawler.concurrency = concurrency;
            }
            config.validate()?;

            let seeds = collect_seeds(accounts, accounts_file.as_deref())?;
            crawl(config, seeds).await?;
        }

        Commands::Proxy { action } => {
            proxy_command(&config, action).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("creel=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("creel=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

fn collect_seeds(accounts: Vec<String>, file: Option<&std::path::Path>) -> Result<Vec<String>> {
    let mut seeds = accounts;

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read accounts file: {}", path.display()))?;
        seeds.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string),
        );
    }

    let mut seen = std::collections::HashSet::new();
    seeds.retain(|s| seen.insert(s.clone()));
    if seeds.is_empty() {
        anyhow::bail!("no seed accounts given (positional arguments or --accounts-file)");
    }
    Ok(seeds)
}

async fn crawl(config: Config, seeds: Vec<String>) -> Result<()> {
    tracing::info!(
        platform = %config.crawler.platform,
        seeds = seeds.len(),
        "creel starting"
    );

    let (proxies, validator) = if config.proxy.enabled {
        let pool = Arc::new(ProxyPool::new(
            &config.proxy.file,
            &config.proxy.test_url,
            config.proxy.max_failures,
        ));
        pool.load().context("Failed to load proxy list")?;
        let handle =
            pool.spawn_validator(Duration::from_secs(config.proxy.validation_interval_secs));
        (Some(pool), Some(handle))
    } else {
        (None, None)
    };

    let scraper = build_scraper(&config, proxies.as_deref())?;
    scraper
        .initialize()
        .await
        .context("Session validation failed")?;

    // A disabled checkpoint still dedups in memory, it just never hits disk
    let save_interval = if config.checkpoint.enabled {
        Duration::from_secs(config.checkpoint.interval_secs)
    } else {
        Duration::MAX
    };
    let checkpoint = Arc::new(CheckpointStore::new(&config.checkpoint.file, save_interval));
    if config.checkpoint.enabled {
        checkpoint.load().context("Failed to load checkpoint")?;
    }

    let limiter = Arc::new(RateLimiter::new(
        config.ratelimit.enabled,
        config.ratelimit.requests_per_minute,
    ));

    let sink: Arc<dyn Sink> = match config.storage.backend.as_str() {
        "sqlite" => Arc::new(SqliteSink::new(
            &config.storage.sqlite_path,
            config.crawler.platform,
        )?),
        _ => Arc::new(JsonDirSink::new(&config.storage.output_dir)?),
    };

    let orchestrator = Orchestrator::new(
        config.clone(),
        scraper,
        sink,
        Arc::clone(&checkpoint),
        limiter,
    );

    tokio::select! {
        summary = orchestrator.run(seeds) => {
            tracing::info!(
                completed = summary.completed,
                skipped = summary.skipped,
                abandoned = summary.abandoned,
                "creel completed"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted, saving checkpoint before exit");
            if config.checkpoint.enabled {
                checkpoint.save().context("Failed to save checkpoint")?;
            }
        }
    }

    if let Some(handle) = validator {
        handle.abort();
    }
    Ok(())
}

async fn proxy_command(config: &Config, action: ProxyAction) -> Result<()> {
    let pool = Arc::new(ProxyPool::new(
        &config.proxy.file,
        &config.proxy.test_url,
        config.proxy.max_failures,
    ));
    pool.load().context("Failed to load proxy list")?;

    match action {
        ProxyAction::Add {
            proxy,
            protocol,
            username,
            password,
        } => {
            let (address, port) = parse_host_port(&proxy).map_err(anyhow::Error::msg)?;
            let protocol = match protocol.as_str() {
                "http" => ProxyProtocol::Http,
                "https" => ProxyProtocol::Https,
                "socks5" => ProxyProtocol::Socks5,
                other => anyhow::bail!("unknown proxy protocol: {other}"),
            };

            let mut entry = ProxyEntry::new(address, port, protocol);
            entry.username = username;
            entry.password = password;
            pool.add_proxy(entry);
            pool.save()?;
            println!("Added {proxy}");
        }

        ProxyAction::Remove { proxy } => {
            let (address, port) = parse_host_port(&proxy).map_err(anyhow::Error::msg)?;
            pool.remove_proxy(&address, port);
            pool.save()?;
            println!("Removed {proxy}");
        }

        ProxyAction::List => {
            let entries = pool.list();
            if entries.is_empty() {
                println!("Proxy pool is empty");
            }
            for p in entries {
                println!(
                    "{}://{}:{}  valid={}  failures={}  last_used={}",
                    p.protocol, p.address, p.port, p.is_valid, p.fail_count, p.last_used
                );
            }
        }

        ProxyAction::Check => {
            let (total, _) = pool.counts();
            if total == 0 {
                println!("Proxy pool is empty");
                return Ok(());
            }
            println!("Validating {total} proxies against {}...", config.proxy.test_url);
            pool.validate_all().await;
            let (total, usable) = pool.counts();
            println!("{usable}/{total} proxies usable");
        }
    }

    Ok(())
}
