//! Kuba Finder command line
//!
//! Runs namespace queries and fetches against a configured federation from
//! the shell.
//!
//! # Commands
//!
//! - `find <query>` - List nodes matching a query
//! - `fetch <metric> --from --until [--now]` - Fetch one metric
//! - `check-config` - Validate the configuration and show the peer list
//!
//! # Configuration
//!
//! Read from `--config` or `FINDER_CONFIG`, then overridden by `FINDER_*`
//! environment variables. Without a file, only the environment is used.
//!
//! ```bash
//! FINDER_DATA_DIRS=/var/lib/whisper kuba-finder find 'servers.*.cpu'
//! kuba-finder --config /etc/finder.toml fetch servers.web01.cpu --from 1700000000 --until 1700003600
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use kuba_finder::{
    cache::LocalFindCache,
    config::FederationConfig,
    metrics::gather_metrics,
    remote::extract_forward_headers,
    storage::Backends,
    store::Store,
    types::FetchResult,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "kuba-finder")]
#[command(version)]
#[command(about = "Federated metric namespace search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "FINDER_CONFIG")]
    config: Option<PathBuf>,

    /// Request header to forward to peers, as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", global = true)]
    headers: Vec<String>,

    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    print_metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List nodes matching a query
    Find {
        /// Dotted query, may contain wildcards
        query: String,
    },

    /// Fetch a single metric
    Fetch {
        /// Exact metric path
        metric: String,

        /// Range start, unix seconds
        #[arg(long)]
        from: i64,

        /// Range end, unix seconds
        #[arg(long)]
        until: i64,

        /// Reference time for relative archives, unix seconds
        #[arg(long)]
        now: Option<i64>,
    },

    /// Validate configuration without querying
    CheckConfig,
}

fn load_config(cli: &Cli) -> Result<FederationConfig, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => FederationConfig::from_file_with_env(&path.to_string_lossy())?,
        None => FederationConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .ok_or_else(|| format!("header must be NAME:VALUE, got {:?}", entry))?;
        headers.append(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
    Ok(headers)
}

fn build_store(config: &FederationConfig) -> Result<Store, Box<dyn std::error::Error>> {
    let cache = Arc::new(LocalFindCache::new(config.find_cache_entries));
    Ok(Store::new(config, Backends::default(), cache)?)
}

async fn cmd_find(
    config: &FederationConfig,
    query: &str,
    headers: &HeaderMap,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = build_store(config)?;
    let nodes = store.find(query, headers).await?;
    info!(query = %query, count = nodes.len(), "Find finished");

    for node in nodes {
        let kind = if node.is_leaf() { "leaf" } else { "branch" };
        println!("{}\t{}\t{}", node.metric_path(), kind, node.kind());
    }
    Ok(())
}

async fn cmd_fetch(
    config: &FederationConfig,
    metric: &str,
    (from, until, now): (i64, i64, Option<i64>),
    headers: &HeaderMap,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = build_store(config)?;
    let node = store
        .find_first(metric, headers)
        .await?
        .ok_or_else(|| format!("metric not found: {}", metric))?;
    debug!(metric = %metric, kind = node.kind(), "Fetching node");

    let output = match node.fetch_with_headers(from, until, now, headers).await? {
        FetchResult::Empty => serde_json::json!([]),
        FetchResult::Series(data) => serde_json::json!([{
            "name": node.metric_path(),
            "start": data.time_info.start,
            "end": data.time_info.end,
            "step": data.time_info.step,
            "values": data.values,
        }]),
        FetchResult::Remote(series) => serde_json::to_value(series)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_check_config(config: &FederationConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = build_store(config)?;

    println!("Configuration is valid!");
    println!();
    println!("Local roots:");
    for dir in store.directories() {
        println!("  {}", dir.display());
    }
    println!();
    println!("Cluster:");
    println!("  Local host: {}", store.local_host());
    for peer in store.remote_stores() {
        println!("  Peer: {}", peer.host());
    }
    println!();
    println!("Peer Settings:");
    println!("  Transport: {}", if config.use_post { "POST" } else { "GET" });
    println!("  Find timeout: {} ms", config.find_timeout_ms);
    println!("  Fetch timeout: {} ms", config.fetch_timeout_ms);
    println!("  Retry delay: {} s", config.retry_delay_secs);
    println!("  Find cache TTL: {} s", config.find_cache_ttl_secs);
    println!("  Forwarded headers: {:?}", config.forward_headers);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let headers = extract_forward_headers(&parse_headers(&cli.headers)?, &config.forward_headers);

    match &cli.command {
        Commands::Find { query } => cmd_find(&config, query, &headers).await?,
        Commands::Fetch {
            metric,
            from,
            until,
            now,
        } => cmd_fetch(&config, metric, (*from, *until, *now), &headers).await?,
        Commands::CheckConfig => cmd_check_config(&config)?,
    }

    if cli.print_metrics {
        print!("{}", gather_metrics()?);
    }
    Ok(())
}
