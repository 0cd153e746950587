//! Command-line harness for the PWAKit offline worker.
//!
//! Drives a worker against a real origin with the cache store persisted to
//! a JSON snapshot between runs, so offline behaviour can be checked by hand.
//!
//! ## Usage
//!
//! ```bash
//! # Install + activate against a running app, saving the caches
//! sw-harness --origin http://localhost:3000 install
//!
//! # Replay a navigation with the network cut (reuses the saved precache)
//! sw-harness --origin http://localhost:3000 fetch /results --navigate --offline
//!
//! # Render a push payload
//! sw-harness push '{"body":"Hi","url":"/dashboard"}'
//!
//! # Inspect the persisted buckets
//! sw-harness caches
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use http::Method;
use pwakit_common::{
    init_logging, LogConfig, LogFormat, OptionExt, PwaKitError, Result, ResultExt,
};
use pwakit_sw::{
    AssetOutcome, CacheStorage, FetchOutcome, FetchRequest, Fetcher, HttpFetcher,
    HttpFetcherConfig, OfflineFetcher, OfflineWorker, WorkerConfig,
};
use tracing::{debug, error};
use url::Url;

#[derive(Parser)]
#[command(name = "sw-harness")]
#[command(about = "Command-line harness for the PWAKit offline worker")]
struct Cli {
    /// Worker configuration (JSON). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Cache store snapshot, loaded before and saved after each command
    #[arg(long, global = true, default_value = "sw-caches.json")]
    snapshot: PathBuf,
    /// Origin the worker is registered for
    #[arg(long, global = true, default_value = "http://localhost:3000/")]
    origin: Url,
    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate the worker, precaching the manifest
    Install,

    /// Run one request through the worker
    Fetch {
        /// Path (or absolute URL) to request
        path: String,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
        /// Simulate a network outage
        #[arg(long)]
        offline: bool,
        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// Precache again even if the snapshot already holds this version
        #[arg(long)]
        reinstall: bool,
    },

    /// Render a push payload as a notification
    Push {
        /// Raw push message body
        payload: String,
    },

    /// List buckets in the snapshot
    Caches,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = match cli.log_format.parse::<LogFormat>() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    };
    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(format));

    if let Err(e) = run(cli).await {
        error!(category = e.category(), "{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => WorkerConfig::load(path)?,
        None => WorkerConfig::default(),
    };

    match cli.command {
        Commands::Install => {
            let worker = build_worker(config, &cli.origin, &cli.snapshot, false).await?;
            let report = worker.start().await?;

            println!("Precache into {}:", report.cache_name);
            for result in &report.results {
                match &result.outcome {
                    AssetOutcome::Cached { status, bytes } => {
                        println!("  ok    {} ({} {} bytes)", result.path, status, bytes)
                    }
                    AssetOutcome::Failed { reason } => {
                        println!("  FAIL  {} ({})", result.path, reason)
                    }
                }
            }
            println!(
                "  {} cached, {} failed",
                report.succeeded(),
                report.failed()
            );

            save(&worker, &cli.snapshot).await?;
        }

        Commands::Fetch {
            path,
            navigate,
            offline,
            method,
            reinstall,
        } => {
            let worker = build_worker(config, &cli.origin, &cli.snapshot, offline).await?;
            let persisted = worker
                .caches()
                .read()
                .await
                .has(&worker.config().static_cache_name());
            if persisted && !reinstall {
                debug!("Reusing persisted static cache");
                worker.restore().await?;
            } else {
                worker.start().await?;
            }

            let url = worker.origin().join(&path).context("request path")?;
            let method =
                Method::from_bytes(method.to_ascii_uppercase().as_bytes()).context("HTTP method")?;
            let request = if navigate {
                FetchRequest::navigate(url)
            } else {
                FetchRequest::get(url)
            }
            .method(method);

            match worker.handle_fetch(&request).await {
                FetchOutcome::Respond { route, response } => {
                    println!("Route:  {:?}", route);
                    println!("Status: {} {}", response.status, response.status_text);
                    println!("Source: {:?}", response.source);
                    println!("Body:   {} bytes", response.body.len());
                }
                FetchOutcome::Passthrough(reason) => {
                    println!("Passthrough: {:?}", reason);
                }
            }

            save(&worker, &cli.snapshot).await?;
        }

        Commands::Push { payload } => {
            let worker = build_worker(config, &cli.origin, &cli.snapshot, true).await?;
            let notification = worker
                .handle_push(payload.as_bytes())
                .ok_or_not_found("notification for malformed push payload")?;
            let json = serde_json::to_string_pretty(&notification)
                .map_err(|e| PwaKitError::internal(e.to_string()))?;
            println!("{}", json);
        }

        Commands::Caches => {
            let caches = CacheStorage::load(&cli.snapshot).await?;
            if caches.keys().is_empty() {
                println!("No caches in {}", cli.snapshot.display());
            }
            for name in caches.keys() {
                let cache = caches
                    .get(name)
                    .ok_or_not_found(format!("cache '{}'", name))?;
                println!("{} ({} entries, {} bytes)", name, cache.len(), cache.size_bytes());
                for key in cache.keys() {
                    println!("  {}", key);
                }
            }
            println!("Total: {} bytes", caches.total_bytes());
        }
    }

    Ok(())
}

async fn build_worker(
    config: WorkerConfig,
    origin: &Url,
    snapshot: &Path,
    offline: bool,
) -> Result<OfflineWorker> {
    let fetcher: Arc<dyn Fetcher> = if offline {
        Arc::new(OfflineFetcher)
    } else {
        Arc::new(HttpFetcher::with_config(HttpFetcherConfig {
            timeout: config.fetch_timeout(),
            ..Default::default()
        })?)
    };

    let caches = CacheStorage::load(snapshot).await?;
    debug!(snapshot = %snapshot.display(), buckets = caches.keys().len(), "Loaded cache store");

    // The harness does not consume worker events.
    let (worker, _events) = OfflineWorker::with_caches(config, origin.clone(), fetcher, caches)?;
    Ok(worker)
}

async fn save(worker: &OfflineWorker, snapshot: &Path) -> Result<()> {
    worker.caches().read().await.save(snapshot).await?;
    println!("Snapshot saved to {}", snapshot.display());
    Ok(())
}
