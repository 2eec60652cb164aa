//! releasewatch
//!
//! Tracks bug counts per release and announces every change.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          releasewatch                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Config    │───▶│    Stats     │───▶│   History    │       │
//! │  │    Cache     │    │    Poller    │    │    Store     │       │
//! │  │              │    │   (Eyes)     │    │              │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             ▼                                    │
//! │                      ┌──────────────┐                            │
//! │                      │   Listener   │                            │
//! │                      └──────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use releasewatch::adapters::{
    FetchConfig, InMemoryStateStore, LoggingStatsListener, RestStatsSource, SqliteStateStore,
};
use releasewatch::domain::{ConfigStore, HistoryStore, StatsListener, StatsSource};
use releasewatch::{
    ConfigCache, EngineMetrics, PollerConfig, QueryEngine, QuerySelector, StatsPoller,
    VersionSelector,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// releasewatch - Release health tracker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// URL of the tracking configuration document
    #[arg(
        long,
        env = "BZCONFIG_JSON_URL",
        default_value = "http://mozilla.github.io/releasehealth/js/bzconfig.json",
        global = true
    )]
    config_url: String,

    /// Timeout for a single remote request in seconds
    #[arg(
        long,
        env = "FETCH_TIMEOUT_SECONDS",
        default_value = "30",
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    fetch_timeout_seconds: u64,

    /// Path of the SQLite state database
    #[arg(long, env = "STATE_DB", default_value = "releasewatch.db", global = true)]
    state_db: PathBuf,

    /// Keep state in memory only (nothing survives a restart)
    #[arg(long, env = "IN_MEMORY", global = true)]
    in_memory: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(long, env = "DEBUG", global = true)]
    debug: bool,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll continuously and announce changes
    Run {
        /// Seconds between poll cycles
        #[arg(
            long,
            env = "STATS_REFRESH_PERIOD",
            default_value = "300",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        poll_seconds: u64,

        /// Seconds between tracking configuration refreshes
        #[arg(
            long,
            env = "BZCONFIG_REFRESH_PERIOD",
            default_value = "600",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        config_refresh_seconds: u64,

        /// Metrics server bind address
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
        metrics_addr: String,

        /// Health server bind address
        #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
        health_addr: String,
    },

    /// Print the latest recorded stats
    Query {
        /// Release number, title, or `*` for all
        version: Option<String>,

        /// Query title prefix, or `*` for all
        query: Option<String>,
    },

    /// Fetch the tracking configuration once and list the tracked releases
    Refresh,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let source: Arc<dyn StatsSource> = Arc::new(RestStatsSource::new(FetchConfig {
        config_url: args.config_url.clone(),
        timeout: Duration::from_secs(args.fetch_timeout_seconds),
    })?);
    let (config_store, history) = open_store(&args)?;

    match &args.command {
        Command::Run {
            poll_seconds,
            config_refresh_seconds,
            metrics_addr,
            health_addr,
        } => {
            let poller_config = PollerConfig {
                poll_interval: Duration::from_secs(*poll_seconds),
                config_refresh_interval: Duration::from_secs(*config_refresh_seconds),
            };
            run(
                &args,
                poller_config,
                source,
                config_store,
                history,
                metrics_addr.clone(),
                health_addr.clone(),
            )
            .await
        }
        Command::Query { version, query } => {
            let cache = Arc::new(ConfigCache::new(source, config_store));
            let engine = QueryEngine::new(cache, history);

            let lines = engine
                .lines(
                    &VersionSelector::parse(version.as_deref()),
                    &QuerySelector::parse(query.as_deref()),
                )
                .await?;
            if lines.is_empty() {
                println!("not found");
            }
            for line in lines {
                println!("{}", line);
            }
            Ok(())
        }
        Command::Refresh => {
            let cache = ConfigCache::new(source, config_store)
                .with_listener(Arc::new(LoggingStatsListener::info_level()));
            cache
                .refresh()
                .await
                .context("tracking configuration refresh failed")?;

            let config = cache.get().await?;
            for version in config.versions() {
                println!("{} ({}) [{}]", version.title, version.number, version.label);
            }
            println!(
                "{} queries, {} pairs tracked",
                config.queries().len(),
                config.pair_count()
            );
            Ok(())
        }
    }
}

type Stores = (Arc<dyn ConfigStore>, Arc<dyn HistoryStore>);

fn open_store(args: &Args) -> anyhow::Result<Stores> {
    if args.in_memory {
        let store = Arc::new(InMemoryStateStore::new());
        return Ok((store.clone(), store));
    }

    let store = Arc::new(
        SqliteStateStore::open(&args.state_db)
            .with_context(|| format!("cannot open state database {}", args.state_db.display()))?,
    );
    Ok((store.clone(), store))
}

async fn run(
    args: &Args,
    poller_config: PollerConfig,
    source: Arc<dyn StatsSource>,
    config_store: Arc<dyn ConfigStore>,
    history: Arc<dyn HistoryStore>,
    metrics_addr: String,
    health_addr: String,
) -> anyhow::Result<()> {
    info!("Starting releasewatch");
    info!("  Config URL: {}", args.config_url);
    if args.in_memory {
        info!("  State: in memory");
    } else {
        info!("  State DB: {}", args.state_db.display());
    }
    info!("  Poll interval: {:?}", poller_config.poll_interval);
    info!(
        "  Config refresh interval: {:?}",
        poller_config.config_refresh_interval
    );

    let listener: Arc<dyn StatsListener> = Arc::new(LoggingStatsListener::info_level());
    let cache = Arc::new(
        ConfigCache::new(Arc::clone(&source), config_store).with_listener(Arc::clone(&listener)),
    );
    let metrics = Arc::new(EngineMetrics::new()?);

    let poller = Arc::new(
        StatsPoller::new(poller_config, Arc::clone(&cache), source, history, listener)
            .with_metrics(Arc::clone(&metrics)),
    );

    // Start health server
    let health_cache = Arc::clone(&cache);
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_cache).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let server_metrics = Arc::clone(&metrics);
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, server_metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let handle = tokio::spawn(Arc::clone(&poller).run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    poller.shutdown();
    handle.await.context("poller task failed")?;

    info!("releasewatch shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = if args.debug {
        Level::DEBUG
    } else {
        match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, cache: Arc<ConfigCache>) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn reply(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        response
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid health server address {}", addr))?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind health server")?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("health server accept error")?;
        let io = TokioIo::new(stream);
        let cache = Arc::clone(&cache);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let cache = Arc::clone(&cache);
                async move {
                    let ready = matches!(cache.current().await, Ok(Some(_)));
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => reply(StatusCode::OK, "ok"),
                        "/readyz" if ready => reply(StatusCode::OK, "ok"),
                        "/readyz" => reply(StatusCode::SERVICE_UNAVAILABLE, "configuration not loaded"),
                        _ => reply(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: Arc<EngineMetrics>) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::header::CONTENT_TYPE;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn metrics_response(metrics: &EngineMetrics) -> Response<Full<Bytes>> {
        match metrics.encode() {
            Ok((content_type, body)) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                if let Ok(value) = content_type.parse() {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                let mut response = Response::new(Full::new(Bytes::from(e.to_string())));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("metrics server accept error")?;
        let io = TokioIo::new(stream);
        let metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = match req.uri().path() {
                    "/metrics" => metrics_response(&metrics),
                    _ => {
                        let mut response = Response::new(Full::new(Bytes::from("not found")));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        response
                    }
                };
                async move { Ok::<_, std::convert::Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
