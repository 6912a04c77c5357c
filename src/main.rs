//! Storage Orchestrator daemon
//!
//! Bootstraps the provisioning engine over a file-backed store, applies an
//! optional seed file, and serves health and metrics endpoints.

use anyhow::Context;
use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_orchestrator::config::SeedConfig;
use storage_orchestrator::{BackendFactory, FileStore, Orchestrator, OrchestratorConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Orchestrator - storage class matching and volume provisioning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of the persisted store
    #[arg(long, env = "STORE_DIR", default_value = "/var/lib/storage-orchestrator")]
    store_dir: PathBuf,

    /// YAML file of backends and storage classes to register at startup
    #[arg(long, env = "SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Seed for pool selection, for reproducible placement
    #[arg(long, env = "SELECTION_SEED")]
    selection_seed: Option<u64>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Storage Orchestrator");
    info!("  Version: {}", storage_orchestrator::VERSION);
    info!("  Store: {}", args.store_dir.display());
    info!("  Health: {}", args.health_addr);
    info!("  Metrics: {}", args.metrics_addr);

    let health_addr: SocketAddr = args
        .health_addr
        .parse()
        .with_context(|| format!("invalid health address {}", args.health_addr))?;
    let metrics_addr: SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics address {}", args.metrics_addr))?;

    let store = FileStore::open(&args.store_dir)
        .await
        .with_context(|| format!("failed to open store at {}", args.store_dir.display()))?;

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            selection_seed: args.selection_seed,
            ..Default::default()
        },
        Arc::new(store),
        BackendFactory::with_defaults(),
    )?;

    // Health reports not-ready until bootstrap finishes
    let health = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health).await {
            error!("Health server error: {:#}", e);
        }
    });

    let metrics = orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(event = ?event, "Engine event");
        }
    });

    orchestrator
        .bootstrap()
        .await
        .context("bootstrap failed")?;

    if let Some(path) = &args.seed_file {
        let seed = SeedConfig::load(path)
            .await
            .with_context(|| format!("failed to load seed file {}", path.display()))?;
        seed.apply(&orchestrator)
            .await
            .context("failed to apply seed file")?;
    }

    let status = orchestrator.status().await;
    info!(
        "Orchestrator ready: {} backend(s) ({} online), {} volume(s), {} snapshot(s)",
        status.backend_count, status.online_backends, status.volume_count, status.snapshot_count
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

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
}

// =============================================================================
// Health and Metrics Servers
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(
    addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let orchestrator = orchestrator.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let ready = orchestrator.is_ready();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => text_response(StatusCode::OK, "ok"),
                        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "bootstrapping"),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .with_context(|| format!("failed to bind health server to {}", addr))?
        .serve(make_svc)
        .await
        .context("health server failed")?;

    Ok(())
}

async fn run_metrics_server(
    addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder, TEXT_FORMAT};

    let registry = orchestrator.metrics_registry();

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            let mut buffer = Vec::new();
                            match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    let mut response = text_response(StatusCode::OK, buffer);
                                    response.headers_mut().insert(
                                        CONTENT_TYPE,
                                        HeaderValue::from_static(TEXT_FORMAT),
                                    );
                                    response
                                }
                                Err(e) => text_response(
                                    StatusCode::INTERNAL_SERVER_ERROR,
                                    format!("failed to encode metrics: {}", e),
                                ),
                            }
                        }
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .with_context(|| format!("failed to bind metrics server to {}", addr))?
        .serve(make_svc)
        .await
        .context("metrics server failed")?;

    Ok(())
}
