// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use loom_config::{EXIT_MISCONFIGURED, EXIT_UPSTREAM_UNAVAILABLE, LoomConfig};
use loom_daemon::{AppState, build_app};
use loom_jobstore::JobStore;
use loom_registry::ProjectRegistry;
use loom_runtime::{Services, StageRuntime, WorkerPool};
use loom_telemetry::TelemetrySink;
use loom_transport::{
    DraftClient, EmbedClient, GraphStore, HttpGraphStore, HttpVectorStore, LogicClient, OpContext,
    PlainTextExtractor,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "loom-daemon", version, about = "Manuscript Loom orchestrator daemon")]
struct Args {
    /// Bind address; overrides LOOM_BIND.
    #[arg(long)]
    bind: Option<String>,

    /// Enable request/stage debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("loom=debug,loom.runtime=debug,loom.daemon=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loom=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match LoomConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(target: "loom.daemon", error = %err, "configuration invalid");
            std::process::exit(EXIT_MISCONFIGURED);
        }
    };
    let bind = args.bind.unwrap_or_else(|| config.bind.clone());

    let telemetry = TelemetrySink::new();
    let graph = Arc::new(HttpGraphStore::new(
        &config.graph_url,
        config.graph_password.clone(),
    ));

    // The graph store is load-bearing for every endpoint; refuse to start
    // without it.
    let probe = OpContext::with_timeout(Duration::from_secs(5));
    if let Err(err) = graph.ping(&probe).await {
        error!(target: "loom.daemon", error = %err, "graph store unreachable at startup");
        std::process::exit(EXIT_UPSTREAM_UNAVAILABLE);
    }

    let services = Arc::new(Services {
        logic: Arc::new(LogicClient::new(&config.logic_url, Some(telemetry.clone()))),
        draft: Arc::new(DraftClient::new(&config.draft_url, Some(telemetry.clone()))),
        embedder: Arc::new(EmbedClient::new(&config.embed_url, Some(telemetry.clone()))),
        extractor: Arc::new(PlainTextExtractor),
        graph: graph.clone(),
        vectors: Arc::new(HttpVectorStore::new(&config.vector_url)),
        telemetry: telemetry.clone(),
        artifact_root: config.artifact_root.clone(),
    });

    let jobs = Arc::new(JobStore::new(graph.clone()));
    let runtime = Arc::new(StageRuntime::new(
        Arc::clone(&services),
        Arc::clone(&jobs),
        config.job_deadline,
    ));
    let pool = WorkerPool::spawn(runtime, config.workers, config.queue_capacity);

    let state = Arc::new(AppState {
        registry: ProjectRegistry::new(graph),
        jobs,
        pool: Arc::clone(&pool),
        services,
        default_rigor: config.default_rigor,
        upload_root: config.artifact_root.join("uploads"),
        started_at: Instant::now(),
    });

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(
        target: "loom.daemon",
        bind = %bind,
        workers = config.workers,
        queue = config.queue_capacity,
        "loom-daemon listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    // Stop intake and let in-flight jobs settle before exiting.
    pool.shutdown().await;
    info!(target: "loom.daemon", "loom-daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!(target: "loom.daemon", "shutdown signal received");
}
