mod routes;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use prolix_contracts::events::EventWriter;
use prolix_contracts::store::{JsonDirTraceStore, MemoryTraceStore, TraceStore};
use prolix_contracts::trace::TraceId;
use prolix_engine::{CancellationFlag, NarrationService, ProviderConfig, Providers, RetrievalService};
use tracing_subscriber::{fmt, EnvFilter};

const EVENTS_FILE: &str = "events.jsonl";
const CORPUS_DIR: &str = "corpus";

#[derive(Debug, Parser)]
#[command(name = "prolix", version, about = "Tap-to-narrate drift backend")]
struct Cli {
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Serve(ServeArgs),
    Generate(GenerateArgs),
    Deepen(DeepenArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,
    /// Persist traces and the event journal here and read evidence from its
    /// `corpus/` subdirectory; memory only when absent.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    tap_x: f64,
    #[arg(long)]
    tap_y: f64,
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct DeepenArgs {
    #[arg(long)]
    trace_id: String,
    #[arg(long)]
    data_dir: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("prolix error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    // Blocking HTTP clients must be built before any async runtime exists.
    let config = ProviderConfig::from_env().context("invalid provider configuration")?;
    let providers = Providers::from_config(&config).context("failed to build providers")?;
    tracing::debug!(?config, "provider configuration loaded");

    match cli.command {
        Command::Serve(args) => run_serve(args, providers),
        Command::Generate(args) => run_generate(args, providers),
        Command::Deepen(args) => run_deepen(args, providers),
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();
}

fn build_service(
    providers: Providers,
    data_dir: Option<&Path>,
) -> Result<NarrationService> {
    let Some(dir) = data_dir else {
        let store: Arc<dyn TraceStore> = Arc::new(MemoryTraceStore::new());
        return Ok(NarrationService::new(providers, store));
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data dir {}", dir.display()))?;
    let store = JsonDirTraceStore::open(dir)
        .with_context(|| format!("failed to open trace store in {}", dir.display()))?;
    let store: Arc<dyn TraceStore> = Arc::new(store);
    let corpus_dir = dir.join(CORPUS_DIR);
    let retrieval = RetrievalService::load(&corpus_dir)
        .with_context(|| format!("failed to load corpus from {}", corpus_dir.display()))?;
    tracing::info!(dir = %corpus_dir.display(), snippets = retrieval.len(), "evidence corpus ready");
    Ok(NarrationService::new(providers, store)
        .with_retrieval(retrieval)
        .with_journal(EventWriter::new(dir.join(EVENTS_FILE))))
}

fn run_serve(args: ServeArgs, providers: Providers) -> Result<()> {
    let service = Arc::new(build_service(providers, args.data_dir.as_deref())?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(serve(args.bind, args.data_dir, service))
}

async fn serve(bind: SocketAddr, data_dir: Option<PathBuf>, service: Arc<NarrationService>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        %bind,
        data_dir = ?data_dir,
        providers = ?service.providers(),
        "prolix listening"
    );
    axum::serve(listener, routes::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn run_generate(args: GenerateArgs, providers: Providers) -> Result<()> {
    let image = fs::read(&args.image)
        .with_context(|| format!("failed to read image {}", args.image.display()))?;
    let service = build_service(providers, args.data_dir.as_deref())?;
    let response = service.generate(&image, args.tap_x, args.tap_y, &CancellationFlag::new())?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_deepen(args: DeepenArgs, providers: Providers) -> Result<()> {
    let Some(trace_id) = TraceId::parse(&args.trace_id) else {
        bail!("--trace-id must not be blank");
    };
    let service = build_service(providers, Some(&args.data_dir))?;
    let response = service.deepen(&trace_id, &CancellationFlag::new())?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
