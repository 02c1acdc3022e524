//! docsiftd - serving control plane daemon
//!
//! Loads a `ServingConfig`, builds the control plane over an in-memory
//! repository and runs the maintenance loop (auto-promotion, then health
//! monitoring) until interrupted.
//!
//! Demo only: the repository starts empty and predictors come from the
//! scripted test loader, so no real models are served or promoted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use docsift_core::fakes::ScriptedLoader;
use docsift_core::telemetry::init_tracing;
use docsift_core::{MaintenanceScheduler, ServingConfig, ServingControlPlane, SystemClock};
use docsift_state::fakes::MemoryModelRepository;
use docsift_state::{DocumentType, ModelRepository};
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "docsiftd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "docsift model serving control plane daemon (demo: in-memory models, scripted predictors)")]
#[command(long_about = "docsift model serving control plane daemon.\n\n\
DEMO ONLY: models live in an empty in-memory repository and predictors come \
from a scripted test loader, so maintenance passes promote nothing and no \
real inference is served. Use it to exercise configuration, logging and the \
maintenance loop.")]
struct Cli {
    /// Path to a TOML serving config (defaults apply when omitted)
    #[arg(short, long, env = "DOCSIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON-formatted log lines
    #[arg(long, env = "DOCSIFT_LOG_JSON")]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Run a single maintenance pass over the demo in-memory repository,
    /// print its report and exit
    #[arg(long)]
    once: bool,

    /// Document types to register up front so health checks cover them
    #[arg(long = "document-type", value_name = "TYPE")]
    document_types: Vec<String>,
}

fn load_config(path: Option<&PathBuf>) -> Result<ServingConfig> {
    match path {
        Some(path) => ServingConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(ServingConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = load_config(cli.config.as_ref())?;
    let interval = config.maintenance_interval();

    let repository = Arc::new(MemoryModelRepository::new());
    for name in &cli.document_types {
        repository
            .register_document_type(DocumentType::from(name.as_str()))
            .await
            .with_context(|| format!("Failed to register document type {}", name))?;
    }

    // No predictor backend is linked in; the scripted loader answers with an
    // empty object for every model path.
    let loader = Arc::new(ScriptedLoader::new(serde_json::json!({})));
    let control_plane = Arc::new(ServingControlPlane::new(
        config,
        repository,
        loader,
        Arc::new(SystemClock),
    ));
    let scheduler = MaintenanceScheduler::new(control_plane, interval);

    warn!("demo mode: in-memory repository and scripted predictors, nothing real is served");
    info!(
        version = docsift_core::VERSION,
        interval_secs = interval.as_secs(),
        "docsiftd started"
    );

    if cli.once {
        let report = scheduler.tick().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let ticks = scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await;
    info!(ticks = ticks, "docsiftd stopped");
    Ok(())
}
