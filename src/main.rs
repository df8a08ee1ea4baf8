//! TaskForge — single-host scheduler for command-line automation jobs.
//!
//! Usage:
//!   taskforge                          # defaults: taskforge.toml + catalog.toml
//!   taskforge --config /etc/tf.toml    # explicit settings file
//!   taskforge --port 9090              # override the API port

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskforge_core::clock::SystemClock;
use taskforge_core::config::ForgeConfig;
use taskforge_engine::{Engine, HttpWebhookSink, NullSink, WebhookSink};

#[derive(Parser)]
#[command(name = "taskforge", version, about = "Scheduler for command-line automation jobs")]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, default_value = "taskforge.toml")]
    config: PathBuf,

    /// Override the API bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the API port
    #[arg(short, long)]
    port: Option<u16>,

    /// Start with the scheduler loop paused
    #[arg(long)]
    paused: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = ForgeConfig::load_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        cfg.host = host;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }

    let catalog = cfg.load_catalog().context("loading the job catalog")?;
    tracing::info!(
        jobs = catalog.jobs.len(),
        groups = catalog.groups.len(),
        "catalog loaded"
    );

    let sink: Arc<dyn WebhookSink> = match HttpWebhookSink::from_env() {
        Some(sink) => Arc::new(sink),
        None => Arc::new(NullSink),
    };

    let host = cfg.host.clone();
    let port = cfg.port;
    let engine = Engine::new(cfg, catalog, Arc::new(SystemClock), sink)
        .context("constructing the engine")?;
    engine.spawn_loop();
    if !cli.paused {
        engine.start();
    }

    let serve_engine = engine.clone();
    let server = tokio::spawn(async move { taskforge_gateway::serve(serve_engine, &host, port).await });

    tokio::select! {
        result = server => {
            result.context("gateway task failed")?.context("control API failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            engine.stop().await;
        }
    }
    Ok(())
}
