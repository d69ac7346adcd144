use anyhow::{Context, Result};
use clap::Parser;
use facematch_core::FaceProcessor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod routes;
mod scratch;

use config::Config;
use routes::AppState;

#[derive(Parser)]
#[command(name = "facematch-server", about = "Face comparison web service")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to bind
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,
    /// Directory containing the ONNX models
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Scratch directory for uploads
    #[arg(long)]
    upload_dir: Option<PathBuf>,
    /// Skip gender detection
    #[arg(long)]
    no_gender: bool,
    /// Skip age detection
    #[arg(long)]
    no_age: bool,
    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.model_dir {
            config.model_dir = dir;
        }
        if let Some(dir) = self.upload_dir {
            config.upload_dir = dir;
        }
        config.gender_enabled &= !self.no_gender;
        config.age_enabled &= !self.no_age;
        config.debug |= self.debug;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())
        .with_context(|| format!("reading config {:?}", args.config))?;
    config.apply_env();
    args.apply(&mut config);

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facematch-server starting");

    let model_config = config.model_config();
    let processor = tokio::task::spawn_blocking(move || FaceProcessor::load(&model_config))
        .await?
        .context("loading face models")?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("creating upload directory {}", config.upload_dir.display()))?;

    let addr = config.bind_addr();
    let upload_dir = config.upload_dir.clone();
    let state = Arc::new(AppState {
        processor: Arc::new(processor),
        config,
    });

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, upload_dir = %upload_dir.display(), "facematch-server ready");

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("facematch-server shutting down");
        })
        .await?;

    Ok(())
}
