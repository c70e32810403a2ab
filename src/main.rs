// src/main.rs - Bridge daemon entry point
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use printago_bridge::config::{self, Config, ConfigError};
use printago_bridge::file_manager::HttpDownloader;
use printago_bridge::hardware::InMemoryDirectory;
use printago_bridge::print_job::{JobRunner, JobTracker};
use printago_bridge::slicer::{DirectoryPresetStore, ProcessSlicer};
use printago_bridge::web::{ControlServer, SessionSlot};
use printago_bridge::Router;

const DEFAULT_CONFIG: &str = "printago.toml";

#[derive(Debug, Parser)]
#[command(name = "printago-bridge", version, about = "Remote control channel for local printers")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn load(path: &Path) -> Result<Config, ConfigError> {
    match config::load_config(path) {
        // Running without a config file is fine as long as none was named.
        Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound && path.as_os_str() == DEFAULT_CONFIG => {
            Ok(Config::default())
        }
        other => other,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();
    let mut config = load(&cli.config)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let level = if cli.verbose { tracing::Level::DEBUG } else { config.logging.max_level()? };
    tracing_subscriber::fmt().with_max_level(level).init();

    tracing::info!("Starting printago-bridge {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Configuration: {}", cli.config.display());
    tracing::info!("Serving {} printer(s)", config.printers.len());

    let devices = Arc::new(InMemoryDirectory::from_entries(&config.printers));
    let presets = Arc::new(DirectoryPresetStore::new(config.presets.dir.clone()));
    let mut downloader = HttpDownloader::new(config.job.download_timeout())?;
    if let Some(root) = &config.job.local_source_dir {
        tracing::info!("file:// job sources allowed under {}", root.display());
        downloader = downloader.with_local_root(root);
    }
    let downloader = Arc::new(downloader);
    let slicer = Arc::new(ProcessSlicer::new(&config.slicer));
    if config.slicer.program.is_none() {
        tracing::warn!("No slicer program configured; print jobs will fail at execution");
    }

    let jobs = JobTracker::new();
    let sessions = SessionSlot::new();
    let job_tx = JobRunner::new(
        jobs.clone(),
        downloader,
        presets.clone(),
        slicer,
        sessions.clone(),
        config.job.clone(),
    )
    .spawn();

    let router = Arc::new(Router::new(devices, presets, jobs, job_tx, sessions.clone(), config.control.clone()));
    let server = ControlServer::bind(&config.server, router, sessions).await?;
    server.run_until(tokio::signal::ctrl_c()).await;

    tracing::info!("printago-bridge stopped");
    Ok(())
}
