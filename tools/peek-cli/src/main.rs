//! Headless runner for the Peek extension host
//!
//! Boots the orchestrator on the in-memory host: discovers and starts the
//! extensions, then runs until Ctrl+C (or right away with `--once`).
//!
//! ```text
//! peek --config peek.json --load-extension ./my-ext --debug
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use peek_host_mock::MockHost;
use peek_orchestrator::{HostConfig, MemoryDatastore, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "peek", about = "Run the Peek extension host headless")]
struct Cli {
    /// JSON config file (camelCase keys). Missing file means defaults.
    #[arg(long, default_value = "peek.json")]
    config: PathBuf,

    /// Extra extension directory for this run. Repeatable.
    #[arg(long = "load-extension", value_name = "DIR")]
    load_extension: Vec<PathBuf>,

    /// Verbose logging
    #[arg(long, env = "DEBUG")]
    debug: bool,

    /// Profile name; storage lives under <dataDir>/<profile>
    #[arg(long, env = "PROFILE")]
    profile: Option<String>,

    /// Built-in extension directory (overrides the config file)
    #[arg(long)]
    extensions_dir: Option<PathBuf>,

    /// Shut down as soon as startup completes
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "[peek] fatal");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> peek_orchestrator::Result<()> {
    let mut config = HostConfig::load(&cli.config)?;
    config.apply_env();
    if let Some(profile) = cli.profile {
        config.profile = profile;
    }
    if let Some(dir) = cli.extensions_dir {
        config.extensions_dir = dir;
    }
    config.debug |= cli.debug;
    // The in-memory host has no screen.
    config.headless = true;
    for path in cli.load_extension {
        config.load_extension(path);
    }

    info!(
        profile = %config.profile,
        profile_dir = %config.profile_dir().display(),
        extensions_dir = %config.extensions_dir.display(),
        "[peek] configuration loaded"
    );

    let host = Arc::new(MockHost::new());
    let datastore = Arc::new(MemoryDatastore::new());
    let orchestrator = Orchestrator::new(config, host, datastore)?;

    let report = orchestrator.start().await?;
    for (id, reason) in &report.failed {
        warn!(ext_id = %id, reason = %reason, "[peek] extension failed to start");
    }
    for command in orchestrator.commands() {
        info!(command = %command.name, source = %command.source_address, "[peek] command available");
    }
    match serde_json::to_string(&orchestrator.list_windows()) {
        Ok(windows) => info!(windows = %windows, "[peek] running"),
        Err(e) => warn!(error = %e, "[peek] window list not encodable"),
    }

    if !cli.once {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "[peek] could not wait for Ctrl+C, shutting down");
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
