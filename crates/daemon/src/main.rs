//! Plugin Runtime - Main Entry Point
//! Supervises one locally installed plugin and relays its stdio into logs

mod logging;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

// Import workspace crates
use plugin_runtime_core::application::constants::SHUTDOWN_SWEEP_INTERVAL;
use plugin_runtime_core::application::{shutdown_channel, PluginKeeper, RuntimeDeps, RuntimeSupervisor};
use plugin_runtime_core::port::id_provider::UuidProvider;
use plugin_runtime_core::port::StdioStream;
use plugin_runtime_infra_stdio::{ChannelStdioBroker, StdioFrame};
use plugin_runtime_infra_system::{ProcessTable, TokioProcessLauncher, TokioTaskExecutor};

use settings::{DaemonConfig, Overrides};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "plugin-runtime")]
#[command(about = "Supervise a locally installed plugin", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/daemon.toml)
    #[arg(long, env = "PLUGIN_RUNTIME_CONFIG")]
    config: Option<PathBuf>,

    /// Plugin installation directory
    #[arg(long)]
    plugin_dir: Option<PathBuf>,

    /// Plugin identity (default: plugin directory name)
    #[arg(long)]
    identity: Option<String>,
}

impl Cli {
    fn overrides(self) -> Overrides {
        Overrides {
            config: self.config,
            plugin_dir: self.plugin_dir,
            identity: self.identity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = DaemonConfig::load(&Cli::parse().overrides())?;

    // 2. Initialize logging (guard flushes the log file on exit)
    let _log_guard = logging::init(config.log_format, config.log_dir.as_deref())?;

    info!("Plugin runtime v{} starting...", VERSION);
    info!(
        identity = %config.identity,
        plugin_dir = %config.plugin_dir.display(),
        program = %config.launch.program,
        "Configuration loaded"
    );

    // 3. Setup dependencies (DI wiring)
    let registry = Arc::new(ProcessTable::new());
    let (broker, frames) = ChannelStdioBroker::new(Arc::new(UuidProvider));
    let deps = RuntimeDeps {
        launcher: Arc::new(TokioProcessLauncher::new()),
        registry: registry.clone(),
        broker: Arc::new(broker),
        executor: Arc::new(TokioTaskExecutor::new(config.relay_concurrency)),
    };
    let supervisor = Arc::new(RuntimeSupervisor::local(config.supervisor_config(), deps));

    // 4. Drain plugin output into logs
    let relay_log = tokio::spawn(log_frames(frames));

    // 5. Start keeper (attempt/restart loop)
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let keeper = PluginKeeper::new(supervisor, config.restart_policy());
    let mut keeper_handle = tokio::spawn(async move { keeper.run(shutdown_rx).await });

    info!("Press Ctrl+C to shutdown");

    // 6. Run until the keeper gives up or a shutdown signal arrives
    let report = tokio::select! {
        joined = &mut keeper_handle => joined.context("Keeper task failed")??,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received. Stopping plugin...");

            shutdown_tx
                .shutdown_and_sweep(&mut keeper_handle, &*registry, SHUTDOWN_SWEEP_INTERVAL)
                .await
                .context("Keeper task failed")??
        }
    };

    relay_log.abort();
    info!(
        attempts = %report.attempts,
        last_state = %report.last_state,
        "Shutdown complete."
    );

    Ok(())
}

async fn log_frames(mut frames: UnboundedReceiver<StdioFrame>) {
    while let Some(frame) = frames.recv().await {
        let text = frame.text();
        let output = text.trim_end();
        match frame.stream {
            StdioStream::Stdout => {
                info!(identity = %frame.identity, session_id = %frame.session_id, output = %output, "Plugin stdout");
            }
            StdioStream::Stderr => {
                warn!(identity = %frame.identity, session_id = %frame.session_id, output = %output, "Plugin stderr");
            }
        }
    }
}
