// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Companion: device agent bridging a remote document store to local
// printers and a USB scale.
//
// Entry point.  Parses flags, initialises logging, then either runs one
// diagnostic command or runs the agent until Ctrl-C or SIGTERM.

mod commands;
mod local_config;
mod test_page;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use companion_agent::{Agent, AgentDeps, RemoteLogLayer, RemoteLogSink};
use companion_core::config::{AgentConfig, default_config_dir};
use companion_core::error::CompanionError;
use companion_devices::{CommandPrintBackend, JavaPrinterTools, JavaScaleTools, SystemHost};
use companion_store::{DeadlineStore, DocumentStore, FirestoreConfig, FirestoreStore, MemoryStore};

/// Queue depth of the remote log layer before records are dropped.
const REMOTE_LOG_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "companion", version)]
#[command(about = "Companion device agent: remote print and scale jobs for this machine")]
struct Cli {
    /// List the printers and trays visible to this machine, then exit
    #[arg(long)]
    list_printers: bool,

    /// Read the attached scale once, then exit
    #[arg(long)]
    read_scales: bool,

    /// Show the agent id and host details, then exit
    #[arg(long)]
    info: bool,

    /// Print a one-page test document on PRINTER, then exit
    #[arg(long, value_name = "PRINTER")]
    print_test_page: Option<String>,

    /// Run against an in-process store instead of Firestore
    #[arg(long)]
    offline: bool,

    /// Directory holding config.json and the helper tools
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Local server port
    #[arg(long)]
    port: Option<u16>,

    /// Firestore project id
    #[arg(long, env = "COMPANION_FIRESTORE_PROJECT")]
    firestore_project: Option<String>,

    /// Bearer token for the Firestore REST API
    #[arg(long, env = "COMPANION_FIRESTORE_TOKEN", hide_env_values = true)]
    firestore_token: Option<String>,

    /// Override the Firestore REST endpoint (emulators)
    #[arg(long, value_name = "URL")]
    firestore_url: Option<String>,
}

impl Cli {
    fn runs_agent(&self) -> bool {
        !(self.list_printers || self.read_scales || self.info || self.print_test_page.is_some())
    }

    fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig {
            config_dir: self.config_dir.clone().unwrap_or_else(default_config_dir),
            ..AgentConfig::default()
        };
        if let Some(port) = self.port {
            config.server_port = port;
        }
        config
    }

    fn store(&self) -> Result<Arc<dyn DocumentStore>, CompanionError> {
        if self.offline {
            info!("running against the in-memory store");
            return Ok(Arc::new(MemoryStore::new()));
        }
        let project = self.firestore_project.clone().ok_or_else(|| {
            CompanionError::Config(
                "no Firestore project: pass --firestore-project, set COMPANION_FIRESTORE_PROJECT, or use --offline".into(),
            )
        })?;
        let mut firestore = FirestoreConfig::new(project);
        firestore.token = self.firestore_token.clone();
        if let Some(url) = &self.firestore_url {
            firestore.base_url = url.trim_end_matches('/').to_string();
        }
        Ok(Arc::new(FirestoreStore::new(firestore)?))
    }
}

/// fmt output filtered by `RUST_LOG` (default `info`), plus the remote log
/// layer when the agent runs.
fn init_logging(remote: Option<RemoteLogLayer>) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(remote)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = cli.agent_config();

    if !cli.runs_agent() {
        init_logging(None);
        if cli.list_printers {
            commands::list_printers(&config).await?;
        }
        if cli.read_scales {
            commands::read_scales(&config).await?;
        }
        if cli.info {
            let app_id = local_config::load_or_create_app_id(&config.config_dir)?;
            commands::show_info(&config, &app_id).await?;
        }
        if let Some(printer) = &cli.print_test_page {
            let app_id = local_config::load_or_create_app_id(&config.config_dir)?;
            commands::print_test_page(&config, &app_id, printer).await?;
        }
        return Ok(());
    }

    let (remote_layer, remote_sink) = RemoteLogLayer::new(REMOTE_LOG_CAPACITY);
    init_logging(Some(remote_layer));
    info!(version = companion_core::AGENT_VERSION, "Companion starting");

    let app_id = local_config::load_or_create_app_id(&config.config_dir)?;
    let store = cli.store()?;
    run_agent(config, &app_id, store, remote_sink).await?;
    Ok(())
}

async fn run_agent(
    config: AgentConfig,
    app_id: &str,
    store: Arc<dyn DocumentStore>,
    remote_sink: RemoteLogSink,
) -> Result<(), CompanionError> {
    let log_store: Arc<dyn DocumentStore> =
        Arc::new(DeadlineStore::new(store.clone(), config.store_timeout()));
    remote_sink.spawn(log_store, config.logs_path(app_id));

    let deps = AgentDeps {
        store,
        print_backend: Arc::new(CommandPrintBackend::for_host(
            &config.config_dir,
            config.backend_timeout(),
        )),
        scale_backend: Arc::new(JavaScaleTools::new(&config.config_dir, config.backend_timeout())),
        enumerator: Arc::new(JavaPrinterTools::new(&config.config_dir, config.backend_timeout())),
        host: Arc::new(SystemHost::default()),
    };

    let agent = Agent::initialise(config, app_id, deps).await?;
    agent.start().await?;
    info!(agent = app_id, "Companion running, press Ctrl-C to stop");

    shutdown_signal()?.await?;
    info!("shutdown requested");
    agent.stop().await?;
    Ok(())
}

/// Resolves on the first Ctrl-C, or SIGTERM on unix.  Handlers are installed
/// before this returns.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = std::io::Result<()>>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => {
                info!("received SIGTERM");
                Ok(())
            }
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = std::io::Result<()>>> {
    Ok(tokio::signal::ctrl_c())
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn sigterm_requests_shutdown() {
        let shutdown = shutdown_signal().unwrap();
        let status = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), shutdown)
            .await
            .expect("SIGTERM did not resolve the shutdown future")
            .unwrap();
    }
}
