mod api;
mod cli;
mod client;
mod config;
mod engine;
mod error;
mod intake;
mod processor;
mod registry;
mod storage;
mod ui;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use api::AppState;
use cli::{Cli, Command};
use client::{ClientError, IntakeClient};
use config::IntakeConfig;
use engine::{Engine, EngineConfig};
use intake::{FetchOutcome, Intake};
use registry::{JobId, JobState, JobSummary, Registry};
use storage::{ArtifactStore, LocalStore};
use ui::JobProgress;

/// How long in-flight jobs get to finish after the server stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Status polling interval for `submit --wait`.
const WAIT_POLL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config =
        IntakeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Serve {
            host,
            port,
            workers,
            data_dir,
        } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            config.validate().context("invalid configuration")?;
            serve(config).await
        }
        Command::Submit {
            file,
            server,
            wait,
            output,
        } => submit(&server, &file, wait, output.as_deref()).await,
        Command::Status { id, server } => {
            let client = IntakeClient::new(&server)?;
            let summary = client.status(id).await?;
            ui::print_summary(&summary);
            Ok(())
        }
        Command::Fetch { id, output, server } => {
            let client = IntakeClient::new(&server)?;
            fetch(&client, id, &output).await
        }
        Command::Config => {
            print!(
                "{}",
                toml::to_string_pretty(&config).context("failed to render configuration")?
            );
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "intake=debug,tower_http=debug"
    } else {
        "intake=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn serve(config: IntakeConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        processor = %config.processor,
        "Loaded configuration"
    );

    let registry = Arc::new(
        Registry::open(&config.jobs_dir()).context("failed to open the job registry")?,
    );
    let store: Arc<dyn ArtifactStore> = Arc::new(
        LocalStore::new(config.artifacts_dir()).context("failed to open artifact storage")?,
    );
    let processor = processor::from_name(&config.processor, config.repeat_times)
        .with_context(|| format!("unknown processor '{}'", config.processor))?;

    let cancel = CancellationToken::new();
    let engine = Engine::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        processor,
        EngineConfig::from_config(&config),
    )
    .start(cancel.clone());

    let intake = Intake::new(
        registry,
        store,
        config.storage_retry(),
        config.max_upload_bytes,
    );
    let app = api::build_router(
        AppState {
            intake: Arc::new(intake),
        },
        Duration::from_secs(config.request_timeout_secs),
    );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server stopped accepting connections, draining workers");
    engine.shutdown(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn submit(
    server: &str,
    file: &Path,
    wait: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let filename = file.file_name().and_then(|name| name.to_str());

    let client = IntakeClient::new(server)?;
    let id = client.submit(bytes, filename).await?;
    println!("{id}");

    if !wait && output.is_none() {
        return Ok(());
    }

    let summary = wait_for(&client, id, filename.unwrap_or("upload")).await?;
    match (summary.state, output) {
        (JobState::Completed, Some(output)) => fetch(&client, id, output).await,
        (JobState::Failed, _) => bail!("job {id} failed"),
        _ => Ok(()),
    }
}

/// Poll until the job is terminal, showing a spinner.
async fn wait_for(client: &IntakeClient, id: JobId, label: &str) -> anyhow::Result<JobSummary> {
    let progress = JobProgress::start(label);
    loop {
        match client.status(id).await {
            Ok(summary) if summary.state.is_terminal() => {
                progress.finish(&summary);
                return Ok(summary);
            }
            Ok(summary) => progress.update(&summary),
            Err(ClientError::Unavailable { retry_after_secs }) => {
                progress.warn(&format!(
                    "server unavailable, retrying in {retry_after_secs}s"
                ));
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                continue;
            }
            Err(e) => {
                progress.abandon();
                return Err(e.into());
            }
        }
        tokio::time::sleep(WAIT_POLL).await;
    }
}

async fn fetch(client: &IntakeClient, id: JobId, output: &Path) -> anyhow::Result<()> {
    match client.fetch(id).await? {
        FetchOutcome::Ready { bytes, filename } => {
            tokio::fs::write(output, &bytes)
                .await
                .with_context(|| format!("failed to write {}", output.display()))?;
            tracing::debug!(suggested = ?filename, "Result downloaded");
            println!("Wrote {} bytes to {}", bytes.len(), output.display());
            Ok(())
        }
        FetchOutcome::Pending(state) => bail!("job {id} is still {state}"),
        FetchOutcome::Failed(reason) => bail!("job {id} failed: {reason}"),
    }
}
