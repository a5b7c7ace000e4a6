//! taskgate server entry point.
//!
//! Binary name: `taskgate`
//!
//! `serve` loads configuration and manifests, starts the Task and trigger
//! controllers, and serves webhooks until Ctrl+C or SIGTERM. `validate`
//! checks manifests offline.

mod cli;
mod http;
mod state;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use taskgate_core::webhook::FilterEngine;
use taskgate_infra::config::{load_global_config, DEFAULT_CONFIG_FILE};
use taskgate_infra::manifest::{load_manifests, Manifest};
use taskgate_observe::{init_tracing, shutdown_tracing};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, ServeArgs};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let otel = matches!(&cli.command, Commands::Serve(args) if args.otel);
    init_tracing(cli.log_format, otel, cli.log_directive())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Validate { path } => validate(&path).await,
    };

    shutdown_tracing();
    result
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = load_global_config(&config_path).await;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let state = AppState::init(
        config,
        args.manifests.as_deref(),
        !args.no_env_secrets,
        args.simulate_runtime.map(Duration::from_secs),
    )
    .await?;

    let cancel = CancellationToken::new();
    let mut controllers = JoinSet::new();
    controllers.spawn(state.task_controller().run(cancel.clone()));
    controllers.spawn(state.trigger_controller().run(cancel.clone()));

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        webhook_base = %state.config.server.base_url(),
        workers = state.config.controller.workers,
        "taskgate listening"
    );

    let router = http::router::build_router(state);
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // Stop the controllers even when the server itself failed.
    cancel.cancel();
    while let Some(joined) = controllers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "controller task panicked");
        }
    }
    tracing::info!("taskgate stopped");
    served.map_err(Into::into)
}

/// Parse manifests and check every trigger's spec and filters.
async fn validate(path: &Path) -> anyhow::Result<()> {
    let manifests = load_manifests(path).await?;
    let filters = FilterEngine::new();
    let mut problems = 0usize;

    for manifest in &manifests {
        let errors = match manifest {
            Manifest::WebhookTrigger(trigger) => {
                let mut errors = Vec::new();
                if let Err(e) = trigger.spec.validate() {
                    errors.push(e.to_string());
                }
                let rule_filters = trigger.spec.rules.iter().map(|r| r.filter.as_str());
                for source in std::iter::once(trigger.spec.filter.as_str()).chain(rule_filters) {
                    // Blank filters accept everything and are never compiled.
                    if source.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = filters.compile(source) {
                        errors.push(format!("filter '{source}': {e}"));
                    }
                }
                errors
            }
            _ => Vec::new(),
        };

        if errors.is_empty() {
            println!("  ok    {}", manifest.describe());
        } else {
            problems += errors.len();
            for error in errors {
                println!("  error {}: {error}", manifest.describe());
            }
        }
    }

    println!();
    println!("  {} object(s), {problems} problem(s)", manifests.len());
    if problems > 0 {
        anyhow::bail!("{problems} problem(s) found in {}", path.display());
    }
    Ok(())
}

/// Wait for Ctrl+C, SIGTERM or cancellation, then cancel everything else.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => {},
    }
    tracing::info!("shutdown requested");
    cancel.cancel();
}
