//! Server assembly: config → orchestrator → communicator, plus shutdown.

use std::sync::Arc;

use anyhow::Context;
use hippogym_core::experiment::ExperimentFactory;
use tokio_util::sync::CancellationToken;

use crate::communicator::Communicator;
use crate::config::ServerConfig;
use crate::orchestrator::HippoGym;

/// Build the orchestrator and the WebSocket front end from `config`.
pub fn build(
    config: &ServerConfig,
    factory: Arc<dyn ExperimentFactory>,
    cancel: CancellationToken,
) -> anyhow::Result<(Arc<HippoGym>, Communicator)> {
    let trial_config = config
        .check(factory.as_ref())
        .context("invalid trial configuration")?;
    let addr = config.addr().context("invalid listen address")?;
    let gym = Arc::new(
        HippoGym::new(trial_config, factory, config.recording.clone())
            .context("failed to build orchestrator")?,
    );
    let communicator = Communicator::new(addr, Arc::clone(&gym), cancel)
        .with_max_connections(config.server.max_connections)
        .with_allowed_origins(config.server.allowed_origins.clone());
    Ok((gym, communicator))
}

/// Serve until ctrl-c / SIGTERM, then abort every live trial.
pub async fn run(config: ServerConfig, factory: Arc<dyn ExperimentFactory>) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let (gym, communicator) = build(&config, factory, cancel.clone())?;
    let (listener, local_addr) = communicator
        .bind()
        .await
        .with_context(|| format!("failed to bind {}:{}", config.server.host, config.server.port))?;
    tracing::info!(
        addr = %local_addr,
        arms = gym.config().arm_count(),
        recording = ?config.recording.dir,
        "hippogym server starting"
    );

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        let result = communicator.serve(listener).await;
        server_cancel.cancel();
        result
    });

    tokio::select! {
        () = shutdown_signal() => {}
        () = cancel.cancelled() => {
            tracing::warn!("server exited unexpectedly");
        }
    }
    cancel.cancel();

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "ws server error"),
        Err(e) => tracing::error!(error = %e, "ws server task failed"),
    }
    let stopped = gym.stop_all();
    tracing::info!(stopped, "hippogym server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
