//! Worker entry point.

use tokio::signal;
use tokio::sync::watch;
use worker::{App, Config, telemetry};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, draining workers");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, draining workers");
        }
    }
}

async fn start() -> worker::Result<()> {
    let config = Config::from_env()?;
    telemetry::init_tracing(config.log_format)?;
    telemetry::install_metrics(&config.metrics_addr)?;

    let app = App::connect(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(app.run(shutdown_rx));

    shutdown_signal().await;
    // Receivers only go away once every worker has stopped.
    let _ = shutdown_tx.send(true);

    if let Err(e) = running.await {
        tracing::error!(error = %e, "Worker pool panicked");
    }
    tracing::info!("worker shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = start().await {
        // The subscriber may not be installed yet.
        eprintln!("worker failed to start: {e}");
        tracing::error!(error = %e, "worker failed to start");
        std::process::exit(1);
    }
}
