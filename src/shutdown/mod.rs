//! Process signal handling shared by the chat server and the notifier.
//!
//! Shutdown is fanned out over a `broadcast::Sender<()>`. Long-running loops
//! subscribe and stop at their next check; live chat sessions are not told and
//! end when the HTTP server drops their connections.

use tokio::signal;
use tokio::sync::broadcast;

/// Resolve on Ctrl+C or, on unix, SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

/// Wait for a signal, then notify every subscriber of `shutdown_tx`.
pub async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    wait_for_signal().await;
    // No receivers left just means everything already stopped.
    let _ = shutdown_tx.send(());
}
