//! Signal handling for graceful shutdown.

use tracing::{info, warn};

/// Wait for a shutdown signal (SIGINT or SIGTERM on Unix, Ctrl-C elsewhere).
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "failed to install signal handlers; graceful shutdown disabled");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {
            info!(signal = "SIGINT", "signal received, shutting down");
        }
        _ = sigterm.recv() => {
            info!(signal = "SIGTERM", "signal received, shutting down");
        }
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(signal = "ctrl_c", "signal received, shutting down"),
        Err(e) => {
            warn!(error = %e, "failed to listen for ctrl-c; graceful shutdown disabled");
            std::future::pending::<()>().await;
        }
    }
}
