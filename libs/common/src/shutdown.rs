//! Graceful shutdown
//!
//! The monitor stops on Ctrl+C, and on SIGTERM where the platform has it.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        },
        Err(e) => {
            warn!("SIGTERM handler unavailable ({}), only Ctrl+C stops the monitor", e);
            std::future::pending::<()>().await;
        },
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Wait for Ctrl+C or SIGTERM; returns the name of the signal
pub async fn wait_for_shutdown() -> &'static str {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Ctrl+C handler failed: {}", e);
            }
            "SIGINT"
        },
        _ = terminate() => "SIGTERM",
    }
}

/// Token cancelled when a shutdown signal arrives.
///
/// Must be called inside a tokio runtime.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        let signal = wait_for_shutdown().await;
        info!("{} received, shutting down", signal);
        trigger.cancel();
    });
    token
}
