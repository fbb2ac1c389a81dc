//! Shutdown signals for long-running commands
//!
//! `forge batch` keeps reading stdin until EOF; these helpers let it stop
//! early on Ctrl+C or SIGTERM and report which one arrived.

use std::fmt;
use tokio::sync::watch;
use tracing::{info, warn};

/// Signal that ended a long-running command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C (SIGINT)
    Interrupt,
    /// SIGTERM (Unix only)
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Resolve with the first shutdown signal received
///
/// A handler that cannot be installed is logged and never fires, so a broken
/// signal setup never looks like a shutdown request.
pub async fn wait_for_shutdown() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                signal = interrupt() => signal,
                _ = term.recv() => ShutdownSignal::Terminate,
            },
            Err(e) => {
                warn!("SIGTERM handler unavailable ({}); only Ctrl+C stops forge", e);
                interrupt().await
            },
        }
    }
    #[cfg(not(unix))]
    {
        interrupt().await
    }
}

async fn interrupt() -> ShutdownSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await
    }
    ShutdownSignal::Interrupt
}

/// Spawn a task that publishes the first shutdown signal
///
/// The receiver holds `None` until a signal arrives.
pub fn shutdown_flag() -> watch::Receiver<Option<ShutdownSignal>> {
    let (tx, rx) = watch::channel(None);
    tokio::spawn(async move {
        let signal = wait_for_shutdown().await;
        info!("{} received, shutting down", signal);
        let _ = tx.send(Some(signal));
    });
    rx
}
