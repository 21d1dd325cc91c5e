//! Graceful shutdown
//!
//! Ctrl+C and SIGTERM (Unix) end a service. Long-running loops take a
//! [`CancellationToken`] from [`shutdown_token`] instead of awaiting the
//! signal themselves.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Which signal ended the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix
pub async fn wait_for_shutdown() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("SIGTERM handler not installed ({}), only Ctrl+C stops the service", e);
                None
            },
        };

        return tokio::select! {
            _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
            _ = async {
                match term_signal.as_mut() {
                    Some(sig) => { sig.recv().await; },
                    None => std::future::pending::<()>().await,
                }
            } => ShutdownSignal::Terminate,
        };
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl+C listener failed: {}", e);
        }
        ShutdownSignal::Interrupt
    }
}

/// Token cancelled when a shutdown signal arrives
///
/// Must be called inside a Tokio runtime; the listener runs as a spawned task.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    cancel_on_shutdown(token.clone());
    token
}

/// Cancel `token` when a shutdown signal arrives, unless it is cancelled first
pub fn cancel_on_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {},
            signal = wait_for_shutdown() => {
                info!("{} received, shutting down", signal);
                token.cancel();
            }
        }
    });
}
