//! Ctrl+C / SIGTERM handling.
//!
//! The first signal cancels a [`CancellationToken`]; the download engine
//! checks it between records, so the current file finishes and the seen-set
//! is still saved. A second signal exits immediately with status 130.

use tokio_util::sync::CancellationToken;

/// Exit status for a forced exit, as shells report for SIGINT.
const FORCE_EXIT_CODE: i32 = 130;

/// Spawn the signal listener and return the token it cancels.
pub(crate) fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let mut signals = Signals::new();
        let first = signals.next().await;
        tracing::info!("Received {}, finishing the current download...", first);
        tracing::info!("Press Ctrl+C again to force exit");
        handler_token.cancel();

        let second = signals.next().await;
        tracing::warn!("Received {} again, exiting", second);
        std::process::exit(FORCE_EXIT_CODE);
    });

    token
}

struct Signals {
    #[cfg(unix)]
    sigterm: Option<tokio::signal::unix::Signal>,
}

impl Signals {
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let sigterm = signal(SignalKind::terminate())
                .map_err(|e| tracing::warn!("Cannot listen for SIGTERM: {}", e))
                .ok();
            Self { sigterm }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// Wait for the next shutdown signal and return its name.
    async fn next(&mut self) -> &'static str {
        #[cfg(unix)]
        if let Some(sigterm) = self.sigterm.as_mut() {
            return tokio::select! {
                _ = ctrl_c() => "Ctrl+C",
                _ = sigterm.recv() => "SIGTERM",
            };
        }
        ctrl_c().await;
        "Ctrl+C"
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl+C: {}", e);
        // Without a listener, never resolve rather than cancel spuriously.
        std::future::pending::<()>().await;
    }
}
