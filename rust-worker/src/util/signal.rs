//! Process termination signals.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Resolve when SIGINT or SIGTERM is received.
///
/// If a handler cannot be installed the error is logged and that signal is
/// never reported.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "sigint_handler_install_failed");
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
                error!(error = %e, "sigterm_handler_install_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Cancel `token` on the first SIGINT or SIGTERM.
///
/// The signal is observed by one task for the whole process. Components wait
/// on clones of the token, and a token stays cancelled, so a component that
/// starts waiting after the signal still sees it.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
}
