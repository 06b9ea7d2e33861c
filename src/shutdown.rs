use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::scheduler::JobManager;

/// Install a handler for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` cancelled on the first of either signal. If
/// the handlers can't be installed the token is simply never cancelled.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, draining job manager");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, draining job manager");
            }
        }

        token_clone.cancel();
    });

    token
}

/// Shut `manager` down once `token` is cancelled: the running job finishes,
/// queued jobs fail with `ShuttingDown`.
pub fn shutdown_on(token: CancellationToken, manager: JobManager) -> JoinHandle<()> {
    tokio::spawn(async move {
        token.cancelled().await;
        manager.shutdown().await;
    })
}
