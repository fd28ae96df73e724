use pgmi_core::{CancelReason, CancelToken};
use tokio::task::JoinHandle;
use tracing::warn;

/// Cancels `cancel` on Ctrl-C or SIGTERM. Abort the handle once the run is over.
pub fn spawn_watcher(cancel: CancelToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        warn!("Interrupt received, cancelling");
        cancel.cancel(CancelReason::Interrupted);
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!("Cannot listen for SIGTERM: {}", err);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
}
