use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel the returned token on SIGTERM or SIGINT.
///
/// Units still waiting for deletion or admission give up with `Cancelled`;
/// a submit already in flight is allowed to finish.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, cancelling pending submissions");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, cancelling pending submissions");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
