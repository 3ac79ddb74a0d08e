use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{config::TunnelConfig, daemon::signals::Shutdown};

use super::tunnel::{Tunnel, TunnelError};

/// Entry point of the tunnel worker process. The supervisor writes the configuration
/// record as JSON on our stdin and closes it; we then hold the tunnel open until we are
/// told to stop or the session fails.
pub(crate) async fn run(
    known_hosts: &Path,
    mut input: impl AsyncRead + Unpin,
) -> Result<(), TunnelError> {
    let mut payload = String::new();
    input.read_to_string(&mut payload).await?;
    let config =
        TunnelConfig::from_json(&payload).map_err(|e| TunnelError::Config(e.to_string()))?;

    let mut shutdown = Shutdown::install()?;
    let tunnel = Tunnel::new(&config, known_hosts)?;
    tunnel
        .run(async move {
            let reason = shutdown.recv().await;
            tracing::info!(target: "tunnel", "worker {reason}, closing the tunnel");
        })
        .await
}
