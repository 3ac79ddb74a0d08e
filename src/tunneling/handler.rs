use std::path::Path;

use crate::storage::{self, HostKeyStore};

use super::tunnel::TunnelError;
use russh::client::Handler;
use tracing::{debug, error, info};

pub(crate) struct ClientHandler {
    /// the bastion as the known hosts store names it
    host_id: String,
    storage: Box<dyn HostKeyStore>,
}
impl ClientHandler {
    pub async fn new(
        server_address: &str,
        server_port: u16,
        known_hosts: &Path,
    ) -> Result<Self, TunnelError> {
        let storage = storage::open_known_hosts(known_hosts)?;
        storage.ensure().await?;
        Ok(ClientHandler {
            host_id: storage::host_key_id(server_address, server_port),
            storage,
        })
    }
}
impl Handler for ClientHandler {
    type Error = TunnelError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let server_fingerprint = server_public_key
            .fingerprint(Default::default())
            .to_string();
        info!(target: "tunnel", "{} presented host key {}", self.host_id, server_fingerprint);

        match self.storage.lookup(&self.host_id).await {
            Ok(Some(trusted)) if trusted == server_fingerprint => {
                debug!(target: "tunnel", "host key for {} matches the trusted one", self.host_id);
                Ok(true)
            }
            Ok(Some(trusted)) => {
                error!(
                    target: "tunnel",
                    "host key for {} has changed! trusted {trusted}, got {server_fingerprint}",
                    self.host_id
                );
                Err(TunnelError::HostKeyMismatch(self.host_id.clone()))
            }
            Ok(None) => {
                // first contact, trust it
                self.storage
                    .trust(&self.host_id, &server_fingerprint)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                error!(target: "tunnel", "{e}");
                Err(TunnelError::StorageLayer(e.to_string()))
            }
        }
    }
}
