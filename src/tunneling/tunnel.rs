use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use russh::{
    Disconnect, client,
    keys::{PrivateKey, PrivateKeyWithHashAlg, load_secret_key},
};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::{config::TunnelConfig, paths::expand_tilde, tunneling::handler::ClientHandler};

use super::forwarder::Forwarder;

const LOCAL_INTERFACE: &str = "127.0.0.1";
const LIVENESS_TICK: Duration = Duration::from_secs(1);
const KEEPALIVE: Duration = Duration::from_secs(30);

pub(crate) struct Tunnel {
    /// public address of the bastion
    remote_ssh_address: String,
    /// bastion ssh port
    remote_ssh_port: u16,
    /// the ssh user
    remote_ssh_user: String,
    /// private key for connecting to the bastion
    private_key: Arc<PrivateKey>,
    /// port bound on 127.0.0.1
    local_port: u16,
    /// where the bastion should connect each forwarded channel to
    forwarder: Forwarder,
    /// sqlite database holding the trusted host keys
    known_hosts: PathBuf,
}
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("io error: {1}")]
    Io(std::io::Error, String),
    #[error("private key error: {1}")]
    PrivateKey(russh::keys::Error, String),
    #[error("ssh error: {0}")]
    Ssh(String),
    #[error("public key authentication refused for {0}")]
    AuthenticationFailed(String),
    #[error("host key for {0} does not match the stored one")]
    HostKeyMismatch(String),
    #[error("known hosts store error: {0}")]
    StorageLayer(String),
    #[error("the ssh session is no longer active")]
    SessionClosed,
    #[error("invalid worker input: {0}")]
    Config(String),
}
impl From<std::io::Error> for TunnelError {
    fn from(value: std::io::Error) -> Self {
        let str = value.to_string();
        Self::Io(value, str)
    }
}
impl From<russh::keys::Error> for TunnelError {
    fn from(value: russh::keys::Error) -> Self {
        let str_val = value.to_string();
        Self::PrivateKey(value, str_val)
    }
}
impl From<russh::Error> for TunnelError {
    fn from(value: russh::Error) -> Self {
        Self::Ssh(value.to_string())
    }
}

impl Tunnel {
    pub fn new(config: &TunnelConfig, known_hosts: &Path) -> Result<Tunnel, TunnelError> {
        let private_key = Tunnel::load_private_key(
            &config.ssh_private_key_path,
            config.ssh_private_key_passphrase.as_deref(),
        )?;
        Ok(Tunnel {
            remote_ssh_address: config.ssh_host.clone(),
            remote_ssh_port: config.ssh_port,
            remote_ssh_user: config.ssh_user.clone(),
            private_key: Arc::new(private_key),
            local_port: config.local_port,
            forwarder: Forwarder::new(&config.db_host, config.db_port),
            known_hosts: known_hosts.to_path_buf(),
        })
    }

    async fn connect(&self) -> Result<client::Handle<ClientHandler>, TunnelError> {
        let config = client::Config {
            keepalive_interval: Some(KEEPALIVE),
            ..Default::default()
        };
        let handler = ClientHandler::new(
            &self.remote_ssh_address,
            self.remote_ssh_port,
            &self.known_hosts,
        )
        .await?;
        let mut session = client::connect(
            Arc::new(config),
            (self.remote_ssh_address.to_owned(), self.remote_ssh_port),
            handler,
        )
        .await?;
        let hash_alg = session.best_supported_rsa_hash().await?.flatten();
        let auth_res = session
            .authenticate_publickey(
                self.remote_ssh_user.clone(),
                PrivateKeyWithHashAlg::new(self.private_key.clone(), hash_alg),
            )
            .await?;
        if !auth_res.success() {
            return Err(TunnelError::AuthenticationFailed(
                self.remote_ssh_user.clone(),
            ));
        }
        Ok(session)
    }

    /// Establishes the session and serves the local port until `shutdown` resolves or
    /// the session dies. There is no reconnection: any failure ends the tunnel.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), TunnelError> {
        tokio::pin!(shutdown);
        // an unreachable bastion can keep us in the handshake for a long time
        let session = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(target: "tunnel", "stopped before the ssh session was established");
                return Ok(());
            }
            session = self.connect() => Arc::new(session?),
        };
        let listener = TcpListener::bind((LOCAL_INTERFACE, self.local_port)).await?;
        tracing::info!(
            target: "tunnel",
            "SSH tunnel started on localhost:{} -> {}:{} via {}:{}",
            self.local_port,
            self.forwarder.addr(),
            self.forwarder.port(),
            self.remote_ssh_address,
            self.remote_ssh_port
        );

        let mut liveness = tokio::time::interval(LIVENESS_TICK);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(target: "tunnel", "shutting down the ssh session");
                    session
                        .disconnect(Disconnect::ByApplication, "rdst tunnel stopped", "en")
                        .await?;
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!(target: "tunnel", "incoming connection: {peer}");
                    let forwarder = self.forwarder.clone();
                    let session = session.clone();
                    tokio::spawn(async move {
                        match forwarder.run(&session, stream, peer).await {
                            Ok((sent, received)) => tracing::debug!(
                                target: "tunnel",
                                "connection from {peer} closed ({sent} bytes sent, {received} received)"
                            ),
                            Err(e) => tracing::warn!(target: "tunnel", "connection from {peer} failed: {e}"),
                        }
                    });
                }
                _ = liveness.tick() => {
                    if session.is_closed() {
                        return Err(TunnelError::SessionClosed);
                    }
                }
            }
        }
    }

    fn load_private_key(
        key_path: &str,
        passphrase: Option<&str>,
    ) -> Result<PrivateKey, TunnelError> {
        Ok(load_secret_key(expand_tilde(key_path), passphrase)?)
    }
}
