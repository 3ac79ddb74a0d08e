use std::net::SocketAddr;

use russh::client;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use super::{handler::ClientHandler, tunnel::TunnelError};

/// Carries one local connection to the database through its own `direct-tcpip` channel.
#[derive(Clone)]
pub(super) struct Forwarder {
    to_addr: String,
    to_port: u16,
}

impl Forwarder {
    pub fn new(to_addr: &str, to_port: u16) -> Self {
        Forwarder {
            to_addr: to_addr.to_string(),
            to_port,
        }
    }
    pub fn addr(&self) -> &str {
        &self.to_addr
    }
    pub fn port(&self) -> u16 {
        self.to_port
    }
    pub async fn run(
        &self,
        session: &client::Handle<ClientHandler>,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(u64, u64), TunnelError> {
        let channel = session
            .channel_open_direct_tcpip(
                self.to_addr.clone(),
                u32::from(self.to_port),
                peer.ip().to_string(),
                u32::from(peer.port()),
            )
            .await?;
        pipe(stream, channel.into_stream()).await
    }
}

/// Copies both ways until either side closes; returns (sent, received) byte counts.
async fn pipe<L, R>(mut local: L, mut remote: R) -> Result<(u64, u64), TunnelError>
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    Ok(tokio::io::copy_bidirectional(&mut local, &mut remote).await?)
}
