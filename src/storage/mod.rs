use std::path::Path;

use async_trait::async_trait;
use local::SqliteHostKeys;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::tunneling::tunnel::TunnelError;
pub(crate) mod local;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite returned an error: {1}")]
    LocalSqlite(rusqlite::Error, String),
    #[error("known hosts store is poisoned")]
    Poisoned,
}

/// Fingerprints of the bastions we have connected to, trusted on first use.
/// Hosts are keyed the way OpenSSH writes them: `host` on port 22, `[host]:port` otherwise.
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait HostKeyStore: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Option<String>, StorageError>;
    async fn trust(&self, host: &str, fingerprint: &str) -> Result<(), StorageError>;
    /// creates the backing table if needed
    async fn ensure(&self) -> Result<(), StorageError>;
}

pub(crate) fn host_key_id(address: &str, port: u16) -> String {
    if port == 22 {
        address.to_string()
    } else {
        format!("[{address}]:{port}")
    }
}

pub fn open_known_hosts(known_hosts: &Path) -> Result<Box<dyn HostKeyStore>, TunnelError> {
    Ok(Box::new(SqliteHostKeys::open(known_hosts)?))
}

impl From<StorageError> for TunnelError {
    fn from(err: StorageError) -> Self {
        TunnelError::StorageLayer(err.to_string())
    }
}
