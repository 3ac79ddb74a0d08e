use std::time::Duration;

use async_trait::async_trait;
use sqlx::{ConnectOptions, Connection, mysql::MySqlConnectOptions};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::config::TunnelConfig;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// End-to-end reachability check of the database through the local end of the tunnel.
/// Never fails: every problem is logged and reported as `false`.
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait Prober: Send + Sync {
    async fn probe(&self, config: &TunnelConfig) -> bool;
}

pub(crate) struct MySqlProber {
    timeout: Duration,
}

impl MySqlProber {
    pub fn new() -> Self {
        MySqlProber {
            timeout: CONNECT_TIMEOUT,
        }
    }

    async fn try_connect(&self, config: &TunnelConfig) -> Result<(), ProbeError> {
        let options = connect_options(config);
        let mut conn = tokio::time::timeout(self.timeout, options.connect())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;
        let pinged = conn.ping().await;
        // close no matter what the ping said
        let closed = conn.close().await;
        pinged?;
        closed?;
        Ok(())
    }
}

/// Targets the local end of the tunnel. A blank `DB_NAME` connects without a default schema.
fn connect_options(config: &TunnelConfig) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host("127.0.0.1")
        .port(config.local_port)
        .username(&config.db_user)
        .password(&config.db_password);
    if config.db_name.is_empty() {
        options
    } else {
        options.database(&config.db_name)
    }
}

#[async_trait]
impl Prober for MySqlProber {
    async fn probe(&self, config: &TunnelConfig) -> bool {
        tracing::info!(target: "probe", "Attempting to connect to database through the tunnel...");
        match self.try_connect(config).await {
            Ok(()) => {
                tracing::info!(target: "probe", "✅ Successfully connected to MySQL through the tunnel!");
                tracing::debug!(target: "probe", "✅ MySQL test connection closed.");
                true
            }
            Err(e) => {
                tracing::error!(target: "probe", "❌ Failed to connect to database: {e}");
                false
            }
        }
    }
}
