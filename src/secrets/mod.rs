use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::config::{self, ConfigError};

pub(crate) mod aws;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("could not fetch secret {0}: {1}")]
    Fetch(String, String),
    #[error("secret {0} has no string value")]
    NoSecretString(String),
    #[error("secret {0} is not a JSON object")]
    NotAnObject(String),
    #[error("secret {0} is not valid JSON: {1}")]
    Parse(String, serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A remote key-value store holding the connection parameters.
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait SecretStore: Send + Sync {
    async fn fetch(&self, secret_id: &str, region: &str) -> Result<Map<String, Value>, SecretError>;
}

pub(crate) fn parse_secret(secret_id: &str, secret: &str) -> Result<Map<String, Value>, SecretError> {
    match serde_json::from_str(secret) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SecretError::NotAnObject(secret_id.to_string())),
        Err(e) => Err(SecretError::Parse(secret_id.to_string(), e)),
    }
}

/// Fetches the secret and merges it into the configuration file. Returns the number of
/// keys written.
pub(crate) async fn fetch_into(
    store: &dyn SecretStore,
    secret_id: &str,
    region: &str,
    config_file: &Path,
) -> Result<usize, SecretError> {
    tracing::info!(target: "secrets", "Fetching secrets from {secret_id} in {region}...");
    let secrets = store.fetch(secret_id, region).await?;
    let count = secrets.len();
    config::merge_secrets(config_file, secrets)?;
    tracing::info!(target: "secrets", "✅ Configuration saved to {}", config_file.display());
    Ok(count)
}
