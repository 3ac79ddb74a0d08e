use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_secretsmanager::{Client, error::DisplayErrorContext};
use serde_json::{Map, Value};

use super::{SecretError, SecretStore, parse_secret};

/// AWS Secrets Manager, with credentials from the default provider chain.
pub(crate) struct AwsSecretsManager;

#[async_trait]
impl SecretStore for AwsSecretsManager {
    async fn fetch(&self, secret_id: &str, region: &str) -> Result<Map<String, Value>, SecretError> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let client = Client::new(&sdk_config);
        let output = client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| {
                SecretError::Fetch(secret_id.to_string(), DisplayErrorContext(&e).to_string())
            })?;
        let secret = output
            .secret_string()
            .ok_or_else(|| SecretError::NoSecretString(secret_id.to_string()))?;
        parse_secret(secret_id, secret)
    }
}
