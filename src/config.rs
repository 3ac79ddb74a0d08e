use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{
    Deserialize, Serialize,
    de::{self, Visitor},
};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_DB_PORT: u16 = 3306;
pub const DEFAULT_SSH_PORT: u16 = 22;

/// written by `config --clean`
pub const DEFAULT_TEMPLATE: &str = include_str!("../defaults.json");

/// what the tunnel itself cannot do without; database credentials only matter to the probe
const REQUIRED_KEYS: [&str; 4] = ["SSH_HOST", "SSH_USER", "SSH_PRIVATE_KEY_PATH", "DB_HOST"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("could not read {}: {}", .0.display(), .1)]
    Read(PathBuf, std::io::Error),
    #[error("could not write {}: {}", .0.display(), .1)]
    Write(PathBuf, std::io::Error),
    #[error("malformed config: {0}")]
    Parse(String),
    #[error("{} must be a JSON object", .0.display())]
    NotAnObject(PathBuf),
    #[error("missing required key {0}")]
    MissingKey(&'static str),
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

/// Everything needed to bring up the tunnel and probe the database behind it.
#[derive(Serialize, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) struct TunnelConfig {
    /// the bastion host
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub ssh_private_key_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_private_key_passphrase: Option<String>,
    /// the database host, as seen from the bastion
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    /// port bound on 127.0.0.1
    pub local_port: u16,
}

/// What the file (or the environment) actually contains, before defaults and validation.
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawConfig {
    ssh_host: Option<String>,
    ssh_port: Option<Port>,
    ssh_user: Option<String>,
    ssh_private_key_path: Option<String>,
    ssh_private_key_passphrase: Option<String>,
    db_host: Option<String>,
    db_port: Option<Port>,
    db_user: Option<String>,
    db_password: Option<String>,
    db_name: Option<String>,
    local_port: Option<Port>,
}

/// A port given either as a JSON number or as a numeric string.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Port(u16);

impl<'de> Deserialize<'de> for Port {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PortVisitor;
        impl<'de> Visitor<'de> for PortVisitor {
            type Value = Port;
            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a port number, either as an integer or as a string")
            }
            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u16::try_from(v)
                    .map(Port)
                    .map_err(|_| E::custom(format!("{v} is not a valid port")))
            }
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u16::try_from(v)
                    .map(Port)
                    .map_err(|_| E::custom(format!("{v} is not a valid port")))
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.trim()
                    .parse::<u16>()
                    .map(Port)
                    .map_err(|_| E::custom(format!("{v:?} is not a valid port")))
            }
        }
        deserializer.deserialize_any(PortVisitor)
    }
}

impl RawConfig {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = |key: &str| -> Result<Option<Port>, ConfigError> {
            lookup(key)
                .map(|v| {
                    v.trim()
                        .parse::<u16>()
                        .map(Port)
                        .map_err(|_| ConfigError::Parse(format!("{key}={v:?} is not a valid port")))
                })
                .transpose()
        };
        Ok(RawConfig {
            ssh_host: lookup("SSH_HOST"),
            ssh_port: port("SSH_PORT")?,
            ssh_user: lookup("SSH_USER"),
            ssh_private_key_path: lookup("SSH_PRIVATE_KEY_PATH"),
            ssh_private_key_passphrase: lookup("SSH_PRIVATE_KEY_PASSPHRASE"),
            db_host: lookup("DB_HOST"),
            db_port: port("DB_PORT")?,
            db_user: lookup("DB_USER"),
            db_password: lookup("DB_PASSWORD"),
            db_name: lookup("DB_NAME"),
            local_port: port("LOCAL_PORT")?,
        })
    }
}

impl TryFrom<RawConfig> for TunnelConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
            match value {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => Err(ConfigError::MissingKey(key)),
            }
        }
        Ok(TunnelConfig {
            ssh_host: required(raw.ssh_host, REQUIRED_KEYS[0])?,
            ssh_port: raw.ssh_port.map_or(DEFAULT_SSH_PORT, |p| p.0),
            ssh_user: required(raw.ssh_user, REQUIRED_KEYS[1])?,
            ssh_private_key_path: required(raw.ssh_private_key_path, REQUIRED_KEYS[2])?,
            ssh_private_key_passphrase: raw.ssh_private_key_passphrase.filter(|p| !p.is_empty()),
            db_host: required(raw.db_host, REQUIRED_KEYS[3])?,
            db_port: raw.db_port.map_or(DEFAULT_DB_PORT, |p| p.0),
            db_user: raw.db_user.unwrap_or_default(),
            db_password: raw.db_password.unwrap_or_default(),
            db_name: raw.db_name.unwrap_or_default(),
            local_port: raw.local_port.map_or(DEFAULT_DB_PORT, |p| p.0),
        })
    }
}

impl TunnelConfig {
    /// Loads the record from `path`, falling back to the process environment when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<TunnelConfig, ConfigError> {
        if path.exists() {
            tracing::info!(target: "config", "loading config from {}", path.display());
            let contents =
                std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.into(), e))?;
            let config = TunnelConfig::from_json(&contents)?;
            tracing::info!(target: "config", "config loaded: {config:?}");
            return Ok(config);
        }
        tracing::warn!(target: "config", "config file not found at {}, trying the environment", path.display());
        if std::env::var_os("SSH_HOST").is_none() {
            return Err(ConfigError::NotFound(path.into()));
        }
        let config = TunnelConfig::from_lookup(|key| std::env::var(key).ok())?;
        tracing::info!(target: "config", "config loaded from the environment: {config:?}");
        Ok(config)
    }

    pub fn from_json(contents: &str) -> Result<TunnelConfig, ConfigError> {
        let raw: RawConfig = serde_json::from_str(contents)?;
        raw.try_into()
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<TunnelConfig, ConfigError> {
        RawConfig::from_lookup(lookup)?.try_into()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("ssh_host", &self.ssh_host)
            .field("ssh_port", &self.ssh_port)
            .field("ssh_user", &self.ssh_user)
            .field("ssh_private_key_path", &self.ssh_private_key_path)
            .field(
                "ssh_private_key_passphrase",
                &self.ssh_private_key_passphrase.as_ref().map(|_| "********"),
            )
            .field("db_host", &self.db_host)
            .field("db_port", &self.db_port)
            .field("db_user", &self.db_user)
            .field("db_password", &"********")
            .field("db_name", &self.db_name)
            .field("local_port", &self.local_port)
            .finish()
    }
}

/// Raw contents of the configuration file, for `config --show`.
pub(crate) fn show(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.into()));
    }
    std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.into(), e))
}

/// Overwrites the configuration file with the built-in template.
pub(crate) fn reset_to_default(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, DEFAULT_TEMPLATE).map_err(|e| ConfigError::Write(path.into(), e))
}

/// Merges `secrets` over whatever object the file already holds and writes it back.
/// Keys present in both take the secret's value.
pub(crate) fn merge_secrets(path: &Path, secrets: Map<String, Value>) -> Result<(), ConfigError> {
    let mut merged = if path.exists() {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.into(), e))?;
        if contents.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(&contents)? {
                Value::Object(map) => map,
                _ => return Err(ConfigError::NotAnObject(path.into())),
            }
        }
    } else {
        Map::new()
    };
    merged.extend(secrets);
    let rendered = serde_json::to_string_pretty(&Value::Object(merged))?;
    std::fs::write(path, rendered).map_err(|e| ConfigError::Write(path.into(), e))
}
