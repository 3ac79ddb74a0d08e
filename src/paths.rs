use std::path::{Path, PathBuf};

const STATE_FILE: &str = ".rdstunnel.state";
const LOG_FILE: &str = ".rdstunnel.log";
const CONFIG_FILE: &str = ".rdstunnel_config.json";
const KNOWN_HOSTS_FILE: &str = ".rdstunnel_known_hosts.db";

/// Fixed per-user locations of everything rdst persists.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Paths {
    /// the PID record of the running daemon
    pub state_file: PathBuf,
    pub log_file: PathBuf,
    /// configuration used when `--config-file` is not given
    pub config_file: PathBuf,
    /// TOFU store for the bastion host keys
    pub known_hosts: PathBuf,
}

impl Paths {
    pub fn from_home() -> Option<Self> {
        dirs::home_dir().map(|home| Self::rooted_at(&home))
    }

    pub fn rooted_at(dir: &Path) -> Self {
        Paths {
            state_file: dir.join(STATE_FILE),
            log_file: dir.join(LOG_FILE),
            config_file: dir.join(CONFIG_FILE),
            known_hosts: dir.join(KNOWN_HOSTS_FILE),
        }
    }

    /// the configuration file to use, honouring an explicit override
    pub fn config_file_or(&self, custom: Option<&Path>) -> PathBuf {
        custom
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config_file.clone())
    }
}

/// Expands a leading `~` against the home directory. Anything else is returned as is.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
