use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use cloak_content::DEFAULT_TASK_TIMEOUT;
use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

pub const DEFAULT_KEYRING_SERVICE: &str = "cloak-cli";
pub const DEFAULT_KEYRING_ACCOUNT: &str = "data-key";

/// User-level configuration loaded from `~/.config/cloak/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the managed content directory.
    pub data_dir: Option<PathBuf>,
    /// Bounded wait per encrypt/decrypt task, in seconds.
    pub task_timeout_secs: Option<u64>,
    /// OS keychain entry holding the content key.
    pub keyring: Option<KeyringConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KeyringConfig {
    pub service: Option<String>,
    pub account: Option<String>,
}

impl Config {
    pub fn task_timeout(&self) -> Duration {
        self.task_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TASK_TIMEOUT)
    }

    /// Keychain (service, account) for the content key.
    pub fn keyring_entry(&self) -> (String, String) {
        let keyring = self.keyring.clone().unwrap_or_default();
        (
            keyring
                .service
                .unwrap_or_else(|| DEFAULT_KEYRING_SERVICE.to_string()),
            keyring
                .account
                .unwrap_or_else(|| DEFAULT_KEYRING_ACCOUNT.to_string()),
        )
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("cloak").join("config.toml"))
}

/// Write `config` to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

/// Write `config` to `path`, creating parent directories; an existing file is left alone
/// so user edits are never clobbered.
pub fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
