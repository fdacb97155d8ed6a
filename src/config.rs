//! Application configuration: which backend to talk to and how to log.
//!
//! Settings live in `~/.music-board/config.toml`. A missing file is not an
//! error; the defaults run against a local SQLite database seeded with demo
//! data. Two environment variables point the app at the hosted service
//! without editing the file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

/// Folder name used beneath the user's home directory for application data.
const DATA_DIR_NAME: &str = ".music-board";
/// Configuration file name inside the data directory.
const CONFIG_FILE_NAME: &str = "config.toml";

pub const CONFIG_PATH_ENV: &str = "MUSIC_BOARD_CONFIG";
pub const URL_ENV: &str = "MUSIC_BOARD_URL";
pub const ANON_KEY_ENV: &str = "MUSIC_BOARD_ANON_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// The hosted database-and-auth service.
    Remote { url: String, anon_key: String },
    /// Embedded SQLite stand-in.
    Local {
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default = "default_seed_demo")]
        seed_demo: bool,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Local {
            path: None,
            seed_demo: default_seed_demo(),
        }
    }
}

fn default_seed_demo() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    /// `EnvFilter` directive; `RUST_LOG` still wins when set.
    pub log_filter: Option<String>,
    /// Where log files go; defaults to `<data dir>/logs`.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Read the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => data_dir()?.join(CONFIG_FILE_NAME),
        };

        let config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Switch to the remote backend when both the URL and the key are set.
    /// Setting only one of them is reported instead of silently ignored.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(URL_ENV).filter(|value| !value.trim().is_empty());
        let anon_key = lookup(ANON_KEY_ENV).filter(|value| !value.trim().is_empty());

        match (url, anon_key) {
            (Some(url), Some(anon_key)) => {
                self.backend = BackendConfig::Remote { url, anon_key };
            }
            (Some(_), None) => return Err(anyhow!("{URL_ENV} is set but {ANON_KEY_ENV} is not")),
            (None, Some(_)) => return Err(anyhow!("{ANON_KEY_ENV} is set but {URL_ENV} is not")),
            (None, None) => {}
        }
        Ok(self)
    }

    /// Resolve the log directory, falling back to the data directory.
    pub fn log_dir(&self) -> Result<PathBuf> {
        match &self.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("logs")),
        }
    }
}

/// `~/.music-board`, home of the config file, the local database and logs.
pub fn data_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().ok_or_else(|| anyhow!("could not locate home directory"))?;
    Ok(base_dirs.home_dir().join(DATA_DIR_NAME))
}
