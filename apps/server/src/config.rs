//! Server configuration management.
//!
//! Configuration is stored as TOML at `$SLICEDROP_CONFIG`, or else:
//! - Linux: `~/.config/slicedrop/server.toml`
//! - Windows: `%APPDATA%/slicedrop/server.toml`
//!
//! `SLICEDROP_PORT` and `SLICEDROP_STORAGE_DIR` override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use slicedrop_chunk_store::MergePolicy;
use slicedrop_upload_server::DEFAULT_MAX_CHUNK_BYTES;

const CONFIG_ENV: &str = "SLICEDROP_CONFIG";
const PORT_ENV: &str = "SLICEDROP_PORT";
const STORAGE_DIR_ENV: &str = "SLICEDROP_STORAGE_DIR";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root directory for chunks and merged files.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Largest accepted request body in bytes.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// `lenient` or `strict`.
    #[serde(default)]
    pub merge_policy: MergePolicy,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    3000
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_max_chunk_bytes() -> usize {
    DEFAULT_MAX_CHUNK_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            storage_dir: default_storage_dir(),
            max_chunk_bytes: default_max_chunk_bytes(),
            merge_policy: MergePolicy::default(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found,
    /// then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(port) = var(PORT_ENV) {
            self.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {PORT_ENV} {port:?}: {e}"))?;
        }
        if let Some(dir) = var(STORAGE_DIR_ENV) {
            self.storage_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("slicedrop").join("server.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("slicedrop")
            .join("server.toml")
    }
}
