use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sesh_store::ServerPoolConfig;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server pool for the `redis` backend.
    #[serde(default)]
    pub pool: ServerPoolConfig,
    #[serde(default)]
    pub file: FileConfig,
    #[serde(default)]
    pub module: ModuleConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub dir: Option<PathBuf>,
    pub prefix: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Comma separated `host:port` list.
    pub save_path: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("could not determine config directory")?
            .join("sesh");
        Ok(dir.join("config.toml"))
    }

    /// Load `explicit` if given (it must exist), otherwise the default
    /// location if present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Ok(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
