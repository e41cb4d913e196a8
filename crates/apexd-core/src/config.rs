use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "/system/etc/apexd.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionsDirConfig {
    /// Mount point whose presence selects `preferred_dir`.
    #[serde(default = "default_partition_root")]
    pub partition_root: PathBuf,
    #[serde(default = "default_preferred_sessions_dir")]
    pub preferred_dir: PathBuf,
    #[serde(default = "default_fallback_sessions_dir")]
    pub fallback_dir: PathBuf,
}

impl Default for SessionsDirConfig {
    fn default() -> Self {
        Self {
            partition_root: default_partition_root(),
            preferred_dir: default_preferred_sessions_dir(),
            fallback_dir: default_fallback_sessions_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApexdConfig {
    #[serde(default = "config_version")]
    pub version: u32,
    #[serde(default)]
    pub sessions: SessionsDirConfig,
    #[serde(default = "default_hashtree_dir")]
    pub hashtree_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
struct ApexdConfigLegacy {
    #[serde(default)]
    sessions: SessionsDirConfig,
    #[serde(default = "default_hashtree_dir")]
    hashtree_dir: PathBuf,
    #[serde(default = "default_log_level")]
    log_level: String,
}

impl Default for ApexdConfig {
    fn default() -> Self {
        Self {
            version: config_version(),
            sessions: SessionsDirConfig::default(),
            hashtree_dir: default_hashtree_dir(),
            log_level: default_log_level(),
        }
    }
}

impl ApexdConfig {
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading apexd config: {}", path.display()));
            }
        };
        Self::from_toml_str(&content)
            .with_context(|| format!("failed parsing apexd config: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let value = toml::from_str::<toml::Value>(content)?;
        if value.get("version").is_some() {
            let parsed = value
                .try_into::<ApexdConfig>()
                .context("failed parsing versioned apexd config")?;
            let expected = config_version();
            if parsed.version != expected {
                anyhow::bail!(
                    "unsupported apexd config version {} (expected {})",
                    parsed.version,
                    expected
                );
            }
            return Ok(parsed);
        }

        let legacy = value
            .try_into::<ApexdConfigLegacy>()
            .context("failed parsing legacy apexd config")?;
        Ok(Self {
            version: config_version(),
            sessions: legacy.sessions,
            hashtree_dir: legacy.hashtree_dir,
            log_level: legacy.log_level,
        })
    }
}

fn config_version() -> u32 {
    1
}

fn default_partition_root() -> PathBuf {
    PathBuf::from("/metadata")
}

fn default_preferred_sessions_dir() -> PathBuf {
    PathBuf::from("/metadata/apex/sessions")
}

fn default_fallback_sessions_dir() -> PathBuf {
    PathBuf::from("/data/apex/sessions")
}

fn default_hashtree_dir() -> PathBuf {
    PathBuf::from("/data/apex/hashtree")
}

fn default_log_level() -> String {
    "info".to_string()
}
