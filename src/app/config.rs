use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::CompactionPolicy;
use crate::constants::{
    APP_NAME, DEFAULT_COMPACTION_MAX_LOG_RATIO, DEFAULT_COMPACTION_MIN_LOG_LINES,
    DEFAULT_INDEX_FILE_NAME, DEFAULT_LOG_LEVEL, ENV_PREFIX, LOCAL_CONFIG_PATH,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Where the index lives
    #[serde(default)]
    pub cache: CacheConfig,

    /// Automatic log compaction
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Default log filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            compaction: CompactionConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Cache location settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Cache directory (defaults to the platform cache dir)
    pub dir: Option<PathBuf>,
    /// File name of the index inside the cache directory
    pub index_file_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            index_file_name: DEFAULT_INDEX_FILE_NAME.to_string(),
        }
    }
}

/// Compaction settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompactionConfig {
    pub enabled: bool,
    pub min_log_lines: usize,
    pub max_log_ratio: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_log_lines: DEFAULT_COMPACTION_MIN_LOG_LINES,
            max_log_ratio: DEFAULT_COMPACTION_MAX_LOG_RATIO,
        }
    }
}

impl From<&CompactionConfig> for CompactionPolicy {
    fn from(config: &CompactionConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_log_lines: config.min_log_lines,
            max_log_ratio: config.max_log_ratio,
        }
    }
}

impl Config {
    /// Full path of the index file
    pub fn index_path(&self) -> Result<PathBuf> {
        let dir = match &self.cache.dir {
            Some(dir) => dir.clone(),
            None => get_cache_dir()?,
        };
        Ok(dir.join(&self.cache.index_file_name))
    }

    pub fn compaction_policy(&self) -> CompactionPolicy {
        CompactionPolicy::from(&self.compaction)
    }
}

/// Load configuration from multiple sources
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    if let Some(path) = explicit {
        // An explicitly named file has to exist
        if !path.exists() {
            anyhow::bail!("Configuration file {} does not exist", path.display());
        }
        figment = figment.merge(Toml::file(path));
    } else {
        let global_config = get_config_dir()?.join("config.toml");
        if global_config.exists() {
            figment = figment.merge(Toml::file(&global_config));
        }
        let local_config = PathBuf::from(LOCAL_CONFIG_PATH);
        if local_config.exists() {
            figment = figment.merge(Toml::file(&local_config));
        }
    }

    // Environment variables (CACHE_INDEX_ prefix, `__` for nesting)
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment
        .extract()
        .context("Failed to load configuration")
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

fn home_dir() -> Result<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .context("Could not determine home directory")
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    match project_dirs() {
        Some(dirs) => Ok(dirs.config_dir().to_path_buf()),
        None => Ok(home_dir()?.join(".config").join(APP_NAME)),
    }
}

/// Get the default cache directory (~/.cache/cache-index on Linux)
pub fn get_cache_dir() -> Result<PathBuf> {
    match project_dirs() {
        Some(dirs) => Ok(dirs.cache_dir().to_path_buf()),
        None => Ok(home_dir()?.join(".cache").join(APP_NAME)),
    }
}

/// Save configuration to file
pub fn save_config(config: &Config, path: Option<PathBuf>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p,
        None => get_config_dir()?.join("config.toml"),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(path)
}

/// Create a default configuration file if it doesn't exist, returns its path
pub fn init_config() -> Result<Option<PathBuf>> {
    let config_file = get_config_dir()?.join("config.toml");
    if config_file.exists() {
        return Ok(None);
    }
    save_config(&Config::default(), Some(config_file)).map(Some)
}
