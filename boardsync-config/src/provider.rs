//! Configuration provider using figment

use crate::error::{ConfigError, ConfigResult};
use crate::types::SyncConfig;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Project directory searched for a configuration file
pub const CONFIG_DIR: &str = ".boardsync";

/// File name (without extension) of the discovered configuration file
pub const CONFIG_FILE_STEM: &str = "boardsync";

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "BOARDSYNC_";

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Extensions probed during discovery, in priority order
    const DISCOVERY_ORDER: [(&'static str, ConfigFormat); 4] = [
        ("toml", ConfigFormat::Toml),
        ("yaml", ConfigFormat::Yaml),
        ("yml", ConfigFormat::Yaml),
        ("json", ConfigFormat::Json),
    ];

    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::DISCOVERY_ORDER
            .iter()
            .find(|(candidate, _)| *candidate == ext)
            .map(|(_, format)| *format)
    }
}

/// Configuration provider
///
/// No caching is performed; every [`load`](Self::load) reads the sources again.
#[derive(Debug, Clone, Default)]
pub struct ConfigProvider {
    search_root: Option<PathBuf>,
    files: Vec<PathBuf>,
}

impl ConfigProvider {
    /// Create a provider that discovers configuration relative to the current directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover `.boardsync/` under `root` instead of the current directory
    pub fn with_search_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_root = Some(root.into());
        self
    }

    /// Merge an explicit configuration file after the discovered one
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Load and validate the configuration
    pub fn load(&self) -> ConfigResult<SyncConfig> {
        let config: SyncConfig = self.build_figment()?.extract()?;
        config.validate()?;
        debug!(
            timeout_ms = config.timeout_ms,
            max_retries = config.retry.max_retries,
            "loaded sync configuration"
        );
        Ok(config)
    }

    /// Build the figment with all sources in precedence order
    fn build_figment(&self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(SyncConfig::default()));

        if let Some(discovered) = self.discover() {
            trace!("merging discovered config file {}", discovered.display());
            figment = figment.merge(Self::file_provider(&discovered)?);
        }

        for path in &self.files {
            if !path.is_file() {
                return Err(ConfigError::FileNotFound { path: path.clone() });
            }
            trace!("merging config file {}", path.display());
            figment = figment.merge(Self::file_provider(path)?);
        }

        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Find `.boardsync/boardsync.<ext>` under the search root
    fn discover(&self) -> Option<PathBuf> {
        let root = match &self.search_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().ok()?,
        };
        let dir = root.join(CONFIG_DIR);

        ConfigFormat::DISCOVERY_ORDER
            .iter()
            .map(|(ext, _)| dir.join(format!("{CONFIG_FILE_STEM}.{ext}")))
            .find(|candidate| candidate.is_file())
    }

    fn file_provider(path: &Path) -> ConfigResult<Figment> {
        match ConfigFormat::from_path(path) {
            Some(ConfigFormat::Toml) => Ok(Figment::from(Toml::file(path))),
            Some(ConfigFormat::Yaml) => Ok(Figment::from(Yaml::file(path))),
            Some(ConfigFormat::Json) => Ok(Figment::from(Json::file(path))),
            None => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}
