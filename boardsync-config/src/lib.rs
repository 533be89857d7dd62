//! Boardsync configuration management using Figment
//!
//! Sources are merged in precedence order (later sources win):
//!
//! 1. Built-in defaults ([`SyncConfig::default`])
//! 2. Configuration files: a discovered `.boardsync/boardsync.{toml,yaml,yml,json}`
//!    and any file passed with [`ConfigProvider::with_file`]
//! 3. Environment variables prefixed `BOARDSYNC_`, using `__` to nest
//!    (`BOARDSYNC_RETRY__MAX_RETRIES=5`)
//!
//! ## Example TOML Configuration
//!
//! ```toml
//! timeout_ms = 8000
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 250
//! backoff_multiplier = 2.0
//! max_delay_ms = 4000
//! use_jitter = true
//!
//! [ordering]
//! step = 1.0
//! ```
//!
//! ```no_run
//! use boardsync_config::load_configuration;
//!
//! let config = load_configuration()?;
//! let retry = config.retry_config();
//! # Ok::<(), boardsync_config::ConfigError>(())
//! ```

mod error;
mod provider;
mod types;

pub use error::{ConfigError, ConfigResult};
pub use provider::{ConfigFormat, ConfigProvider, CONFIG_DIR, CONFIG_FILE_STEM, ENV_PREFIX};
pub use types::{OrderingSettings, RetrySettings, SyncConfig};

/// Load configuration from defaults, the discovered project file and the environment
pub fn load_configuration() -> ConfigResult<SyncConfig> {
    ConfigProvider::new().load()
}
