//! Bot configuration
//!
//! Bootstrap settings come from a TOML file (every field defaulted, a missing
//! file is fine). The password only ever comes from the environment.

use crate::transport::RetryPolicy;
use crate::types::{EntityId, ForeignSource};
use gazlink_common::config::{load_toml_or_default, LoggingConfig};
use gazlink_common::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the bot password
pub const PASSWORD_ENV: &str = "GAZLINK_BOT_PASSWORD";

/// Config file name looked up in the root folder
pub const CONFIG_FILE_NAME: &str = "gazlink-bot.toml";

const DEFAULT_DATASET_FILE: &str = "whosonfirst-data-admin-latest.db";
const DEFAULT_DATABASE_FILE: &str = "gazlink.db";

/// Settings loaded from `gazlink-bot.toml`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    /// MediaWiki action API endpoint
    pub api_url: String,
    /// SPARQL endpoint used for the subclass query
    pub sparql_url: String,
    /// Dataset distribution inventory
    pub inventory_url: String,
    pub user_agent: String,
    /// Account the bot logs in as and whose contributions form the edited set
    pub username: String,
    /// Property receiving the back-reference
    pub target_property: String,
    pub edit_summary: Option<String>,
    pub source: ForeignSource,
    /// Local gazetteer SQLite file (default: `<root>/whosonfirst-data-admin-latest.db`)
    pub dataset_path: Option<PathBuf>,
    /// Link/negative store (default: `<root>/gazlink.db`)
    pub database_path: Option<PathBuf>,
    /// Unset means no timeout on remote calls
    pub request_timeout_secs: Option<u64>,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
    /// Place type -> root classes; non-empty enables type validation
    pub placetypes: BTreeMap<String, Vec<EntityId>>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_url: "https://www.wikidata.org/w/api.php".to_string(),
            sparql_url: "https://query.wikidata.org/sparql".to_string(),
            inventory_url: "https://data.geocode.earth/wof/dist/sqlite/inventory.json".to_string(),
            user_agent: format!(
                "gazlink-bot/{} (https://github.com/gazlink/gazlink)",
                env!("CARGO_PKG_VERSION")
            ),
            username: "GazlinkBot".to_string(),
            target_property: "P6766".to_string(),
            edit_summary: None,
            source: ForeignSource::GeoNames,
            dataset_path: None,
            database_path: None,
            request_timeout_secs: None,
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            placetypes: BTreeMap::new(),
        }
    }
}

/// `[retry]` table
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub base_backoff_secs: u64,
    pub throttle_wait_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_backoff_secs: 1,
            throttle_wait_secs: 60,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_backoff: Duration::from_secs(self.base_backoff_secs),
            throttle_wait: Duration::from_secs(self.throttle_wait_secs),
        }
    }
}

/// Where a loaded [`BotConfig`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No file at the configured path
    Defaults,
}

impl BotConfig {
    /// Load and validate; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// [`BotConfig::load`] plus where the settings came from, so the caller
    /// can report it once logging is up
    pub fn load_with_source(path: &Path) -> Result<(Self, ConfigSource)> {
        let source = if path.exists() {
            ConfigSource::File
        } else {
            ConfigSource::Defaults
        };
        Ok((Self::load(path)?, source))
    }

    pub fn validate(&self) -> Result<()> {
        if !is_property_id(&self.target_property) {
            return Err(Error::Config(format!(
                "target_property must look like P123, got {:?}",
                self.target_property
            )));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Config("username must not be empty".to_string()));
        }
        if self.retry.base_backoff_secs == 0 {
            return Err(Error::Config("retry.base_backoff_secs must be positive".to_string()));
        }
        if self.retry.throttle_wait_secs == 0 {
            return Err(Error::Config("retry.throttle_wait_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self, root: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_DATABASE_FILE))
    }

    pub fn dataset_path(&self, root: &Path) -> PathBuf {
        self.dataset_path
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_DATASET_FILE))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn validates_place_types(&self) -> bool {
        !self.placetypes.is_empty()
    }
}

fn is_property_id(raw: &str) -> bool {
    raw.strip_prefix('P')
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Login credentials; `Debug` never shows the password
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Username from config, password from [`PASSWORD_ENV`]
    pub fn from_env(username: &str) -> Result<Self> {
        let password = std::env::var(PASSWORD_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Config(format!("{} is not set", PASSWORD_ENV)))?;

        Ok(Self {
            username: username.to_string(),
            password,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
