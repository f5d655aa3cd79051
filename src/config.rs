//! Layered configuration for the projector.
//!
//! Values resolve in order: built-in defaults → `projector.toml` (or the file
//! passed with `--config`) → `PROJECTOR_*` environment variables → CLI flags.
//! A `.env` file in the working directory is loaded into the environment
//! before the environment layer is read.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8888"
//! cors = false
//!
//! [storage]
//! url = "sqlite://.projector/index.db"   # or "memory://"
//!
//! [activities]
//! database = ".projector/activities.db"
//!
//! [logging]
//! level = "info"
//! format = "pretty"                       # or "json"
//! directory = ".projector/logs"           # optional daily-rolling file
//!
//! [projector]
//! status_interval = 1000
//! on_invariant_violation = "abort"        # or "skip"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::projections::InvariantPolicy;
use crate::projections::broadcast::DEFAULT_STATUS_INTERVAL;
use crate::server::DEFAULT_LISTEN;

pub const DEFAULT_CONFIG_FILE: &str = "projector.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen: String,
    /// Answer cross-origin requests.
    pub cors: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            cors: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// `memory://`, `sqlite://<path>` or a bare path.
    pub url: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            url: "sqlite://.projector/index.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitiesSection {
    /// SQLite file holding the activity log, or `memory://`.
    pub database: String,
}

impl Default for ActivitiesSection {
    fn default() -> Self {
        Self {
            database: ".projector/activities.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorSection {
    /// Activities between status log lines; `0` turns them off.
    pub status_interval: u64,
    pub on_invariant_violation: InvariantPolicy,
}

impl Default for ProjectorSection {
    fn default() -> Self {
        Self {
            status_interval: DEFAULT_STATUS_INTERVAL,
            on_invariant_violation: InvariantPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub activities: ActivitiesSection,
    pub logging: LoggingSection,
    pub projector: ProjectorSection,
}

impl ProjectorConfig {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse projector.toml")
    }

    /// Load from `path`, or from `projector.toml` in the working directory
    /// when present, then apply the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::load_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        // A missing .env is the normal case.
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Override values from `PROJECTOR_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(listen) = lookup("PROJECTOR_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(url) = lookup("PROJECTOR_STORAGE") {
            self.storage.url = url;
        }
        if let Some(database) = lookup("PROJECTOR_ACTIVITIES_DB") {
            self.activities.database = database;
        }
        if let Some(level) = lookup("PROJECTOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("PROJECTOR_LOG_FORMAT") {
            self.logging.format = format
                .parse()
                .context("Invalid PROJECTOR_LOG_FORMAT")?;
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Check values that only fail later at runtime.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Err(err) = crate::index::StorageUrl::parse(&self.storage.url) {
            warnings.push(format!("storage.url: {}", err));
        }
        if self.activities.database.trim().is_empty() {
            warnings.push("activities.database is empty".to_string());
        }
        if self.server.listen.parse::<std::net::SocketAddr>().is_err() {
            warnings.push(format!(
                "server.listen '{}' is not a socket address",
                self.server.listen
            ));
        }
        warnings
    }
}
