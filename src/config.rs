//! Run configuration.
//!
//! A YAML file describes the working directories, which reports to pick up,
//! how to refresh them, and where to load them. Relative directories resolve
//! against the directory holding the config file. The database password may
//! be supplied through `REPORT_MIRROR_PASSWORD` instead of the file.

use std::{
    env, fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::{
    refresh::{CommandRefresher, Refresher, SkipRefresh},
    replace::ReplaceStrategy,
};

pub const PASSWORD_ENV: &str = "REPORT_MIRROR_PASSWORD";

const DEFAULT_PORT: u16 = 5432;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub strategy: ReplaceStrategy,
    #[serde(default)]
    pub refresh: RefreshConfig,
    pub database: ConnectionParams,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("original")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("source")
}

fn default_extension() -> String {
    "xlsx".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub command: Vec<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl RefreshConfig {
    pub fn build(&self) -> Result<Box<dyn Refresher>> {
        if !self.enabled {
            return Ok(Box::new(SkipRefresh));
        }
        let refresher = CommandRefresher::new(self.command.clone())
            .context("refresh.command must name a program when refresh is enabled")?;
        Ok(Box::new(refresher))
    }
}

/// Database connection settings, passed whole into the connector.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionParams {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let mut config: Config = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_relative_to(base);
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if self.source_dir.is_relative() {
            self.source_dir = base.join(&self.source_dir);
        }
        if self.staging_dir.is_relative() {
            self.staging_dir = base.join(&self.staging_dir);
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(password) = env::var(PASSWORD_ENV)
            && !password.is_empty()
        {
            self.database.password = Some(password);
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.extension.trim_start_matches('.').is_empty(),
            "extension must not be empty"
        );
        ensure!(
            self.source_dir != self.staging_dir,
            "source_dir and staging_dir must be different directories"
        );
        Ok(())
    }
}
