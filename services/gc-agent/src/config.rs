//! Configuration for the gc agent.
//!
//! Every option can be given as a flag or through an `IMAGEGC_*`
//! environment variable. Durations use humantime syntax (`72h`, `57s`,
//! `1h 30m`).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::ingest::DEFAULT_RESUBSCRIBE_DELAY;

/// Default location of the usage database.
pub const DEFAULT_DB_PATH: &str = "/var/db/imagegc/state.db";

/// Default Docker daemon socket.
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Default retention window.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(72 * 3600);

/// Default sweep interval.
pub const DEFAULT_PURGE_FREQUENCY: Duration = Duration::from_secs(57);

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable text.
    Text,
}

/// imagegc - reclaims container images that have not been used recently.
#[derive(Debug, Parser)]
#[command(name = "imagegc")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path of the usage database.
    #[arg(long, env = "IMAGEGC_DB", default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    /// Keep usage records in memory only.
    #[arg(long, env = "IMAGEGC_NO_PERSIST")]
    pub no_persist: bool,

    /// Remove unreferenced images not used for this long.
    #[arg(long, env = "IMAGEGC_MAX_AGE", default_value = "72h", value_parser = humantime::parse_duration)]
    pub max_age: Duration,

    /// Interval between sweeps.
    #[arg(long, env = "IMAGEGC_PURGE_FREQUENCY", default_value = "57s", value_parser = humantime::parse_duration)]
    pub purge_frequency: Duration,

    /// Docker daemon Unix socket.
    #[arg(long, env = "IMAGEGC_DOCKER_SOCKET", default_value = DEFAULT_DOCKER_SOCKET)]
    pub docker_socket: PathBuf,

    /// Enable debug logging.
    #[arg(long, env = "IMAGEGC_DEBUG")]
    pub debug: bool,

    /// Log output format.
    #[arg(long, env = "IMAGEGC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Bootstrap, run a single sweep, and exit.
    #[arg(long)]
    pub once: bool,
}

impl Args {
    /// Validate and convert into an agent configuration.
    pub fn into_config(self) -> Result<AgentConfig, ConfigError> {
        if self.max_age.is_zero() {
            return Err(ConfigError::ZeroDuration { name: "max-age" });
        }
        if self.purge_frequency.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "purge-frequency",
            });
        }

        Ok(AgentConfig {
            db_path: (!self.no_persist).then_some(self.db),
            max_age: self.max_age,
            purge_frequency: self.purge_frequency,
            docker_socket: self.docker_socket,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        })
    }
}

/// Validated agent configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Usage database; `None` keeps the ledger in memory only.
    pub db_path: Option<PathBuf>,

    /// Retention window.
    pub max_age: Duration,

    /// Sweep interval.
    pub purge_frequency: Duration,

    /// Docker daemon socket.
    pub docker_socket: PathBuf,

    /// Delay before re-subscribing to runtime events.
    pub resubscribe_delay: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            db_path: Some(PathBuf::from(DEFAULT_DB_PATH)),
            max_age: DEFAULT_MAX_AGE,
            purge_frequency: DEFAULT_PURGE_FREQUENCY,
            docker_socket: PathBuf::from(DEFAULT_DOCKER_SOCKET),
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }
}
