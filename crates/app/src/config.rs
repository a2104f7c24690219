//! Process configuration from command-line flags and environment variables.

use clap::{Parser, ValueEnum};
use thiserror::Error;

use libris_observability::LogFormat;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Process-local store; data is lost on exit.
    Memory,
    /// Remote PostgreSQL database.
    Postgres,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "libris", version, about = "Interactive library inventory manager")]
pub struct Config {
    /// Store backend.
    #[arg(long, env = "LIBRIS_STORE", value_enum, default_value_t = StoreBackend::Memory)]
    pub store: StoreBackend,

    /// Connection string for the postgres backend.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "LIBRIS_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Days a loan may stay open before the overdue report lists it (memory backend).
    #[arg(long, env = "LIBRIS_LOAN_DAYS", default_value_t = 14)]
    pub loan_days: u32,

    #[arg(long, env = "LIBRIS_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    /// Populate the memory backend with a few books and members.
    #[arg(long, env = "LIBRIS_SEED_DEMO")]
    pub seed_demo: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--database-url (or DATABASE_URL) is required for the postgres store")]
    MissingDatabaseUrl,

    #[error("--max-connections must be at least 1")]
    NoConnections,

    #[error("--seed-demo only applies to the memory store")]
    SeedRequiresMemory,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.store {
            StoreBackend::Postgres => {
                if self
                    .database_url
                    .as_deref()
                    .is_none_or(|url| url.trim().is_empty())
                {
                    return Err(ConfigError::MissingDatabaseUrl);
                }
                if self.max_connections == 0 {
                    return Err(ConfigError::NoConnections);
                }
                if self.seed_demo {
                    return Err(ConfigError::SeedRequiresMemory);
                }
            }
            StoreBackend::Memory => {}
        }
        Ok(())
    }
}
