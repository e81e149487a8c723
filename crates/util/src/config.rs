use std::{env, net::SocketAddr, str::FromStr};

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:hrbank.db?mode=rwc";

/// Which of the three runtime profiles the process runs under. Controls the
/// log format and nothing else; behavior differences live in code, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    /// Canonical name, used as a logging label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Process configuration, read once at startup.
///
/// Every variable has a default that works for a local checkout, so a bare
/// `cargo run` comes up without any environment set.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = var_or("APP_ENV", "development").parse()?;

        let bind_value = var_or("APP_BIND_ADDR", DEFAULT_BIND_ADDR);
        let bind_addr = bind_value
            .parse()
            .map_err(|err| ConfigError::BindAddress(bind_value, err))?;

        let database_url = var_or("DATABASE_URL", DEFAULT_DATABASE_URL);

        Ok(Self {
            bind_addr,
            environment,
            database_url,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("APP_ENV must be one of 'development', 'production', or 'test' (got {0})")]
    UnknownEnvironment(String),
    #[error("invalid APP_BIND_ADDR value {0:?}: {1}")]
    BindAddress(String, std::net::AddrParseError),
}
