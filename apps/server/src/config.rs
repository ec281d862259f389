use neuroscan_api::config::{ConfigError as ServiceConfigError, ServiceConfig};
use std::env;

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub service: ServiceConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match env::var("PORT") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            _ => DEFAULT_PORT,
        };

        Ok(Config {
            port,
            service: ServiceConfig::from_env().map_err(ConfigError::Service)?,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue(String),
    Service(ServiceConfigError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(var) => write!(f, "Invalid value for: {}", var),
            ConfigError::Service(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
