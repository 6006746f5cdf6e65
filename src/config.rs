use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use dotenvy::dotenv;
use thiserror::Error;
use validator::Validate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server address {0:?}: {1}")]
    InvalidAddr(String, std::net::AddrParseError),

    #[error("UPLOAD_DIR must not be empty")]
    EmptyUploadDir,

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Clone, Validate)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub upload_dir: PathBuf,
    #[validate(range(min = 1, max = 104857600))] // Max 100MB
    pub max_file_size: u64,
    /// Bound applied to both axes of the derived thumbnail.
    #[validate(range(min = 1, max = 10000))]
    pub max_dimension: u32,
    /// Sources wider or taller than this are refused before decoding.
    #[validate(range(min = 1, max = 65535))]
    pub max_source_dimension: u32,
    #[validate(range(min = 1, max = 600))]
    pub processing_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            upload_dir: PathBuf::from("uploads"),
            max_file_size: 10_485_760,
            max_dimension: 800,
            max_source_dimension: 16_384,
            processing_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load environment variables from `.env` file (if it exists)
        dotenv().ok();

        let defaults = Config::default();

        let server_addr = match env::var("SERVER_ADDR") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| ConfigError::InvalidAddr(raw.clone(), e))?,
            Err(_) => defaults.server_addr,
        };

        let config = Config {
            server_addr,
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_file_size: parse_or("MAX_FILE_SIZE", defaults.max_file_size),
            max_dimension: parse_or("MAX_DIMENSION", defaults.max_dimension),
            max_source_dimension: parse_or(
                "MAX_SOURCE_DIMENSION",
                defaults.max_source_dimension,
            ),
            processing_timeout_secs: parse_or(
                "PROCESSING_TIMEOUT_SECS",
                defaults.processing_timeout_secs,
            ),
        };

        config.check()?;
        Ok(config)
    }

    /// Range checks plus the invariants `validator` can't express.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.upload_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyUploadDir);
        }
        self.validate()?;
        Ok(())
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
