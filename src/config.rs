use crate::errors::ConfigError;
use std::{env, net::SocketAddr, path::PathBuf};

const DEFAULT_PORT: u16 = 8080;

/// Startup settings read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = env::var("APP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let port = match env::var("PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|err| ConfigError::InvalidValue("PORT".to_string(), err.to_string()))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self { data_dir, port })
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}
