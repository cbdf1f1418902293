use error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod error;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// Address the server binds its datagram socket to.
    pub bind_ip: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory the server serves files out of.
    pub server_dir: PathBuf,
    /// Directory the client writes downloads into.
    pub client_dir: PathBuf,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: "127.0.0.1".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            server_dir: PathBuf::from("files/server"),
            client_dir: PathBuf::from("files/client"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if IpAddr::from_str(&self.network.bind_ip).is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid bind address: '{}'. Expected a plain IP like '127.0.0.1'.",
                self.network.bind_ip
            )));
        }

        if self.storage.server_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Server file directory cannot be empty.".to_string(),
            ));
        }

        if self.storage.client_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Client download directory cannot be empty.".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn handle() -> Result<Config, ConfigError> {
    let config_path = PathBuf::from(CONFIG_FILE_NAME);
    if config_path.exists() {
        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    } else {
        let config = Config::default();
        save(&config, &config_path)?;
        Ok(config)
    }
}

fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let config_content = toml::to_string_pretty(config)?;
    let mut file = fs::File::create(path)?;
    file.write_all(config_content.as_bytes())?;
    Ok(())
}
