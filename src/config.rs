use laundry_time_core::{default_seed_data, load_seed_file, SeedEntry, SeedFileError, WriteConsistency};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080";

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Document store server (e.g. "ws://localhost:8080" or "wss://laundry.example.com")
    pub server_url: ConfigValue<String>,
    /// Seed dataset used when the store is empty; built-in rooms if unset
    pub seed_file: ConfigValue<Option<PathBuf>>,
    /// How machine status writes are committed
    pub write_consistency: ConfigValue<WriteConsistency>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    server_url: Option<String>,
    seed_file: Option<PathBuf>,
    write_consistency: Option<WriteConsistency>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut server_url =
            ConfigValue::new(DEFAULT_SERVER_URL.to_string(), ConfigSource::Default);
        let mut seed_file = ConfigValue::new(None, ConfigSource::Default);
        let mut write_consistency =
            ConfigValue::new(WriteConsistency::default(), ConfigSource::Default);
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(url) = file_config.server_url {
                server_url = ConfigValue::new(url, ConfigSource::File);
            }
            if let Some(seed_path) = file_config.seed_file {
                // Resolve relative paths against config file's directory
                let resolved_path = if seed_path.is_relative() {
                    path.parent()
                        .map(|p| p.join(&seed_path))
                        .unwrap_or(seed_path)
                } else {
                    seed_path
                };
                seed_file = ConfigValue::new(Some(resolved_path), ConfigSource::File);
            }
            if let Some(consistency) = file_config.write_consistency {
                write_consistency = ConfigValue::new(consistency, ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Ok(url) = std::env::var("LAUNDRY_SERVER_URL") {
            server_url = ConfigValue::new(url, ConfigSource::Environment);
        }
        if let Ok(seed_path) = std::env::var("LAUNDRY_SEED_FILE") {
            seed_file = ConfigValue::new(Some(PathBuf::from(seed_path)), ConfigSource::Environment);
        }
        if let Ok(consistency) = std::env::var("LAUNDRY_WRITE_CONSISTENCY") {
            let consistency = consistency
                .parse()
                .map_err(ConfigError::InvalidValue)?;
            write_consistency = ConfigValue::new(consistency, ConfigSource::Environment);
        }

        Ok(Self {
            server_url,
            seed_file,
            write_consistency,
            config_file,
        })
    }

    /// The seed dataset: the configured seed file, or the built-in rooms.
    pub fn seed_data(&self) -> Result<Vec<SeedEntry>, SeedFileError> {
        match &self.seed_file.value {
            Some(path) => load_seed_file(path),
            None => Ok(default_seed_data()),
        }
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/laundrytime/
    /// - macOS: ~/Library/Application Support/laundrytime/
    /// - Windows: %APPDATA%/laundrytime/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("laundrytime")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
