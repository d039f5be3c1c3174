//! Configuration for the load driver.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use beanstalk_client::session::validate_tube_name;
use beanstalk_client::{ClientOptions, DEFAULT_PORT, DEFAULT_TUBE};
use clap::Parser;
use serde::Deserialize;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the load driver
#[derive(Parser, Debug, Default)]
#[command(name = "beanstalk-load")]
#[command(version)]
#[command(about = "Drives beanstalkd with concurrent put/reserve/delete scenarios", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server address (e.g., 127.0.0.1:11300)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Number of virtual users, each with its own connection
    #[arg(short = 'u', long)]
    pub vus: Option<usize>,

    /// Iterations each virtual user runs
    #[arg(short, long)]
    pub iterations: Option<u64>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the server lives
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
        }
    }
}

/// Client timeouts
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_timeout_ms(),
            io_timeout_ms: default_timeout_ms(),
        }
    }
}

/// Shape of the generated load
#[derive(Debug, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_one")]
    pub vus: usize,
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    #[serde(default = "default_reserve_timeout")]
    pub reserve_timeout_secs: u64,
    /// Tube used by the named-tube scenario
    #[serde(default = "default_tube")]
    pub tube: String,
    /// Number of runtime worker threads
    pub workers: Option<usize>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            vus: default_one(),
            iterations: default_iterations(),
            reserve_timeout_secs: default_reserve_timeout(),
            tube: default_tube(),
            workers: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_PORT)
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_one() -> usize {
    1
}

fn default_iterations() -> u64 {
    1
}

fn default_reserve_timeout() -> u64 {
    5
}

fn default_tube() -> String {
    "test-tube".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub vus: usize,
    pub iterations: u64,
    pub reserve_timeout: Duration,
    pub tube: String,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let address = cli.address.unwrap_or(toml_config.server.address);
        let config = Config {
            address: with_default_port(&address)?,
            connect_timeout: Duration::from_millis(toml_config.client.connect_timeout_ms),
            io_timeout: Duration::from_millis(toml_config.client.io_timeout_ms),
            vus: cli.vus.unwrap_or(toml_config.load.vus),
            iterations: cli.iterations.unwrap_or(toml_config.load.iterations),
            reserve_timeout: Duration::from_secs(toml_config.load.reserve_timeout_secs),
            tube: toml_config.load.tube,
            workers: cli.workers.or(toml_config.load.workers),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.vus == 0 {
            return Err(ConfigError::Invalid("vus must be at least 1".to_string()));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.io_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "client timeouts must be non-zero".to_string(),
            ));
        }
        if validate_tube_name(&self.tube).is_err() {
            return Err(ConfigError::Invalid(format!(
                "invalid tube name {:?}",
                self.tube
            )));
        }
        if self.tube == DEFAULT_TUBE {
            return Err(ConfigError::Invalid(format!(
                "load tube must not be {:?}",
                DEFAULT_TUBE
            )));
        }
        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }
    }
}

/// Append the standard port when the address has none.
fn with_default_port(address: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::Invalid(format!("invalid server address {:?}", address));
    let check_port = |port: &str| port.parse::<u16>().map(|_| address.to_string());

    if address.is_empty() {
        return Err(invalid());
    }

    // `[v6]` or `[v6]:port`
    if let Some(rest) = address.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, "")) if host.parse::<Ipv6Addr>().is_ok() => {
                Ok(format!("{}:{}", address, DEFAULT_PORT))
            }
            Some((host, tail)) if host.parse::<Ipv6Addr>().is_ok() => tail
                .strip_prefix(':')
                .and_then(|port| check_port(port).ok())
                .ok_or_else(invalid),
            _ => Err(invalid()),
        };
    }

    match address.split_once(':') {
        None => Ok(format!("{}:{}", address, DEFAULT_PORT)),
        Some((_, port)) if !port.contains(':') => check_port(port).map_err(|_| invalid()),
        // Bare IPv6 literal such as `::1`
        Some(_) if address.parse::<Ipv6Addr>().is_ok() => {
            Ok(format!("[{}]:{}", address, DEFAULT_PORT))
        }
        Some(_) => Err(invalid()),
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
