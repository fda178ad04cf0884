//! Configuration management

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use config::{Config as ConfigBuilder, ConfigBuilder as Builder, ConfigError as BuilderError, Environment, File};
use config::builder::DefaultState;
use clap::Parser;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("Invalid runtime configuration: {0}")]
    InvalidRuntime(String),

    #[error("Invalid extensions configuration: {0}")]
    InvalidExtensions(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid security configuration: {0}")]
    InvalidSecurity(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub extensions: ExtensionsConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(CliArgs::parse())
    }

    /// Load configuration from already-parsed command-line arguments
    pub fn load_from_args(cli_args: CliArgs) -> Result<Self, ConfigError> {
        // 1. Start with defaults (lowest priority)
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        // 2. Load from config file if specified (medium priority)
        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(
                    config_path.display().to_string()
                ));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // 3. Override with environment variables (higher priority)
        // Example: KAGURA_RUNTIME__CALL_TIMEOUT_MS=10000
        builder = builder.add_source(
            Environment::with_prefix("KAGURA")
                .separator("__")
                .try_parsing(true)
        );

        // 4. Override with CLI arguments (highest priority)
        if let Some(host) = &cli_args.host {
            builder = builder.set_override("server.host", host.clone())?;
        }
        if let Some(port) = cli_args.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(dir) = &cli_args.preload_dir {
            builder = builder.set_override("extensions.preload_dir", dir.display().to_string())?;
        }
        if let Some(policy) = &cli_args.context_policy {
            builder = builder.set_override("runtime.context_policy", policy.clone())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults only
    pub fn defaults() -> Result<Self, ConfigError> {
        let config: Config = with_defaults(ConfigBuilder::builder())?
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.runtime.validate()?;
        self.extensions.validate()?;
        self.logging.validate()?;
        self.security.validate()?;
        Ok(())
    }
}

fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 7878)?
        .set_default("runtime.context_policy", "serialize")?
        .set_default("runtime.call_timeout_ms", 60_000)?
        .set_default("runtime.fetch_timeout_ms", 30_000)?
        .set_default("runtime.connect_timeout_ms", 10_000)?
        .set_default("runtime.user_agent", concat!("kagura/", env!("CARGO_PKG_VERSION")))?
        .set_default("runtime.accept_invalid_certs", false)?
        .set_default("runtime.max_response_bytes", 16_777_216)? // 16 MB
        .set_default("runtime.max_heap_bytes", 268_435_456)? // 256 MB
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.max_file_size", 10_485_760)? // 10 MB
        .set_default("logging.max_backups", 5)?
        .set_default("security.allowed_origins", vec!["*"])?)
}

/// Command-line arguments for configuration override
#[derive(Debug, Default, Parser)]
#[command(name = "kagura")]
#[command(about = "Kagura extension runtime host", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server host address
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Directory of extension scripts to load at startup
    #[arg(long, value_name = "DIR")]
    pub preload_dir: Option<PathBuf>,

    /// Context policy (serialize, recreate)
    #[arg(long, value_name = "POLICY")]
    pub context_policy: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidServer("host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidServer("port must be greater than 0".to_string()));
        }

        Ok(())
    }
}

/// How context slots map onto script-engine instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextPolicy {
    /// One long-lived context per extension; calls to the same extension queue
    Serialize,
    /// Fresh context per invocation
    Recreate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub context_policy: ContextPolicy,
    pub call_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub user_agent: String,
    pub accept_invalid_certs: bool,
    pub max_response_bytes: usize,
    /// V8 heap ceiling for one script context
    pub max_heap_bytes: usize,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::InvalidRuntime("call_timeout_ms must be greater than 0".to_string()));
        }

        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::InvalidRuntime("fetch_timeout_ms must be greater than 0".to_string()));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidRuntime("connect_timeout_ms must be greater than 0".to_string()));
        }

        if self.max_response_bytes == 0 {
            return Err(ConfigError::InvalidRuntime("max_response_bytes must be greater than 0".to_string()));
        }

        if self.max_heap_bytes < 16 * 1024 * 1024 {
            return Err(ConfigError::InvalidRuntime("max_heap_bytes must be at least 16 MB".to_string()));
        }

        // a fetch must be able to settle in-script before the call deadline fires
        if self.fetch_timeout_ms >= self.call_timeout_ms {
            return Err(ConfigError::InvalidRuntime(format!(
                "fetch_timeout_ms ({}) must be lower than call_timeout_ms ({})",
                self.fetch_timeout_ms, self.call_timeout_ms
            )));
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            context_policy: ContextPolicy::Serialize,
            call_timeout_ms: 60_000,
            fetch_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            user_agent: concat!("kagura/", env!("CARGO_PKG_VERSION")).to_string(),
            accept_invalid_certs: false,
            max_response_bytes: 16 * 1024 * 1024,
            max_heap_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtensionsConfig {
    #[serde(default)]
    pub preload_dir: Option<PathBuf>,
}

impl ExtensionsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dir) = &self.preload_dir {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::InvalidExtensions("preload_dir cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize, // bytes
    pub max_backups: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("level must be one of: {:?}", valid_levels)
            ));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("format must be one of: {:?}", valid_formats)
            ));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("output must be one of: {:?}", valid_outputs)
            ));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string()
            ));
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidLogging("max_file_size must be greater than 0".to_string()));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging("max_backups must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl SecurityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_origins.is_empty() {
            return Err(ConfigError::InvalidSecurity("allowed_origins cannot be empty".to_string()));
        }
        Ok(())
    }
}
