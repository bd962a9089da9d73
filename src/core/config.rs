//! Configuration management

use clap::Parser;
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid platform configuration: {0}")]
    InvalidPlatform(String),

    #[error("Invalid local runtime configuration: {0}")]
    InvalidLocalRuntime(String),

    #[error("Invalid signature configuration: {0}")]
    InvalidSignature(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

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

/// Platform the daemon materializes plugin runtimes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Plugins run as local subprocesses inside built virtual environments
    Local,
    /// Plugins run as remote serverless functions
    Serverless,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Local => write!(f, "local"),
            Platform::Serverless => write!(f, "serverless"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub platform: Platform,
    pub database: DatabaseConfig,
    pub local_runtime: LocalRuntimeConfig,
    pub serverless: ServerlessConfig,
    pub signature: SignatureConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Connection pool size
    pub connection_pool_size: u32,
    /// Busy timeout in milliseconds
    pub busy_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalRuntimeConfig {
    /// Base interpreter used to create plugin virtual environments
    pub python_interpreter_path: String,
    /// Kill the dependency installer if it produces no output for this many seconds
    pub env_init_idle_timeout: u64,
    /// Maximum number of environments built concurrently
    pub env_init_concurrency: usize,
    /// Maximum number of local plugins launching at the same time
    pub launching_concurrency: usize,
    /// HTTP proxy passed to the package installer
    #[serde(default)]
    pub pip_http_proxy: String,
    /// HTTPS proxy passed to the package installer
    #[serde(default)]
    pub pip_https_proxy: String,
    /// Package index mirror URL
    #[serde(default)]
    pub pip_mirror_url: String,
    /// Prefer binary wheels over source distributions
    #[serde(default)]
    pub pip_prefer_binary: bool,
    /// Run the package installer with maximum verbosity
    #[serde(default)]
    pub pip_verbose: bool,
    /// Free-form extra arguments appended to the package installer
    #[serde(default)]
    pub pip_extra_args: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerlessConfig {
    /// Upload/launch timeout in seconds, passed to the cloud connector
    pub launch_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignatureConfig {
    /// Enable third-party signature verification
    pub third_party_enabled: bool,
    /// Public key bundle paths used when third-party verification is enabled
    #[serde(default)]
    pub public_key_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root of the media bucket (plugin icons and other assets)
    pub media_root: PathBuf,
    /// Root of the package bucket (uploaded plugin packages)
    pub package_root: PathBuf,
    /// Root of the installed bucket (packages owned by at least one tenant)
    pub installed_root: PathBuf,
    /// Working directory for local plugin extractions
    pub plugin_working_root: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    pub max_file_size: u64,
    pub max_backups: u32,
}

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "harbor", about = "Plugin-hosting daemon")]
struct CliArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Platform override (local or serverless)
    #[arg(long)]
    platform: Option<String>,

    /// Database path override
    #[arg(long)]
    database: Option<PathBuf>,

    /// Base python interpreter override
    #[arg(long)]
    python_interpreter: Option<String>,

    /// Log level override
    #[arg(long)]
    log_level: Option<String>,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_with_args(cli_args)
    }

    fn load_with_args(cli_args: CliArgs) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // 1. Start with defaults (lowest priority)
        builder = builder
            .set_default("platform", "local")?
            .set_default("database.path", "./data/harbor.db")?
            .set_default("database.connection_pool_size", 10)?
            .set_default("database.busy_timeout", 5000)?
            .set_default("local_runtime.python_interpreter_path", "python3")?
            .set_default("local_runtime.env_init_idle_timeout", 120)?
            .set_default("local_runtime.env_init_concurrency", 2)?
            .set_default("local_runtime.launching_concurrency", 2)?
            .set_default("serverless.launch_timeout", 240)?
            .set_default("signature.third_party_enabled", false)?
            .set_default("storage.media_root", "./data/media")?
            .set_default("storage.package_root", "./data/packages")?
            .set_default("storage.installed_root", "./data/installed")?
            .set_default("storage.plugin_working_root", "./data/working")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("logging.output", "stdout")?
            .set_default("logging.max_file_size", 10485760)? // 10 MB
            .set_default("logging.max_backups", 5)?;

        // 2. Load from config file if specified (medium priority)
        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // 3. Override with environment variables (higher priority)
        // Environment variables should be prefixed with HARBOR_ and use __ for nesting
        // Example: HARBOR_LOCAL_RUNTIME__ENV_INIT_IDLE_TIMEOUT=300
        builder = builder.add_source(
            Environment::with_prefix("HARBOR")
                .separator("__")
                .try_parsing(true),
        );

        // 4. Override with CLI arguments (highest priority)
        if let Some(platform) = &cli_args.platform {
            builder = builder.set_override("platform", platform.clone())?;
        }
        if let Some(db_path) = &cli_args.database {
            builder = builder.set_override("database.path", db_path.display().to_string())?;
        }
        if let Some(python) = &cli_args.python_interpreter {
            builder = builder.set_override("local_runtime.python_interpreter_path", python.clone())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase(
                "connection_pool_size must be greater than 0".into(),
            ));
        }

        if self.local_runtime.env_init_idle_timeout == 0 {
            return Err(ConfigError::InvalidLocalRuntime(
                "env_init_idle_timeout must be greater than 0".into(),
            ));
        }

        if self.local_runtime.env_init_concurrency == 0 {
            return Err(ConfigError::InvalidLocalRuntime(
                "env_init_concurrency must be greater than 0".into(),
            ));
        }

        if self.local_runtime.launching_concurrency == 0 {
            return Err(ConfigError::InvalidLocalRuntime(
                "launching_concurrency must be greater than 0".into(),
            ));
        }

        if self.signature.third_party_enabled && self.signature.public_key_paths.is_empty() {
            return Err(ConfigError::InvalidSignature(
                "third-party verification is enabled but no public key paths are configured".into(),
            ));
        }

        match self.logging.output.as_str() {
            "stdout" => {}
            "file" => {
                if self.logging.log_file.is_none() {
                    return Err(ConfigError::InvalidLogging(
                        "log_file must be set when output is 'file'".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::InvalidLogging(format!(
                    "unknown output: {}",
                    other
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> Config {
        Config {
            platform: Platform::Local,
            database: DatabaseConfig {
                path: PathBuf::from("./data/harbor.db"),
                connection_pool_size: 10,
                busy_timeout: 5000,
            },
            local_runtime: LocalRuntimeConfig {
                python_interpreter_path: "python3".into(),
                env_init_idle_timeout: 120,
                env_init_concurrency: 2,
                launching_concurrency: 2,
                pip_http_proxy: String::new(),
                pip_https_proxy: String::new(),
                pip_mirror_url: String::new(),
                pip_prefer_binary: false,
                pip_verbose: false,
                pip_extra_args: String::new(),
            },
            serverless: ServerlessConfig {
                launch_timeout: 240,
            },
            signature: SignatureConfig {
                third_party_enabled: false,
                public_key_paths: vec![],
            },
            storage: StorageConfig {
                media_root: PathBuf::from("./data/media"),
                package_root: PathBuf::from("./data/packages"),
                installed_root: PathBuf::from("./data/installed"),
                plugin_working_root: PathBuf::from("./data/working"),
            },
            logging: LoggingConfig {
                level: "info".into(),
                format: "json".into(),
                output: "stdout".into(),
                log_file: None,
                max_file_size: 10485760,
                max_backups: 5,
            },
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(default_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_pool() {
        let mut config = default_config();
        config.database.connection_pool_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDatabase(_))
        ));
    }

    #[test]
    fn test_validate_rejects_third_party_without_keys() {
        let mut config = default_config();
        config.signature.third_party_enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_validate_rejects_file_output_without_path() {
        let mut config = default_config();
        config.logging.output = "file".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogging(_))
        ));
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(Platform::Local.to_string(), "local");
        assert_eq!(Platform::Serverless.to_string(), "serverless");
    }
}
