//! Configuration management for the studio runtime
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables (a `.env` file is honoured). Durations are
//! written in humantime form (`"30s"`, `"1h"`).

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::types::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub models: ModelsConfig,
    pub scheduler: SchedulerConfig,
    pub sandbox: SandboxConfig,
    pub tasks: TasksConfig,
    pub logging: LoggingConfig,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Accepted API keys; empty disables authentication
    #[serde(skip_serializing)]
    pub api_keys: Vec<String>,
    pub cors_origins: Vec<String>,
    pub enable_tracing: bool,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per client within `period`
    pub requests: u32,
    #[serde(with = "humantime_serde")]
    pub period: Duration,
}

/// Which model backend serves downloads and loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Simulated,
    Hub,
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulated" => Ok(BackendKind::Simulated),
            "hub" => Ok(BackendKind::Hub),
            other => Err(ConfigError::InvalidValue {
                key: "models.backend".to_string(),
                reason: format!("Unknown backend '{}', expected 'simulated' or 'hub'", other),
            }),
        }
    }
}

/// Model backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub backend: BackendKind,
    pub cache_dir: PathBuf,
    pub hub_endpoint: String,
    #[serde(skip_serializing)]
    pub hf_token: Option<String>,
    pub max_model_size_mb: u64,
    pub default_model: String,
    /// Per-file delay of the simulated backend
    #[serde(with = "humantime_serde")]
    pub simulated_file_delay: Duration,
    /// Ids the simulated backend reports as already cached
    pub simulated_cached: Vec<String>,
}

/// Lifecycle scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Download and load units that may run at once
    pub max_workers: usize,
    #[serde(with = "humantime_serde")]
    pub unit_timeout: Duration,
    pub auto_load_after_download: bool,
    #[serde(with = "humantime_serde")]
    pub loading_status_retention: Duration,
}

/// Sandbox executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub max_steps: u64,
    pub max_depth: usize,
    /// Allocation budget of one execution, in bytes
    pub max_bytes: usize,
    /// Run at most one execution per model at a time
    pub serialize_per_model: bool,
}

/// Task store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub max_tasks: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Full,
    Compact,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            api_keys: Vec::new(),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:8080".to_string(),
            ],
            enable_tracing: true,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 100,
            period: Duration::from_secs(3600),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Simulated,
            cache_dir: PathBuf::from("./models"),
            hub_endpoint: "https://huggingface.co".to_string(),
            hf_token: None,
            max_model_size_mb: 2048,
            default_model: "bert-base-uncased".to_string(),
            simulated_file_delay: Duration::from_millis(50),
            simulated_cached: Vec::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            unit_timeout: Duration::from_secs(30 * 60),
            auto_load_after_download: false,
            loading_status_retention: Duration::from_secs(3600),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_steps: 1_000_000,
            max_depth: 64,
            max_bytes: 256 * 1024 * 1024,
            serialize_per_model: true,
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self { max_tasks: 10_000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
        }
    }
}

impl Config {
    /// Defaults overridden by the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }

    /// Full layering: file (when given) or defaults, `.env`, environment,
    /// then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(dotenv_path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", dotenv_path.display());
        }

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STUDIO_*` and related environment overrides in place
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("STUDIO_HOST") {
            self.api.host = host;
        }

        if let Ok(port) = env::var("STUDIO_PORT") {
            self.api.port = parse_var("STUDIO_PORT", &port)?;
        }

        if let Ok(keys) = env::var("STUDIO_API_KEYS") {
            self.api.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(backend) = env::var("STUDIO_BACKEND") {
            self.models.backend = backend.parse()?;
        }

        if let Ok(dir) = env::var("STUDIO_MODEL_CACHE_DIR") {
            self.models.cache_dir = PathBuf::from(dir);
        }

        if let Ok(endpoint) = env::var("STUDIO_HUB_ENDPOINT") {
            self.models.hub_endpoint = endpoint;
        }

        if let Ok(token) = env::var("HF_TOKEN") {
            if !token.trim().is_empty() {
                self.models.hf_token = Some(token);
            }
        }

        if let Ok(workers) = env::var("STUDIO_MAX_WORKERS") {
            self.scheduler.max_workers = parse_var("STUDIO_MAX_WORKERS", &workers)?;
        }

        if let Ok(timeout) = env::var("STUDIO_SANDBOX_TIMEOUT_MS") {
            let millis: u64 = parse_var("STUDIO_SANDBOX_TIMEOUT_MS", &timeout)?;
            self.sandbox.timeout = Duration::from_millis(millis);
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.port == 0 {
            return Err(invalid("api.port", "Port cannot be 0"));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging.level",
                &format!("Must be one of: {}", valid_levels.join(", ")),
            ));
        }

        if self.scheduler.max_workers == 0 {
            return Err(invalid("scheduler.max_workers", "Must be > 0"));
        }

        if self.scheduler.unit_timeout.is_zero() {
            return Err(invalid("scheduler.unit_timeout", "Must be > 0"));
        }

        if self.sandbox.timeout.is_zero() {
            return Err(invalid("sandbox.timeout", "Must be > 0"));
        }

        if self.sandbox.max_steps == 0 || self.sandbox.max_depth == 0 {
            return Err(invalid("sandbox", "Step and depth ceilings must be > 0"));
        }

        if self.sandbox.max_bytes == 0 {
            return Err(invalid("sandbox.max_bytes", "Must be > 0"));
        }

        if self.models.cache_dir.as_os_str().is_empty() {
            return Err(invalid("models.cache_dir", "Cannot be empty"));
        }

        if self.api.rate_limit.enabled
            && (self.api.rate_limit.requests == 0 || self.api.rate_limit.period.is_zero())
        {
            return Err(invalid("api.rate_limit", "Requests and period must be > 0"));
        }

        Ok(())
    }

    /// Effective configuration rendered as TOML; secrets are never written
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("Cannot parse '{}'", value),
    })
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.port, 8000);
        assert_eq!(config.api.host, "127.0.0.1");
        assert_eq!(config.models.backend, BackendKind::Simulated);
        assert!(config.sandbox.serialize_per_model);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        env::set_var("STUDIO_PORT", "9090");
        env::set_var("STUDIO_HOST", "0.0.0.0");
        env::set_var("STUDIO_API_KEYS", "alpha, beta,,");
        env::set_var("LOG_LEVEL", "DEBUG");

        let config = Config::from_env().unwrap();
        assert_eq!(config.api.port, 9090);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.api_keys, vec!["alpha", "beta"]);
        assert_eq!(config.logging.level, "debug");

        env::remove_var("STUDIO_PORT");
        env::remove_var("STUDIO_HOST");
        env::remove_var("STUDIO_API_KEYS");
        env::remove_var("LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_config_from_env_invalid_port() {
        env::set_var("STUDIO_PORT", "not-a-port");
        let result = Config::from_env();
        env::remove_var("STUDIO_PORT");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    #[serial]
    fn test_unknown_backend_is_rejected() {
        env::set_var("STUDIO_BACKEND", "gpu-cluster");
        let result = Config::from_env();
        env::remove_var("STUDIO_BACKEND");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_port() {
        let mut config = Config::default();
        config.api.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ceilings_rejected() {
        let mut config = Config::default();
        config.scheduler.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sandbox.timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[api]\nport = 8123\n\n[sandbox]\ntimeout = \"2s\"\n\n[scheduler]\nloading_status_retention = \"30m\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.api.port, 8123);
        assert_eq!(config.api.host, "127.0.0.1");
        assert_eq!(config.sandbox.timeout, Duration::from_secs(2));
        assert_eq!(config.sandbox.max_steps, 1_000_000);
        assert_eq!(config.sandbox.max_bytes, 256 * 1024 * 1024);
        assert_eq!(
            config.scheduler.loading_status_retention,
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_toml_output_omits_secrets() {
        let mut config = Config::default();
        config.api.api_keys = vec!["secret-key".to_string()];
        config.models.hf_token = Some("hf_secret".to_string());

        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("secret-key"));
        assert!(!rendered.contains("hf_secret"));
        assert!(rendered.contains("port = 8000"));
    }
}
