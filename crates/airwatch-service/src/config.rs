//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use airwatch_core::RetryConfig;
use airwatch_types::{DEFAULT_ALERT_THRESHOLD, DEFAULT_MIN_INTERVAL_HOURS};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Alert evaluation settings.
    pub alerts: AlertsConfig,
    /// Alert delivery settings.
    pub notifier: NotifierConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use airwatch_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.alerts.validate());
        errors.extend(self.notifier.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError::new(
                "server.bind",
                "bind address cannot be empty",
            ));
            return errors;
        }

        match self.bind.rsplit_once(':') {
            None => errors.push(ValidationError::new(
                "server.bind",
                format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            )),
            Some((_, port)) => match port.parse::<u16>() {
                Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "server.bind",
                    format!("invalid port '{}': must be a number 1-65535", port),
                )),
            },
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: airwatch_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            ));
        }

        errors
    }
}

/// Minimum scheduler interval in seconds.
pub const MIN_CHECK_INTERVAL: u64 = 10;
/// Maximum scheduler interval in seconds (one day).
pub const MAX_CHECK_INTERVAL: u64 = 86_400;
/// Upper bound on delivery retries.
pub const MAX_DELIVERY_RETRIES: u32 = 10;

/// Alert evaluation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Threshold for subscriptions created without one.
    pub default_threshold: f64,
    /// Re-alert interval for subscriptions created without one.
    pub default_min_interval_hours: f64,
    /// How often the scheduler re-evaluates each city, in seconds.
    pub check_interval_secs: u64,
    /// Readings older than this are ignored by the scheduler (0 = no limit).
    pub max_reading_age_minutes: u64,
    /// Retries per delivery after the first attempt.
    pub delivery_retries: u32,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_ALERT_THRESHOLD,
            default_min_interval_hours: DEFAULT_MIN_INTERVAL_HOURS,
            check_interval_secs: 300,
            max_reading_age_minutes: 180,
            delivery_retries: 3,
        }
    }
}

impl AlertsConfig {
    /// Validate alert configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.default_threshold.is_finite() || self.default_threshold < 0.0 {
            errors.push(ValidationError::new(
                "alerts.default_threshold",
                format!(
                    "threshold {} must be a non-negative number",
                    self.default_threshold
                ),
            ));
        }

        if !self.default_min_interval_hours.is_finite() || self.default_min_interval_hours < 0.0 {
            errors.push(ValidationError::new(
                "alerts.default_min_interval_hours",
                format!(
                    "interval {} must be a non-negative number of hours",
                    self.default_min_interval_hours
                ),
            ));
        }

        if self.check_interval_secs < MIN_CHECK_INTERVAL {
            errors.push(ValidationError::new(
                "alerts.check_interval_secs",
                format!(
                    "check interval {} is too short (minimum {} seconds)",
                    self.check_interval_secs, MIN_CHECK_INTERVAL
                ),
            ));
        } else if self.check_interval_secs > MAX_CHECK_INTERVAL {
            errors.push(ValidationError::new(
                "alerts.check_interval_secs",
                format!(
                    "check interval {} is too long (maximum {} seconds / 1 day)",
                    self.check_interval_secs, MAX_CHECK_INTERVAL
                ),
            ));
        }

        if self.delivery_retries > MAX_DELIVERY_RETRIES {
            errors.push(ValidationError::new(
                "alerts.delivery_retries",
                format!(
                    "{} retries is too many (maximum {})",
                    self.delivery_retries, MAX_DELIVERY_RETRIES
                ),
            ));
        }

        errors
    }

    /// Scheduler tick.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Maximum reading age, if limited.
    pub fn max_reading_age(&self) -> Option<time::Duration> {
        (self.max_reading_age_minutes > 0)
            .then(|| time::Duration::minutes(self.max_reading_age_minutes as i64))
    }

    /// Delivery retry policy.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::for_delivery().max_retries(self.delivery_retries)
    }
}

/// Where alerts are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    /// Write alerts to the log only.
    #[default]
    Log,
    /// POST alerts as JSON to `webhook_url`.
    Webhook,
}

/// Alert delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    /// Target for [`NotifierKind::Webhook`].
    pub webhook_url: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Log,
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

impl NotifierConfig {
    /// Validate notifier configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.kind == NotifierKind::Webhook {
            match self.webhook_url.as_deref() {
                None | Some("") => errors.push(ValidationError::new(
                    "notifier.webhook_url",
                    "webhook notifier requires a URL",
                )),
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    errors.push(ValidationError::new(
                        "notifier.webhook_url",
                        format!("invalid URL '{}': must start with http:// or https://", url),
                    ))
                }
                Some(_) => {}
            }
        }

        if self.timeout_secs == 0 || self.timeout_secs > 300 {
            errors.push(ValidationError::new(
                "notifier.timeout_secs",
                format!("timeout {} must be between 1 and 300 seconds", self.timeout_secs),
            ));
        }

        errors
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `alerts.check_interval_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("airwatch")
        .join("server.toml")
}
