//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use navassist_core::{
    ConnectionConfig, Environment, Permission, PermissionSet, ReconnectOptions, ServiceConfig,
};

/// Daemon configuration, one section per collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// BLE settings.
    pub ble: BleConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Reverse geocoding.
    pub geocoding: GeocodingConfig,
    /// Object description translation.
    pub translation: TranslationConfig,
    /// Speech output.
    pub speech: SpeechConfig,
    /// Emergency SMS.
    pub sms: SmsConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it doesn't exist.
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

    /// Validate every section, collecting all problems.
    ///
    /// ```
    /// use navassist_service::Config;
    ///
    /// Config::default().validate().expect("defaults are valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.ble.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.geocoding.validate());
        errors.extend(self.translation.validate());
        errors.extend(self.speech.validate());
        errors.extend(self.sms.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// BLE settings. Timeouts are whole seconds, delays milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Seconds after which a scan stops on its own.
    pub scan_timeout: u64,
    /// Platform API level the permission rules are evaluated against.
    pub api_level: u32,
    /// Permissions treated as granted at start-up.
    pub granted: Vec<Permission>,
    /// Seconds allowed to establish a link.
    pub connection_timeout: u64,
    /// Seconds allowed for service discovery.
    pub discovery_timeout: u64,
    /// Seconds allowed for a descriptor write.
    pub write_timeout: u64,
    /// Seconds spent looking for a peripheral the adapter hasn't seen yet.
    pub lookup_timeout: u64,
    /// Link retry policy for automatic reconnects.
    pub reconnect: ReconnectConfig,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            scan_timeout: 15,
            api_level: Environment::unrestricted().api_level,
            granted: Permission::ALL.to_vec(),
            connection_timeout: 15,
            discovery_timeout: 10,
            write_timeout: 10,
            lookup_timeout: 10,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BleConfig {
    /// Environment the controller starts with.
    pub fn environment(&self) -> Environment {
        let granted = self
            .granted
            .iter()
            .fold(PermissionSet::empty(), |set, &p| set.with(p));
        Environment {
            api_level: self.api_level,
            granted,
            radio_enabled: true,
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig::new()
            .scan_timeout(Duration::from_secs(self.scan_timeout))
            .environment(self.environment())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new()
            .connection_timeout(Duration::from_secs(self.connection_timeout))
            .discovery_timeout(Duration::from_secs(self.discovery_timeout))
            .write_timeout(Duration::from_secs(self.write_timeout))
            .lookup_timeout(Duration::from_secs(self.lookup_timeout))
    }

    pub fn reconnect_options(&self) -> ReconnectOptions {
        let r = &self.reconnect;
        let options = if r.unlimited {
            ReconnectOptions::unlimited()
        } else {
            ReconnectOptions::new().max_attempts(r.max_attempts)
        };
        options
            .initial_delay(Duration::from_millis(r.initial_delay_ms))
            .max_delay(Duration::from_millis(r.max_delay_ms))
            .backoff_multiplier(r.backoff_multiplier)
            .jitter(r.jitter)
    }

    /// Validate BLE configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("ble.scan_timeout", self.scan_timeout),
            ("ble.connection_timeout", self.connection_timeout),
            ("ble.discovery_timeout", self.discovery_timeout),
            ("ble.write_timeout", self.write_timeout),
            ("ble.lookup_timeout", self.lookup_timeout),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(field, "timeout must be at least 1 second"));
            }
        }

        if self.api_level == 0 {
            errors.push(ValidationError::new("ble.api_level", "api level cannot be 0"));
        }

        if let Err(e) = self.reconnect_options().validate() {
            errors.push(ValidationError::new("ble.reconnect", e.to_string()));
        }

        errors
    }
}

/// Link retry policy, mirroring [`ReconnectOptions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Retries before giving up. Ignored when `unlimited` is set.
    pub max_attempts: u32,
    pub unlimited: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let defaults = ReconnectOptions::default();
        Self {
            max_attempts: defaults.max_attempts.unwrap_or_default(),
            unlimited: defaults.max_attempts.is_none(),
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            jitter: defaults.jitter,
        }
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
            path: navassist_store::default_db_path(),
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

/// Reverse geocoding through a Nominatim-compatible server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    pub enabled: bool,
    /// Server root, `/reverse` is appended.
    pub base_url: String,
    /// Nominatim's usage policy requires an identifying User-Agent.
    pub user_agent: String,
    /// Preferred response language.
    pub language: String,
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("navassist-service/", env!("CARGO_PKG_VERSION")).to_string(),
            language: "es".to_string(),
            timeout: 10,
        }
    }
}

impl GeocodingConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.enabled {
            validate_url("geocoding.base_url", &self.base_url, &mut errors);
            if self.user_agent.trim().is_empty() {
                errors.push(ValidationError::new(
                    "geocoding.user_agent",
                    "user agent cannot be empty",
                ));
            }
            if self.timeout == 0 {
                errors.push(ValidationError::new(
                    "geocoding.timeout",
                    "timeout must be at least 1 second",
                ));
            }
        }
        errors
    }
}

/// Translation through a LibreTranslate-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub enabled: bool,
    /// Full endpoint URL.
    pub url: String,
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://libretranslate.com/translate".to_string(),
            source: "en".to_string(),
            target: "es".to_string(),
            api_key: None,
            timeout: 10,
        }
    }
}

impl TranslationConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.enabled {
            validate_url("translation.url", &self.url, &mut errors);
            if self.source.trim().is_empty() || self.target.trim().is_empty() {
                errors.push(ValidationError::new(
                    "translation",
                    "source and target languages are required",
                ));
            }
            if self.timeout == 0 {
                errors.push(ValidationError::new(
                    "translation.timeout",
                    "timeout must be at least 1 second",
                ));
            }
        }
        errors
    }
}

/// Speech output. When disabled, utterances are only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// Program invoked once per utterance with the text as last argument.
    pub program: String,
    pub args: Vec<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "espeak-ng".to_string(),
            args: vec!["-v".to_string(), "es".to_string()],
        }
    }
}

impl SpeechConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.enabled && self.program.trim().is_empty() {
            errors.push(ValidationError::new(
                "speech.program",
                "program cannot be empty (disable speech to log instead)",
            ));
        }
        errors
    }
}

/// Emergency SMS delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    /// Gateway that receives `{"to": .., "message": ..}` POSTs. Without one,
    /// messages are only logged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Used until a number is stored with `--set-phone`.
    pub default_phone_number: String,
    /// Request timeout in seconds.
    pub timeout: u64,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            default_phone_number: navassist_store::DEFAULT_PHONE_NUMBER.to_string(),
            timeout: 10,
        }
    }
}

impl SmsConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Some(url) = &self.webhook_url {
            validate_url("sms.webhook_url", url, &mut errors);
        }
        if self.default_phone_number.trim().is_empty() {
            errors.push(ValidationError::new(
                "sms.default_phone_number",
                "phone number cannot be empty",
            ));
        }
        if self.timeout == 0 {
            errors.push(ValidationError::new(
                "sms.timeout",
                "timeout must be at least 1 second",
            ));
        }
        errors
    }
}

fn validate_url(field: &str, url: &str, errors: &mut Vec<ValidationError>) {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        errors.push(ValidationError::new(
            field,
            format!("invalid URL '{url}': must start with http:// or https://"),
        ));
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
    /// The field path (e.g., `ble.scan_timeout`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
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
        .join("navassist")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(err: ConfigError) -> Vec<String> {
        match err {
            ConfigError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_config_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.ble.scan_timeout, 15);
        assert_eq!(config.sms.default_phone_number, "6121692423");
        assert_eq!(config.storage.path, navassist_store::default_db_path());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [ble]
            api_level = 30
            granted = ["bluetooth", "bluetooth_admin", "fine_location"]

            [speech]
            program = "say"
            args = []
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ble.api_level, 30);
        assert_eq!(config.ble.scan_timeout, 15);
        assert_eq!(config.speech.program, "say");
        assert!(config.speech.args.is_empty());
        assert!(config.translation.enabled);

        let env = config.ble.environment();
        assert!(env.can_scan());
        assert!(env.granted.contains(Permission::FineLocation));
        assert!(!env.granted.contains(Permission::BluetoothScan));
    }

    #[test]
    fn test_reconnect_options() {
        let toml = r#"
            [ble.reconnect]
            initial_delay_ms = 500
        "#;
        let mut config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ble.reconnect.max_attempts, 5);
        assert_eq!(config.ble.reconnect_options().max_attempts, Some(5));

        config.ble.reconnect.unlimited = true;
        let options = config.ble.reconnect_options();
        assert_eq!(options.max_attempts, None);
        assert_eq!(options.initial_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_ble_conversions() {
        let ble = BleConfig {
            scan_timeout: 30,
            connection_timeout: 20,
            ..BleConfig::default()
        };
        assert_eq!(ble.service_config().scan_timeout, Duration::from_secs(30));
        assert_eq!(
            ble.connection_config().connection_timeout,
            Duration::from_secs(20)
        );
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = Config::default();
        config.ble.scan_timeout = 0;
        config.ble.reconnect.jitter = 2.0;
        config.geocoding.base_url = "nominatim.local".to_string();
        config.sms.webhook_url = Some("ftp://gateway".to_string());
        config.speech.program = " ".to_string();

        let fields = fields(config.validate().unwrap_err());
        assert_eq!(
            fields,
            vec![
                "ble.scan_timeout",
                "ble.reconnect",
                "geocoding.base_url",
                "speech.program",
                "sms.webhook_url",
            ]
        );
    }

    #[test]
    fn test_disabled_sections_skip_validation() {
        let mut config = Config::default();
        config.translation.enabled = false;
        config.translation.url = String::new();
        config.validate().unwrap();
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.storage.path = PathBuf::from("/tmp/navassist-test.db");
        config.sms.webhook_url = Some("https://sms.example.com/send".to_string());
        config.translation.api_key = Some("secret".to_string());
        config.speech.enabled = false;

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.storage.path, PathBuf::from("/tmp/navassist-test.db"));
        assert_eq!(
            loaded.sms.webhook_url.as_deref(),
            Some("https://sms.example.com/send")
        );
        assert_eq!(loaded.translation.api_key.as_deref(), Some("secret"));
        assert!(!loaded.speech.enabled);
        assert_eq!(loaded.speech.program, "espeak-ng");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/navassist/config.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[ble\nscan_timeout = ").unwrap();
        assert!(matches!(
            Config::load(&path).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }
}
