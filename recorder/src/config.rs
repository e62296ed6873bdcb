//! Configuration management for the tallyman recorder
//!
//! Settings are loaded from TOML files and `TALLYMAN_*` environment
//! variables and validated before a strategy is built from them.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::value::StrDeserializer;
use serde::de::IntoDeserializer;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::group::{GroupAccountingType, ResourceType};

/// Main configuration structure of the recorder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Accounting and variability settings
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Report output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Network forwarding settings
    #[serde(default)]
    pub tcp: TcpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which strategy processes instrumentation events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Aggregate synchronously on the calling thread
    #[default]
    Default,
    /// Queue events and aggregate on a consumer thread
    Buffered,
    /// Queue events and forward them to a recording server
    Tcp,
}

/// Accounting and variability settings shared by all groups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Strategy used for processing events
    pub strategy: StrategyKind,

    /// Track the contribution of each variant to configuration records
    pub variant_contributions: bool,

    /// Detect active configurations at runtime
    pub configuration_detection: bool,

    /// Global accounting mode for groups declaring `default`
    pub group_accounting: GroupAccountingType,

    /// Resources that may be accounted at all
    pub accountable_resources: Vec<ResourceType>,

    /// Resources of groups that do not declare any
    pub default_group_resources: Vec<ResourceType>,

    /// Multi-groups divide values among members by default
    pub multi_distribute_values: bool,

    /// Multi-groups only feed members accounting the resource by default
    pub multi_consider_contained: bool,

    /// Account excluded regions to the program instead of blocking them
    pub account_excluded: bool,

    /// Threads announce themselves via `register`
    pub register_threads: bool,

    /// Settings without a dedicated field, forwarded verbatim
    pub extra: BTreeMap<String, String>,
}

/// Report output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for relative output files
    pub base_dir: Option<PathBuf>,

    /// Report file, stdout if unset
    pub out_file: Option<String>,

    /// Interval between current-state reports in seconds, 0 disables them
    pub out_interval: u32,

    /// Print statistics when recording ends
    pub print_statistics: bool,
}

/// Network forwarding settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Recording server host
    pub host: String,

    /// Recording server port
    pub port: u16,

    /// Socket read timeout in seconds
    pub read_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON lines instead of plain text
    pub json: bool,

    /// Optional log file
    pub file_path: Option<PathBuf>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Default,
            variant_contributions: false,
            configuration_detection: true,
            group_accounting: GroupAccountingType::Direct,
            accountable_resources: vec![ResourceType::All],
            default_group_resources: vec![ResourceType::All],
            multi_distribute_values: true,
            multi_consider_contained: true,
            account_excluded: false,
            register_threads: false,
            extra: BTreeMap::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            out_file: None,
            out_interval: 0,
            print_statistics: true,
        }
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6002,
            read_timeout_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_path: None,
        }
    }
}

impl OutputConfig {
    /// The report file resolved against `base_dir`
    pub fn resolved_out_file(&self) -> Option<PathBuf> {
        let file = PathBuf::from(self.out_file.as_ref()?);
        match &self.base_dir {
            Some(base) if file.is_relative() => Some(base.join(file)),
            _ => Some(file),
        }
    }
}

impl TcpConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: String) -> ConfigResult<T> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        value,
    })
}

fn parse_env_enum<T: serde::de::DeserializeOwned>(name: &str, value: String) -> ConfigResult<T> {
    let lowered = value.to_lowercase();
    let deserializer: StrDeserializer<'_, serde::de::value::Error> = lowered.as_str().into_deserializer();
    T::deserialize(deserializer).map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        value,
    })
}

impl RecorderConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.to_string_lossy().to_string(),
        })?;

        let config: RecorderConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> ConfigResult<Self> {
        let config = RecorderConfig::default().apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `TALLYMAN_*` environment variables
    pub fn apply_env(mut self) -> ConfigResult<Self> {
        if let Ok(strategy) = std::env::var("TALLYMAN_STRATEGY") {
            self.recording.strategy = parse_env_enum("TALLYMAN_STRATEGY", strategy)?;
        }

        if let Ok(accounting) = std::env::var("TALLYMAN_GROUP_ACCOUNTING") {
            self.recording.group_accounting = parse_env_enum("TALLYMAN_GROUP_ACCOUNTING", accounting)?;
        }

        if let Ok(contributions) = std::env::var("TALLYMAN_VARIANT_CONTRIBUTIONS") {
            self.recording.variant_contributions = parse_env("TALLYMAN_VARIANT_CONTRIBUTIONS", contributions)?;
        }

        if let Ok(out_file) = std::env::var("TALLYMAN_OUT_FILE") {
            self.output.out_file = Some(out_file);
        }

        if let Ok(interval) = std::env::var("TALLYMAN_OUT_INTERVAL") {
            self.output.out_interval = parse_env("TALLYMAN_OUT_INTERVAL", interval)?;
        }

        if let Ok(host) = std::env::var("TALLYMAN_TCP_HOST") {
            self.tcp.host = host;
        }

        if let Ok(port) = std::env::var("TALLYMAN_TCP_PORT") {
            self.tcp.port = parse_env("TALLYMAN_TCP_PORT", port)?;
        }

        if let Ok(log_level) = std::env::var("TALLYMAN_LOG_LEVEL") {
            self.logging.level = log_level;
        }

        Ok(self)
    }

    /// Load configuration with fallback order: file -> env -> defaults
    pub fn load_with_fallback<P: AsRef<Path>>(config_path: Option<P>) -> ConfigResult<Self> {
        let mut config = RecorderConfig::default();

        if let Some(path) = config_path {
            if path.as_ref().exists() {
                config = RecorderConfig::from_file(path)?;
            }
        }

        let config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Merge this configuration with another, preferring values from other
    pub fn merge_with(mut self, other: RecorderConfig) -> Self {
        self.recording = other.recording;
        self.output = other.output;
        self.tcp = other.tcp;
        self.logging = other.logging;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.recording.accountable_resources.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "recording.accountable_resources".to_string(),
                value: "[]".to_string(),
            });
        }

        if self.recording.default_group_resources.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "recording.default_group_resources".to_string(),
                value: "[]".to_string(),
            });
        }

        if self.recording.group_accounting == GroupAccountingType::Default {
            return Err(ConfigError::InvalidValue {
                field: "recording.group_accounting".to_string(),
                value: "default".to_string(),
            });
        }

        if self.recording.strategy == StrategyKind::Tcp {
            if self.tcp.host.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "tcp.host".to_string(),
                });
            }
            if self.tcp.port == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "tcp.port".to_string(),
                    value: "0".to_string(),
                });
            }
        }

        if self.tcp.read_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tcp.read_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "logging.level".to_string(),
                    value: self.logging.level.clone(),
                })
            }
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("tallyman").join("recorder.toml"))
            .ok_or_else(|| ConfigError::ValidationFailed {
                reason: "Unable to determine config directory".to_string(),
            })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_| ConfigError::ValidationFailed {
                reason: format!("Unable to create config directory: {}", parent.display()),
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationFailed { reason: e.to_string() })?;

        fs::write(path, content).map_err(|_| ConfigError::PermissionDenied {
            path: path.to_string_lossy().to_string(),
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recording.group_accounting, GroupAccountingType::Direct);
        assert_eq!(config.tcp.read_timeout_secs, 60);
    }

    #[test]
    fn test_config_validation() {
        let mut config = RecorderConfig::default();

        config.recording.accountable_resources.clear();
        assert!(config.validate().is_err());

        config.recording.accountable_resources = vec![ResourceType::All];
        config.recording.group_accounting = GroupAccountingType::Default;
        assert!(config.validate().is_err());

        config.recording.group_accounting = GroupAccountingType::Indirect;
        config.recording.strategy = StrategyKind::Tcp;
        config.tcp.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "tcp.port"
        ));

        config.tcp.port = 7000;
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_operations() {
        let mut config = RecorderConfig::default();
        config.recording.variant_contributions = true;
        config.recording.extra.insert("scope".to_string(), "sum".to_string());
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded_config = RecorderConfig::from_file(temp_file.path()).unwrap();

        assert_eq!(config, loaded_config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(
            temp_file,
            r#"
[recording]
group_accounting = "indirect"
default_group_resources = ["cpu_time", "memory"]

[output]
out_file = "report.tsv"
base_dir = "/var/tmp"
"#
        )
        .unwrap();

        let config = RecorderConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.recording.group_accounting, GroupAccountingType::Indirect);
        assert_eq!(
            config.recording.default_group_resources,
            vec![ResourceType::CpuTime, ResourceType::Memory]
        );
        assert!(config.recording.multi_distribute_values);
        assert_eq!(
            config.output.resolved_out_file(),
            Some(PathBuf::from("/var/tmp/report.tsv"))
        );
    }

    #[test]
    fn test_missing_file() {
        let result = RecorderConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_config_merge() {
        let mut config1 = RecorderConfig::default();
        config1.output.out_interval = 5;

        let mut config2 = RecorderConfig::default();
        config2.output.out_interval = 10;

        let merged = config1.merge_with(config2);
        assert_eq!(merged.output.out_interval, 10);
    }

    #[test]
    fn test_env_enum_parsing() {
        let kind: StrategyKind = parse_env_enum("TALLYMAN_STRATEGY", "Buffered".to_string()).unwrap();
        assert_eq!(kind, StrategyKind::Buffered);

        let bad: ConfigResult<GroupAccountingType> = parse_env_enum("X", "sideways".to_string());
        assert!(bad.is_err());
    }
}
