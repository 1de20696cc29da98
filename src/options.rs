//! Typed, validated exporter configuration.
//!
//! Mirrors the collector's typed sub-config approach (see the teacher's
//! `config.rs`): known fields are plain struct members with sane defaults,
//! and [`Options::from_map`] rejects anything it does not recognize instead
//! of silently ignoring it.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::ConfigError;

const ENV_INSTRUMENTATION_KEY: &str = "APPINSIGHTS_INSTRUMENTATIONKEY";
const DEFAULT_ENDPOINT: &str = "https://dc.services.visualstudio.com/v2/track";

/// Resolved exporter configuration.
#[derive(Debug, Clone)]
pub struct Options {
    pub instrumentation_key: String,
    pub endpoint: String,
    pub timeout: Duration,
    pub storage_path: std::path::PathBuf,
    pub storage_max_size: u64,
    pub storage_maintenance_period: Duration,
    pub storage_retention_period: Duration,
    pub proxies: HashMap<String, String>,
    pub minimum_retry_interval: Duration,
}

impl Options {
    /// Start building [`Options`] from defaults, reading the instrumentation
    /// key from `APPINSIGHTS_INSTRUMENTATIONKEY` if one is not set explicitly.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Build [`Options`] from an untyped key-value map (e.g. a generic
    /// config layer). Unknown keys are a hard error, matching the
    /// constructor contract: a typo must not be silently accepted.
    pub fn from_map(map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = OptionsBuilder::default();
        for (key, value) in map {
            match key.as_str() {
                "instrumentation_key" => {
                    builder = builder.instrumentation_key(value);
                }
                "endpoint" => builder = builder.endpoint(value),
                "timeout" => {
                    let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "timeout".into(),
                        message: format!("'{value}' is not an integer number of seconds"),
                    })?;
                    builder = builder.timeout(Duration::from_secs(secs));
                }
                "storage_path" => builder = builder.storage_path(value),
                "storage_max_size" => {
                    let bytes: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "storage_max_size".into(),
                        message: format!("'{value}' is not an integer byte count"),
                    })?;
                    builder = builder.storage_max_size(bytes);
                }
                "storage_maintenance_period" => {
                    let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "storage_maintenance_period".into(),
                        message: format!("'{value}' is not an integer number of seconds"),
                    })?;
                    builder = builder.storage_maintenance_period(Duration::from_secs(secs));
                }
                "storage_retention_period" => {
                    let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "storage_retention_period".into(),
                        message: format!("'{value}' is not an integer number of seconds"),
                    })?;
                    builder = builder.storage_retention_period(Duration::from_secs(secs));
                }
                "minimum_retry_interval" => {
                    let secs: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: "minimum_retry_interval".into(),
                        message: format!("'{value}' is not an integer number of seconds"),
                    })?;
                    builder = builder.minimum_retry_interval(Duration::from_secs(secs));
                }
                other => return Err(ConfigError::UnknownOption(other.to_string())),
            }
        }
        builder.build()
    }
}

/// Builder for [`Options`]. Only exposes known setters, so unknown fields
/// coming from typed callers are caught at compile time rather than runtime.
#[derive(Debug, Clone)]
pub struct OptionsBuilder {
    instrumentation_key: Option<String>,
    endpoint: String,
    timeout: Duration,
    storage_path: std::path::PathBuf,
    storage_max_size: u64,
    storage_maintenance_period: Duration,
    storage_retention_period: Duration,
    proxies: HashMap<String, String>,
    minimum_retry_interval: Duration,
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        Self {
            instrumentation_key: env::var(ENV_INSTRUMENTATION_KEY).ok(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(10),
            storage_path: std::env::temp_dir().join("azure_monitor_exporter"),
            storage_max_size: 50 * 1024 * 1024,
            storage_maintenance_period: Duration::from_secs(60),
            storage_retention_period: Duration::from_secs(48 * 3600),
            proxies: HashMap::new(),
            minimum_retry_interval: Duration::from_secs(60),
        }
    }
}

impl OptionsBuilder {
    pub fn instrumentation_key(mut self, key: impl Into<String>) -> Self {
        self.instrumentation_key = Some(key.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn storage_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn storage_max_size(mut self, bytes: u64) -> Self {
        self.storage_max_size = bytes;
        self
    }

    pub fn storage_maintenance_period(mut self, period: Duration) -> Self {
        self.storage_maintenance_period = period;
        self
    }

    pub fn storage_retention_period(mut self, period: Duration) -> Self {
        self.storage_retention_period = period;
        self
    }

    pub fn proxy(mut self, scheme: impl Into<String>, url: impl Into<String>) -> Self {
        self.proxies.insert(scheme.into(), url.into());
        self
    }

    pub fn minimum_retry_interval(mut self, interval: Duration) -> Self {
        self.minimum_retry_interval = interval;
        self
    }

    /// Validate the instrumentation key and produce [`Options`].
    pub fn build(self) -> Result<Options, ConfigError> {
        let instrumentation_key = self
            .instrumentation_key
            .ok_or(ConfigError::MissingInstrumentationKey)?;
        uuid::Uuid::parse_str(&instrumentation_key)
            .map_err(|_| ConfigError::InvalidInstrumentationKey(instrumentation_key.clone()))?;

        Ok(Options {
            instrumentation_key,
            endpoint: self.endpoint,
            timeout: self.timeout,
            storage_path: self.storage_path,
            storage_max_size: self.storage_max_size,
            storage_maintenance_period: self.storage_maintenance_period,
            storage_retention_period: self.storage_retention_period,
            proxies: self.proxies,
            minimum_retry_interval: self.minimum_retry_interval,
        })
    }
}
