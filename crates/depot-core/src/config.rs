//! Client configuration
//!
//! Read-only view of the process configuration: one entry per storage node,
//! the fallback token, timeouts and the N+1 enforcement switches. Loaded once
//! at process start and shared by reference afterwards.

use crate::context::ExecutionKind;
use crate::errors::{DepotError, DepotResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that turns N+1 enforcement off entirely.
pub const DISABLE_REQUEST_LIMITS_ENV: &str = "GITALY_DISABLE_REQUEST_LIMITS";

/// Upper bound for background work that opts into the long timeout.
const BACKGROUND_LONG_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// Deployment environment the process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Static configuration of one storage node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Storage name, filled in from the map key when loading.
    #[serde(default)]
    pub name: String,
    /// `scheme://host:port` or `unix:/path`
    #[serde(default)]
    pub address: String,
    /// Per-storage shared secret; falls back to [`ClientConfig::token`].
    #[serde(default)]
    pub token: Option<String>,
}

impl StorageConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Timeout values in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "TimeoutConfig::default_secs")]
    pub default: u64,
    #[serde(default = "TimeoutConfig::medium_secs")]
    pub medium: u64,
    #[serde(default = "TimeoutConfig::fast_secs")]
    pub fast: u64,
}

impl TimeoutConfig {
    fn default_secs() -> u64 {
        55
    }

    fn medium_secs() -> u64 {
        30
    }

    fn fast_secs() -> u64 {
        10
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Self::default_secs(),
            medium: Self::medium_secs(),
            fast: Self::fast_secs(),
        }
    }
}

/// Process-wide client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub storages: BTreeMap<String, StorageConfig>,
    /// Fallback token used by storages without their own.
    #[serde(default)]
    pub token: Option<String>,
    /// Identity sent as `client_name` with every call.
    #[serde(default = "ClientConfig::default_client_name")]
    pub client_name: String,
    #[serde(default)]
    pub environment: Environment,
    /// Turns N+1 enforcement off regardless of environment.
    #[serde(default)]
    pub disable_request_limits: bool,
    /// PEM bundle used to verify `tls://` storages.
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            storages: BTreeMap::new(),
            token: None,
            client_name: Self::default_client_name(),
            environment: Environment::default(),
            disable_request_limits: false,
            ca_bundle: None,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ClientConfig {
    fn default_client_name() -> String {
        "depot-client".to_string()
    }

    /// Parse configuration from a TOML document.
    pub fn from_toml_str(source: &str) -> DepotResult<Self> {
        let mut config: ClientConfig = toml::from_str(source)?;
        for (name, storage) in config.storages.iter_mut() {
            storage.name.clone_from(name);
        }
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> DepotResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            DepotError::configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply overrides taken from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides read through `lookup`, which maps a variable name to
    /// its value.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(DISABLE_REQUEST_LIMITS_ENV) {
            if is_truthy(&value) {
                tracing::info!(
                    env = DISABLE_REQUEST_LIMITS_ENV,
                    "N+1 request limits disabled by environment"
                );
                self.disable_request_limits = true;
            }
        }
    }

    /// Register a storage, replacing any previous entry with the same name.
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storages.insert(storage.name.clone(), storage);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn storage(&self, name: &str) -> Option<&StorageConfig> {
        self.storages.get(name)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.default)
    }

    pub fn medium_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.medium)
    }

    pub fn fast_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.fast)
    }

    /// Timeout for operations expected to run long.
    ///
    /// Interactive requests never get more than the default timeout.
    pub fn long_timeout(&self, kind: &ExecutionKind) -> Duration {
        match kind {
            ExecutionKind::Background => BACKGROUND_LONG_TIMEOUT,
            ExecutionKind::Web { .. } => self.default_timeout(),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        token = "global-secret"
        client_name = "web"
        environment = "production"
        ca_bundle = "/etc/ssl/depot.pem"

        [timeouts]
        fast = 5

        [storages.default]
        address = "tcp://gitaly1:8075"

        [storages.secure]
        address = "tls://gitaly2:9999"
        token = "secure-secret"
    "#;

    #[test]
    fn test_parse_toml_fills_storage_names() {
        let config = ClientConfig::from_toml_str(SAMPLE).unwrap();

        let default = config.storage("default").unwrap();
        assert_eq!(default.name, "default");
        assert_eq!(default.address, "tcp://gitaly1:8075");
        assert_eq!(default.token, None);

        let secure = config.storage("secure").unwrap();
        assert_eq!(secure.token.as_deref(), Some("secure-secret"));
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.client_name, "web");
    }

    #[test]
    fn test_timeouts_fill_defaults() {
        let config = ClientConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.fast_timeout(), Duration::from_secs(5));
        assert_eq!(config.medium_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_timeout(), Duration::from_secs(55));
    }

    #[test]
    fn test_long_timeout_depends_on_execution_kind() {
        let config = ClientConfig::default();
        assert_eq!(
            config.long_timeout(&ExecutionKind::Background),
            Duration::from_secs(6 * 60 * 60)
        );
        assert_eq!(
            config.long_timeout(&ExecutionKind::Web { deadline: None }),
            config.default_timeout()
        );
    }

    #[test]
    fn test_malformed_toml_is_configuration_error() {
        let err = ClientConfig::from_toml_str("storages = 12").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.storages.len(), 2);
    }

    #[test]
    fn test_load_missing_file_is_configuration_error() {
        let err = ClientConfig::load("/nonexistent/depot.toml").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_disable_request_limits_override() {
        let mut config = ClientConfig::default();
        config.apply_overrides_from(|key| {
            (key == DISABLE_REQUEST_LIMITS_ENV).then(|| "true".to_string())
        });
        assert!(config.disable_request_limits);

        for value in ["0", "false", "", "off"] {
            let mut config = ClientConfig::default();
            config.apply_overrides_from(|_| Some(value.to_string()));
            assert!(!config.disable_request_limits, "{value:?} must not disable");
        }

        let mut config = ClientConfig::default();
        config.apply_overrides_from(|_| None);
        assert!(!config.disable_request_limits);
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" TRUE "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}
