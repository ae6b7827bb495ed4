//! Platform configuration.
//!
//! Values the session falls back to when a call does not pass them
//! explicitly are read through the [`ConfigSource`] capability using the
//! `rapyutaio.*` keys below. [`PlatformConfig`] is the usual source, loaded
//! from `RIO_*` environment variables or a JSON file.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AuthError, Result};

/// Configuration key for the default project scope.
pub const PROJECT_ID: &str = "rapyutaio.project_id";
/// Configuration key for a static bearer token.
pub const AUTH_TOKEN: &str = "rapyutaio.auth_token";
/// Configuration key for the login user name.
pub const USERNAME: &str = "rapyutaio.username";
/// Configuration key for the login password.
pub const PASSWORD: &str = "rapyutaio.password";

/// Read-only access to configuration values by key.
pub trait ConfigSource: Send + Sync {
    /// Look a value up; blank values count as absent.
    fn get(&self, key: &str) -> Option<String>;
}

/// A fixed map of configuration values.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    values: HashMap<String, String>,
}

impl StaticConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

impl ConfigSource for StaticConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Settings the session needs beyond the key/value fallbacks.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Login endpoint URL.
    pub login_url: String,
    /// Requested lifetime of issued tokens.
    pub token_validity: Duration,
    /// Safety margin subtracted from the token lifetime.
    pub expiry_skew: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        PlatformConfig::default().session_settings()
    }
}

/// Configuration for talking to the platform.
#[derive(Clone, Deserialize)]
pub struct PlatformConfig {
    /// Catalog API host (packages, networks, deployments).
    #[serde(default = "PlatformConfig::default_catalog_host")]
    pub catalog_host: String,

    /// Core API host (device manager).
    #[serde(default = "PlatformConfig::default_core_host")]
    pub core_host: String,

    /// Authentication host (login).
    #[serde(default = "PlatformConfig::default_auth_host")]
    pub auth_host: String,

    /// Default project scope.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Login user name (email).
    #[serde(default)]
    pub username: Option<String>,

    /// Login password.
    #[serde(default)]
    pub password: Option<String>,

    /// Static bearer token; when set, login is never attempted.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Requested token lifetime in seconds.
    #[serde(default = "PlatformConfig::default_token_validity")]
    pub token_validity_seconds: u64,

    /// Seconds subtracted from the token lifetime to avoid using a token at
    /// the edge of its validity.
    #[serde(default = "PlatformConfig::default_expiry_skew")]
    pub expiry_skew_seconds: u64,

    /// Seconds between provisioning status polls.
    #[serde(default = "PlatformConfig::default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Maximum number of provisioning status polls.
    #[serde(default = "PlatformConfig::default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    /// Maximum total provisioning wait in seconds.
    #[serde(default = "PlatformConfig::default_poll_max_wait")]
    pub poll_max_wait_seconds: u64,

    /// HTTP request timeout in seconds.
    #[serde(default = "PlatformConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Directory of the durable credential store; in-memory when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl PlatformConfig {
    fn default_catalog_host() -> String {
        "https://gacatalog.apps.rapyuta.io".to_string()
    }

    fn default_core_host() -> String {
        "https://gaapiserver.apps.rapyuta.io".to_string()
    }

    fn default_auth_host() -> String {
        "https://garip.apps.rapyuta.io".to_string()
    }

    const fn default_token_validity() -> u64 {
        86_400 // 24 hours
    }

    const fn default_expiry_skew() -> u64 {
        60
    }

    const fn default_poll_interval() -> u64 {
        10
    }

    const fn default_poll_max_attempts() -> u32 {
        180
    }

    const fn default_poll_max_wait() -> u64 {
        1800 // 30 minutes
    }

    const fn default_request_timeout() -> u64 {
        30
    }

    /// Load configuration from `RIO_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from a JSON file; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            AuthError::Configuration(format!("invalid config {}: {e}", path.display()))
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn number<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
            default: T,
        ) -> Result<T> {
            match lookup(name) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| AuthError::Configuration(format!("{name} must be a number"))),
                None => Ok(default),
            }
        }

        let defaults = Self::default();
        Ok(Self {
            catalog_host: lookup("RIO_CATALOG_HOST").unwrap_or(defaults.catalog_host),
            core_host: lookup("RIO_CORE_HOST").unwrap_or(defaults.core_host),
            auth_host: lookup("RIO_AUTH_HOST").unwrap_or(defaults.auth_host),
            project_id: lookup("RIO_PROJECT_ID"),
            username: lookup("RIO_USERNAME"),
            password: lookup("RIO_PASSWORD"),
            auth_token: lookup("RIO_AUTH_TOKEN"),
            token_validity_seconds: number(
                &lookup,
                "RIO_TOKEN_VALIDITY_SECONDS",
                defaults.token_validity_seconds,
            )?,
            expiry_skew_seconds: number(
                &lookup,
                "RIO_EXPIRY_SKEW_SECONDS",
                defaults.expiry_skew_seconds,
            )?,
            poll_interval_seconds: number(
                &lookup,
                "RIO_POLL_INTERVAL_SECONDS",
                defaults.poll_interval_seconds,
            )?,
            poll_max_attempts: number(&lookup, "RIO_POLL_MAX_ATTEMPTS", defaults.poll_max_attempts)?,
            poll_max_wait_seconds: number(
                &lookup,
                "RIO_POLL_MAX_WAIT_SECONDS",
                defaults.poll_max_wait_seconds,
            )?,
            request_timeout_seconds: number(
                &lookup,
                "RIO_REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
            data_dir: lookup("RIO_DATA_DIR").map(PathBuf::from),
        })
    }

    /// Get the login endpoint URL.
    #[must_use]
    pub fn login_url(&self) -> String {
        format!("{}/user/login", self.auth_host.trim_end_matches('/'))
    }

    /// Get the provisioning poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Get the maximum provisioning wait as a `Duration`.
    #[must_use]
    pub const fn poll_max_wait(&self) -> Duration {
        Duration::from_secs(self.poll_max_wait_seconds)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Settings for building a [`crate::Session`].
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            login_url: self.login_url(),
            token_validity: Duration::from_secs(self.token_validity_seconds),
            expiry_skew: Duration::from_secs(self.expiry_skew_seconds),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            catalog_host: Self::default_catalog_host(),
            core_host: Self::default_core_host(),
            auth_host: Self::default_auth_host(),
            project_id: None,
            username: None,
            password: None,
            auth_token: None,
            token_validity_seconds: Self::default_token_validity(),
            expiry_skew_seconds: Self::default_expiry_skew(),
            poll_interval_seconds: Self::default_poll_interval(),
            poll_max_attempts: Self::default_poll_max_attempts(),
            poll_max_wait_seconds: Self::default_poll_max_wait(),
            request_timeout_seconds: Self::default_request_timeout(),
            data_dir: None,
        }
    }
}

impl ConfigSource for PlatformConfig {
    fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            PROJECT_ID => self.project_id.as_ref(),
            AUTH_TOKEN => self.auth_token.as_ref(),
            USERNAME => self.username.as_ref(),
            PASSWORD => self.password.as_ref(),
            _ => None,
        };
        value.filter(|v| !v.trim().is_empty()).cloned()
    }
}

impl fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("catalog_host", &self.catalog_host)
            .field("core_host", &self.core_host)
            .field("auth_host", &self.auth_host)
            .field("project_id", &self.project_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("token_validity_seconds", &self.token_validity_seconds)
            .field("poll_interval_seconds", &self.poll_interval_seconds)
            .field("poll_max_attempts", &self.poll_max_attempts)
            .field("poll_max_wait_seconds", &self.poll_max_wait_seconds)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = PlatformConfig::default();
        assert_eq!(config.catalog_host, "https://gacatalog.apps.rapyuta.io");
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.login_url(), "https://garip.apps.rapyuta.io/user/login");
        assert!(config.project_id.is_none());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: PlatformConfig =
            serde_json::from_str(r#"{"project_id": "project-1", "poll_interval_seconds": 2}"#)
                .unwrap();
        assert_eq!(config.project_id.as_deref(), Some("project-1"));
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.token_validity_seconds, 86_400);
    }

    #[test]
    fn lookup_reads_rio_variables() {
        let vars: HashMap<&str, &str> = [
            ("RIO_PROJECT_ID", "project-env"),
            ("RIO_USERNAME", "ops@example.com"),
            ("RIO_POLL_MAX_ATTEMPTS", "7"),
        ]
        .into_iter()
        .collect();

        let config =
            PlatformConfig::from_lookup(|name| vars.get(name).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.project_id.as_deref(), Some("project-env"));
        assert_eq!(config.username.as_deref(), Some("ops@example.com"));
        assert_eq!(config.poll_max_attempts, 7);
        assert_eq!(config.core_host, "https://gaapiserver.apps.rapyuta.io");
    }

    #[test]
    fn lookup_rejects_bad_numbers() {
        let result = PlatformConfig::from_lookup(|name| {
            (name == "RIO_POLL_INTERVAL_SECONDS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(AuthError::Configuration(_))));
    }

    #[test]
    fn config_source_keys() {
        let config = PlatformConfig {
            project_id: Some("project-1".to_string()),
            password: Some("   ".to_string()),
            ..PlatformConfig::default()
        };
        assert_eq!(config.get(PROJECT_ID).as_deref(), Some("project-1"));
        assert_eq!(config.get(PASSWORD), None);
        assert_eq!(config.get("unknown"), None);
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = PlatformConfig {
            password: Some("hunter2".to_string()),
            auth_token: Some("tok".to_string()),
            ..PlatformConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("\"tok\""));
    }

    #[test]
    fn static_config_ignores_blank_values() {
        let config = StaticConfig::new().with(PROJECT_ID, "p").with(USERNAME, "");
        assert_eq!(config.get(PROJECT_ID).as_deref(), Some("p"));
        assert_eq!(config.get(USERNAME), None);
    }
}
