//! Configuration management for attachment storage
//!
//! Storage settings come from a [`ConfigSource`] (a per-environment YAML file,
//! the process environment, or a fixed value) and are memoized by
//! [`ConnectionConfig`] the first time any of them is needed.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::ConfigError;

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Environment used by [`FileSource::for_current_env`] when `APP_ENV` is unset
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Storage settings for one deployment environment
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StorageSettings {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    #[serde(default)]
    pub private: bool,
    /// Signed URL lifetime in seconds
    pub expires: Option<u64>,
    #[serde(default)]
    pub secure: bool,
}

impl StorageSettings {
    fn has_credentials(&self) -> bool {
        non_empty(&self.access_key_id).is_some() && non_empty(&self.secret_access_key).is_some()
    }

    /// Copy every value present in `other` over this record.
    fn populate(&mut self, other: StorageSettings) {
        if other.access_key_id.is_some() {
            self.access_key_id = other.access_key_id;
        }
        if other.secret_access_key.is_some() {
            self.secret_access_key = other.secret_access_key;
        }
        if other.bucket.is_some() {
            self.bucket = other.bucket;
        }
        if other.endpoint.is_some() {
            self.endpoint = other.endpoint;
        }
        if other.region.is_some() {
            self.region = other.region;
        }
        if other.expires.is_some() {
            self.expires = other.expires;
        }
        self.private = other.private;
        self.secure = other.secure;
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Where storage settings come from
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<StorageSettings, ConfigError>;
}

/// YAML file keyed by environment name:
///
/// ```yaml
/// production:
///   access_key_id: ${S3_ACCESS_KEY_ID}
///   secret_access_key: ${S3_SECRET_ACCESS_KEY}
///   bucket: attachments
///   private: true
///   expires: 3600
/// ```
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    environment: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            environment: environment.into(),
        }
    }

    /// Use the environment named by `APP_ENV`
    pub fn for_current_env(path: impl Into<PathBuf>) -> Self {
        let environment = env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
        Self::new(path, environment)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<StorageSettings, ConfigError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Unreadable {
            path: self.path.clone(),
            source,
        })?;

        let expanded = expand_env(&raw, |name| env::var(name).ok());

        let mut environments: HashMap<String, StorageSettings> = serde_yaml::from_str(&expanded)
            .map_err(|source| ConfigError::Malformed {
                path: self.path.clone(),
                source,
            })?;

        environments
            .remove(&self.environment)
            .ok_or_else(|| ConfigError::MissingEnvironment {
                path: self.path.clone(),
                environment: self.environment.clone(),
            })
    }
}

/// Replace `${NAME}` placeholders using `lookup`. Unknown names expand to nothing.
fn expand_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&lookup(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

/// Settings from `S3_*` environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn load(&self) -> Result<StorageSettings, ConfigError> {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());

        let expires = match var("S3_EXPIRES") {
            Some(raw) => Some(raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "expires",
                value: raw.clone(),
            })?),
            None => None,
        };

        Ok(StorageSettings {
            access_key_id: var("S3_ACCESS_KEY_ID"),
            secret_access_key: var("S3_SECRET_ACCESS_KEY"),
            bucket: var("S3_BUCKET"),
            endpoint: var("S3_ENDPOINT"),
            region: var("S3_REGION"),
            private: parse_flag("private", var("S3_PRIVATE"))?,
            expires,
            secure: parse_flag("secure", var("S3_SECURE"))?,
        })
    }
}

fn parse_flag(field: &'static str, raw: Option<String>) -> Result<bool, ConfigError> {
    let normalized = raw.as_deref().map(str::to_ascii_lowercase);
    match normalized.as_deref() {
        None => Ok(false),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::InvalidValue {
            field,
            value: raw.unwrap_or_default(),
        }),
    }
}

/// Fixed settings, for embedding and tests
#[derive(Debug, Clone)]
pub struct StaticSource(pub StorageSettings);

impl ConfigSource for StaticSource {
    fn load(&self) -> Result<StorageSettings, ConfigError> {
        Ok(self.0.clone())
    }
}

/// Lazily loaded, memoized storage configuration.
///
/// Nothing is read until the first accessor call. Loads are serialized, and a
/// load is skipped once credentials are present unless [`ConnectionConfig::reload`]
/// forces it.
pub struct ConnectionConfig {
    source: Box<dyn ConfigSource>,
    settings: Mutex<Option<StorageSettings>>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("loaded", &self.settings.lock().is_some())
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            settings: Mutex::new(None),
        }
    }

    /// Configuration backed by already-known settings
    pub fn from_settings(settings: StorageSettings) -> Self {
        Self::new(StaticSource(settings))
    }

    /// Populate settings from the source. No-op once credentials are populated.
    pub fn load(&self) -> Result<(), ConfigError> {
        let mut guard = self.settings.lock();
        if guard.as_ref().is_some_and(StorageSettings::has_credentials) {
            return Ok(());
        }
        let loaded = self.source.load()?;
        guard.get_or_insert_with(StorageSettings::default).populate(loaded);
        tracing::debug!("Storage configuration loaded");
        Ok(())
    }

    /// Re-read the source, replacing whatever was loaded before
    pub fn reload(&self) -> Result<(), ConfigError> {
        let loaded = self.source.load()?;
        *self.settings.lock() = Some(loaded);
        tracing::debug!("Storage configuration reloaded");
        Ok(())
    }

    /// Read a value, loading first when `wanted` says the value is missing.
    fn read<T>(
        &self,
        wanted: impl Fn(&StorageSettings) -> bool,
        get: impl Fn(&StorageSettings) -> T,
    ) -> Result<T, ConfigError> {
        let needs_load = self.settings.lock().as_ref().map_or(true, |s| !wanted(s));
        if needs_load {
            self.load()?;
        }
        let guard = self.settings.lock();
        let settings = guard.as_ref().ok_or(ConfigError::MissingField("settings"))?;
        Ok(get(settings))
    }

    /// Validated access key id and secret
    pub fn credentials(&self) -> Result<(String, String), ConfigError> {
        let (key, secret) = self.read(StorageSettings::has_credentials, |s| {
            (s.access_key_id.clone(), s.secret_access_key.clone())
        })?;
        let key = non_empty(&key).ok_or(ConfigError::MissingField("access_key_id"))?;
        let secret = non_empty(&secret).ok_or(ConfigError::MissingField("secret_access_key"))?;
        Ok((key.to_string(), secret.to_string()))
    }

    pub fn bucket(&self) -> Result<String, ConfigError> {
        let bucket = self.read(|s| non_empty(&s.bucket).is_some(), |s| s.bucket.clone())?;
        non_empty(&bucket)
            .map(str::to_string)
            .ok_or(ConfigError::MissingField("bucket"))
    }

    pub fn endpoint(&self) -> Result<Option<String>, ConfigError> {
        self.read(|_| true, |s| non_empty(&s.endpoint).map(str::to_string))
    }

    pub fn region(&self) -> Result<String, ConfigError> {
        self.read(|_| true, |s| {
            non_empty(&s.region).unwrap_or(DEFAULT_REGION).to_string()
        })
    }

    pub fn expires(&self) -> Result<Option<Duration>, ConfigError> {
        self.read(|_| true, |s| s.expires.map(Duration::from_secs))
    }

    pub fn is_private(&self) -> Result<bool, ConfigError> {
        self.read(|_| true, |s| s.private)
    }

    pub fn is_secure(&self) -> Result<bool, ConfigError> {
        self.read(|_| true, |s| s.secure)
    }
}

/// HTTP server settings for the binary
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
        }
    }
}
