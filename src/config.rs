//! Configuration management

use std::{collections::HashMap, env, fmt, path::Path, time::Duration};

use csar_core::RegistryDescriptor;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable overriding the backend storage server URL
pub const BACKEND_ENDPOINT_ENV: &str = "CSAR_ENDPOINT";

/// Backend storage server used when nothing else is configured
pub const DEFAULT_BACKEND_ENDPOINT: &str = "http://127.0.0.1:8070";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Backend storage server
    pub backend: BackendConfig,
    /// Upload form handling
    pub upload: UploadConfig,
    /// Lifecycle notifications
    pub notification: NotificationConfig,
    /// Known projects (namespace -> settings)
    pub projects: HashMap<String, ProjectConfig>,
    /// Replication event worker
    pub events: EventsConfig,
    /// Upload-triggered replication
    pub replication: ReplicationConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // CSAR_GATEWAY_BACKEND__URL etc.
        figment = figment.merge(Env::prefixed("CSAR_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in URLs
    fn expand_env_vars(&mut self) {
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        self.backend.url = Self::expand_string(&re, &self.backend.url);
        if let Some(url) = &mut self.notification.external_url {
            *url = Self::expand_string(&re, url);
        }
        for hook in &mut self.notification.webhooks {
            hook.url = Self::expand_string(&re, &hook.url);
        }
        if let Some(source) = &mut self.replication.source {
            source.url = Self::expand_string(&re, &source.url);
        }
        for target in &mut self.replication.targets {
            target.registry.url = Self::expand_string(&re, &target.registry.url);
        }
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 512 * 1024 * 1024, // 512MB
        }
    }
}

/// Authentication configuration for gateway access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable authentication
    pub enabled: bool,
    /// API keys; the key's name is recorded as the operator of each request
    pub api_keys: Vec<ApiKeyConfig>,
    /// Paths that bypass authentication
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_keys: Vec::new(),
            public_paths: default_public_paths(),
        }
    }
}

/// API key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    /// The API key value (supports `env:VAR_NAME`)
    pub key: Secret,
    /// Operator name for this client
    #[serde(default)]
    pub name: String,
}

/// A secret value or `env:VAR` reference. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a literal value or `env:VAR` reference
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Resolve `env:VAR` references; literals are returned as-is.
    /// A missing variable resolves to the empty string.
    #[must_use]
    pub fn resolve(&self) -> String {
        if let Some(var_name) = self.0.strip_prefix("env:") {
            env::var(var_name).unwrap_or_default()
        } else {
            self.0.clone()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Backend storage server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the storage server
    pub url: String,
    /// Internal service identity used for basic auth
    pub username: String,
    /// Internal service password (literal or `env:VAR`)
    pub secret: Secret,
    /// Connection establishment timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Longest wait for the next read; a streaming transfer may run longer
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: env::var(BACKEND_ENDPOINT_ENV)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_BACKEND_ENDPOINT.to_string()),
            username: "csar_controller".to_string(),
            secret: Secret::new("env:CORE_SECRET"),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(300),
            insecure: false,
        }
    }
}

/// Upload form handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Form fields copied into the rebuilt multipart body
    pub form_fields: Vec<FormFieldConfig>,
    /// Field carrying the artifact itself
    pub artifact_field: String,
    /// Text field carrying the optional version tag
    pub version_field: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            form_fields: vec![
                FormFieldConfig {
                    name: "csar".to_string(),
                    kind: FormFieldKind::File,
                    must_have: true,
                },
                FormFieldConfig {
                    name: "version".to_string(),
                    kind: FormFieldKind::Text,
                    must_have: false,
                },
            ],
            artifact_field: "csar".to_string(),
            version_field: "version".to_string(),
        }
    }
}

/// One multipart form field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormFieldConfig {
    /// Field name
    pub name: String,
    /// File or plain text
    #[serde(default)]
    pub kind: FormFieldKind,
    /// Fail the upload when the field is missing
    #[serde(default)]
    pub must_have: bool,
}

/// Kind of multipart form field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormFieldKind {
    /// File part with a filename
    #[default]
    File,
    /// Plain text value
    Text,
}

/// Lifecycle notification configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotificationConfig {
    /// Externally visible base URL used in resource paths
    pub external_url: Option<String>,
    /// Webhook targets
    pub webhooks: Vec<WebhookTargetConfig>,
    /// Delivery timeout per webhook
    #[serde(with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
}

/// One webhook target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTargetConfig {
    /// Destination URL
    pub url: String,
    /// Topics delivered (empty = all)
    #[serde(default)]
    pub topics: Vec<String>,
    /// Namespaces delivered (empty = all)
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// HMAC-SHA256 signing secret (literal or `env:VAR`)
    #[serde(default)]
    pub secret: Option<Secret>,
}

/// Per-project settings for the static project catalog
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project is publicly visible
    pub public: bool,
}

/// Replication event worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Queue capacity; events beyond it are dropped with a warning
    pub queue_size: usize,
    /// Retry policy per event
    pub retry: RetryConfig,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_size: 256,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries
    pub enabled: bool,
    /// Maximum attempts
    pub max_attempts: u32,
    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Upload-triggered replication
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Registry replicated from; defaults to the backend as a `csar`
    /// registry with the internal credential
    pub source: Option<RegistryDescriptor>,
    /// Destination registries
    pub targets: Vec<ReplicationTargetConfig>,
}

/// One replication destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationTargetConfig {
    /// Destination registry
    pub registry: RegistryDescriptor,
    /// Destination namespace (defaults to the source namespace)
    #[serde(default)]
    pub namespace: Option<String>,
    /// Overwrite an existing artifact with the same name
    #[serde(default, rename = "override")]
    pub override_existing: bool,
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }

    /// Optional variant
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if the string cannot be parsed as a duration.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s: Option<String> = Option::deserialize(deserializer)?;
            s.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
