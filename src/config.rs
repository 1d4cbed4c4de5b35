//! Configuration manager for portal.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of current instance.
    pub url: String,
    /// Listening port.
    pub port: u16,
    #[serde(skip_deserializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Which services back identities, documents and files.
    pub backend: Backend,
    /// Related to Firebase configuration.
    #[serde(skip_serializing)]
    pub firebase: Option<Firebase>,
    /// Related to Argon2 configuration (in-memory backend only).
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to browser sessions.
    pub session: Session,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_CRATE_NAME").to_owned(),
            url: format!("http://localhost:{DEFAULT_PORT}/"),
            port: DEFAULT_PORT,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            backend: Backend::default(),
            firebase: None,
            argon2: None,
            session: Session::default(),
        }
    }
}

/// Backing services.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Everything kept in process memory. Lost on restart.
    #[default]
    Memory,
    /// Firebase Authentication, Firestore and Cloud Storage.
    Firebase,
}

/// Firebase configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firebase {
    /// Web API key. `FIREBASE_API_KEY` takes precedence.
    #[serde(default)]
    pub api_key: String,
    pub project_id: String,
    /// Cloud Storage bucket, e.g. `my-project.appspot.com`.
    pub storage_bucket: String,
    /// Firestore database name.
    pub database: Option<String>,
    /// Redirect URI declared for external identity providers.
    pub idp_request_uri: Option<String>,
    /// Endpoint overrides, e.g. for the local emulator suite.
    pub identity_url: Option<String>,
    pub token_url: Option<String>,
    pub firestore_url: Option<String>,
    pub storage_url: Option<String>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Browser session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// Refresh access tokens this many seconds before they expire.
    pub refresh_margin_secs: u64,
    /// Forget browser contexts idle for longer than this.
    pub idle_timeout_secs: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            refresh_margin_secs: 60,
            idle_timeout_secs: 30 * 60,
        }
    }
}

impl Session {
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path: &Path = if self.path.is_file() {
            &self.path
        } else {
            Path::new(DEFAULT_CONFIG_PATH)
        };

        match fs::read_to_string(file_path) {
            Ok(yaml) => match self.parse(&yaml) {
                Ok(config) => Ok(Arc::new(config)),
                Err(ConfigError::Deserialize(err)) => Ok(Arc::new(self.error(err))),
                Err(ConfigError::Url(err)) => Err(err),
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Same as [`Configuration::read`] on an in-memory YAML document.
    pub fn parse(&self, yaml: &str) -> Result<Self, ConfigError> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(self.finish(config)?)
    }

    fn finish(&self, mut config: Configuration) -> Result<Self, url::ParseError> {
        // set app version.
        config.version = VERSION.to_owned();
        config.path.clone_from(&self.path);

        // normalize URLs.
        config.url = self.normalize_url(&config.url)?;

        if let Some(firebase) = config.firebase.as_mut() {
            if let Ok(key) = std::env::var("FIREBASE_API_KEY") {
                firebase.api_key = key;
            }
        }

        Ok(config)
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid, using defaults");
        Self {
            path: self.path.clone(),
            ..Default::default()
        }
    }
}

/// Errors while parsing a configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("URL is invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[from] serde_yaml::Error),
}
