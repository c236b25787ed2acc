//! Server configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then environment
//! variables. Command-line flags are applied last by `main`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use parla_core::{CoordinatorConfig, LangCode, SpeakerLeftPolicy};
use parla_net::{ServerOptions, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "parla.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Unset leaves the gateway unconfigured
    pub deepl_auth_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            deepl_auth_key: None,
            api_url: None,
            timeout_ms: 10_000,
        }
    }
}

impl TranslationConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_addr: IpAddr,
    /// Secret for creating rooms through a speaker join; unset disables it
    pub admin_secret: Option<String>,
    pub target_languages: Vec<LangCode>,
    pub translation: TranslationConfig,
    pub speaker_left_policy: SpeakerLeftPolicy,
    pub idle_timeout_secs: u64,
    pub max_frame_bytes: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            admin_secret: None,
            target_languages: ["EN-US", "IT", "CS"].into_iter().map(LangCode::new).collect(),
            translation: TranslationConfig::default(),
            speaker_left_policy: SpeakerLeftPolicy::default(),
            idle_timeout_secs: 60,
            max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the config file, then the environment.
    ///
    /// An explicitly named file must exist; the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from environment variables looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PORT") {
            self.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var: "PORT", value })?;
        }
        if let Some(value) = lookup("BIND_ADDR") {
            self.bind_addr = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var: "BIND_ADDR", value })?;
        }
        if let Some(value) = lookup("ROOM_CREATION_ADMIN_SECRET") {
            self.admin_secret = Some(value);
        }
        if let Some(value) = lookup("DEEPL_AUTH_KEY") {
            self.translation.deepl_auth_key = Some(value);
        }
        if let Some(value) = lookup("DEEPL_API_URL") {
            self.translation.api_url = Some(value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.target_languages.is_empty() {
            return Err(ConfigError::Invalid("target_languages must not be empty".into()));
        }
        for (i, lang) in self.target_languages.iter().enumerate() {
            if lang.as_str().is_empty() {
                return Err(ConfigError::Invalid("target_languages contains an empty code".into()));
            }
            if self.target_languages[..i].contains(lang) {
                return Err(ConfigError::Invalid(format!(
                    "target_languages lists {lang} more than once"
                )));
            }
        }
        if self.translation.timeout_ms == 0 {
            return Err(ConfigError::Invalid("translation.timeout_ms must be positive".into()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// Secret that gates room creation; empty counts as unset
    pub fn creation_secret(&self) -> Option<&str> {
        self.admin_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn deepl_key(&self) -> Option<&str> {
        self.translation
            .deepl_auth_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            admin_secret: self.creation_secret().map(str::to_string),
            speaker_left_policy: self.speaker_left_policy,
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            bind_addr: SocketAddr::new(self.bind_addr, self.port),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_frame_bytes: self.max_frame_bytes,
            ..ServerOptions::default()
        }
    }
}

/// `<config_dir>/parla.toml`, if the platform has a config directory
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "parla", "parla").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
