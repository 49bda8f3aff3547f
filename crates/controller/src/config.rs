use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use workerauth_network::ListenerConfig;
use workerauth_security::{AeadKms, CertificateFiles};

const DEFAULT_CONFIG_FILE: &str = "config/default.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config file: {0}")]
    Load(String),

    #[error("invalid {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listener: ListenerSection,
    pub worker_auth: WorkerAuthSection,
    pub kms: KmsSection,
    pub default_tls: DefaultTlsSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSection {
    pub listen_addr: String,
    pub handshake_timeout_secs: u64,
    pub max_concurrent_handshakes: usize,
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9201".to_string(),
            handshake_timeout_secs: 30,
            max_concurrent_handshakes: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerAuthSection {
    pub unwrap_timeout_secs: u64,
}

impl Default for WorkerAuthSection {
    fn default() -> Self {
        Self {
            unwrap_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsSection {
    pub key_id: String,
    /// 32-byte key, hex encoded.
    pub key_hex: String,
}

impl std::fmt::Debug for KmsSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsSection")
            .field("key_id", &self.key_id)
            .field("key_hex", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultTlsSection {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected text or json, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Built-in defaults, then the config file, then environment overrides.
    ///
    /// Without an explicit `path`, `config/default.toml` is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut app_config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => AppConfig::default(),
        };

        Self::override_from_env(&mut app_config)?;

        Ok(app_config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Load(format!(
                "{} does not exist",
                path.display()
            )));
        }

        config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|settings| settings.try_deserialize::<AppConfig>())
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
    }

    fn override_from_env(config: &mut AppConfig) -> Result<(), ConfigError> {
        Self::override_from(config, |name| std::env::var(name).ok())
    }

    fn override_from<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen_addr) = lookup("LISTEN_ADDR") {
            config.listener.listen_addr = listen_addr;
        }

        if let Some(timeout) = lookup("HANDSHAKE_TIMEOUT_SECS") {
            config.listener.handshake_timeout_secs = parse_var("HANDSHAKE_TIMEOUT_SECS", &timeout)?;
        }

        if let Some(cap) = lookup("MAX_CONCURRENT_HANDSHAKES") {
            config.listener.max_concurrent_handshakes = parse_var("MAX_CONCURRENT_HANDSHAKES", &cap)?;
        }

        if let Some(timeout) = lookup("UNWRAP_TIMEOUT_SECS") {
            config.worker_auth.unwrap_timeout_secs = parse_var("UNWRAP_TIMEOUT_SECS", &timeout)?;
        }

        if let Some(key_id) = lookup("WORKER_AUTH_KMS_KEY_ID") {
            config.kms.key_id = key_id;
        }

        if let Some(key_hex) = lookup("WORKER_AUTH_KMS_KEY") {
            config.kms.key_hex = key_hex;
        }

        if let Some(cert_path) = lookup("DEFAULT_TLS_CERT_PATH") {
            config.default_tls.cert_path = Some(cert_path).filter(|p| !p.is_empty());
        }

        if let Some(key_path) = lookup("DEFAULT_TLS_KEY_PATH") {
            config.default_tls.key_path = Some(key_path).filter(|p| !p.is_empty());
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.logging.format = parse_var("LOG_FORMAT", &format)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if self.listener.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "handshake_timeout_secs cannot be 0".to_string(),
            ));
        }

        if self.listener.max_concurrent_handshakes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_handshakes cannot be 0".to_string(),
            ));
        }

        if self.worker_auth.unwrap_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "unwrap_timeout_secs cannot be 0".to_string(),
            ));
        }

        self.kms()?;

        match (&self.default_tls.cert_path, &self.default_tls.key_path) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::Invalid(
                    "default_tls needs both cert_path and key_path".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listener
            .listen_addr
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                name: "listen_addr",
                reason: e.to_string(),
            })
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            handshake_timeout: Duration::from_secs(self.listener.handshake_timeout_secs),
            max_concurrent_handshakes: self.listener.max_concurrent_handshakes,
        }
    }

    pub fn unwrap_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_auth.unwrap_timeout_secs)
    }

    pub fn kms(&self) -> Result<AeadKms, ConfigError> {
        if self.kms.key_id.is_empty() {
            return Err(ConfigError::Invalid("kms key_id cannot be empty".to_string()));
        }

        AeadKms::from_hex(self.kms.key_id.clone(), &self.kms.key_hex).map_err(|e| {
            ConfigError::InvalidValue {
                name: "kms key",
                reason: e.to_string(),
            }
        })
    }

    pub fn certificate_files(&self) -> Option<CertificateFiles> {
        match (&self.default_tls.cert_path, &self.default_tls.key_path) {
            (Some(cert_path), Some(key_path)) => Some(CertificateFiles::new(cert_path, key_path)),
            _ => None,
        }
    }
}

fn parse_var<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name,
        reason: e.to_string(),
    })
}
