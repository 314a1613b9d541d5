use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("JWT secret must not be empty")]
    EmptySecret,
    #[error("invalid listen address {0}")]
    BadAddress(String),
    #[error("persist attempts must be at least 1")]
    NoPersistAttempts,
    #[error("max upload size must be greater than zero")]
    NoUploadSize,
    #[error("TLS needs both a certificate and a key")]
    PartialTls,
    #[error("pong timeout must be greater than zero while pings are enabled")]
    ZeroPongTimeout,
}

/// SocialX realtime server
#[derive(Parser, Debug, Clone)]
#[command(name = "socialx-realtime", version, about = "SocialX presence and messaging server")]
pub struct Config {
    #[arg(long, env = "SOCIALX_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    #[arg(long, env = "SOCIALX_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Shared secret the HS256 session tokens are signed with
    #[arg(long, env = "SOCIALX_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Directory uploaded media is written to and served from
    #[arg(long, env = "SOCIALX_UPLOADS_DIR", default_value = "uploads")]
    pub uploads_dir: PathBuf,

    #[arg(long, env = "SOCIALX_MAX_UPLOAD_BYTES", default_value_t = 5 * 1024 * 1024)]
    pub max_upload_bytes: u64,

    #[arg(long, env = "SOCIALX_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    #[arg(long, env = "SOCIALX_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Comma separated; empty allows any origin
    #[arg(long, env = "SOCIALX_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    #[arg(long, env = "SOCIALX_PERSIST_ATTEMPTS", default_value_t = 3)]
    pub persist_attempts: u32,

    #[arg(long, env = "SOCIALX_PERSIST_BACKOFF_MS", default_value_t = 100)]
    pub persist_backoff_ms: u64,

    /// Seconds between keepalive pings; 0 disables them
    #[arg(long, env = "SOCIALX_PING_INTERVAL_SECS", default_value_t = 30)]
    pub ping_interval_secs: u64,

    #[arg(long, env = "SOCIALX_PONG_TIMEOUT_SECS", default_value_t = 10)]
    pub pong_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.persist_attempts == 0 {
            return Err(ConfigError::NoPersistAttempts);
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::NoUploadSize);
        }
        if self.ping_interval_secs > 0 && self.pong_timeout_secs == 0 {
            return Err(ConfigError::ZeroPongTimeout);
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::PartialTls);
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        addr.parse().map_err(|_| ConfigError::BadAddress(addr))
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            persist_attempts: self.persist_attempts,
            persist_backoff: Duration::from_millis(self.persist_backoff_ms),
            ping_interval: (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs),
        }
    }
}

/// Tuning for the realtime core, split out of [`Config`] so tests can build
/// a hub without going through the command line.
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub persist_attempts: u32,
    pub persist_backoff: Duration,
    pub ping_interval: Option<Duration>,
    pub pong_timeout: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            persist_attempts: 3,
            persist_backoff: Duration::from_millis(100),
            ping_interval: Some(Duration::from_secs(30)),
            pong_timeout: Duration::from_secs(10),
        }
    }
}
