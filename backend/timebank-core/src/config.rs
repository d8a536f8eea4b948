// src/config.rs
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const DEFAULT_JWT_EXPIRATION_HOURS: i64 = 12;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

fn default_server_host() -> String {
    DEFAULT_SERVER_HOST.to_string()
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_jwt_expiration_hours() -> i64 {
    DEFAULT_JWT_EXPIRATION_HOURS
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

/// Settings every command needs.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Server
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_environment")]
    pub environment: String,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,

    // Record store; in-memory when no directory is set
    pub store_dir: Option<PathBuf>,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Comma separated; these users always resolve as admins.
    #[serde(default)]
    pub admin_emails: Vec<String>,
}

/// Session and Google OAuth settings, only required to serve the API.
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiration_hours")]
    pub jwt_expiration_hours: i64,

    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_redirect_uri: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv::dotenv().ok();
        let config = envy::from_env::<Config>().map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(AppError::Config(
                "CERT_PATH and KEY_PATH must be set together".into(),
            ));
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.server_host, self.server_port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid server address: {}", e)))
    }

    /// Both TLS paths, when HTTPS is configured.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }
}

impl AuthConfig {
    /// Reads the auth settings; call after `Config::from_env` has loaded `.env`.
    pub fn from_env() -> Result<Self, AppError> {
        let config =
            envy::from_env::<AuthConfig>().map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(AppError::Config("JWT_SECRET must not be empty".into()));
        }
        if self.jwt_expiration_hours <= 0 {
            return Err(AppError::Config(
                "JWT_EXPIRATION_HOURS must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn jwt_secret_bytes(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }
}
