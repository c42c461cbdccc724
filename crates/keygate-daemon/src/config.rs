//! Daemon configuration parsing.
//!
//! Configuration is a TOML file; delivery credentials may instead come from
//! the environment so they stay out of checked-in config files.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable consulted when `[email.resend] api_key` is unset.
pub const RESEND_API_KEY_ENV: &str = "KEYGATE_RESEND_API_KEY";

/// Environment variable consulted when `[email.smtp] password` is unset.
pub const SMTP_PASSWORD_ENV: &str = "KEYGATE_SMTP_PASSWORD";

/// Environment variable consulted when `[webhook] shared_secret` is unset.
pub const WEBHOOK_SECRET_ENV: &str = "KEYGATE_WEBHOOK_SECRET";

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Durable store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Inbound webhook settings.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Email delivery settings.
    #[serde(default)]
    pub email: EmailConfig,
}

impl DaemonConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.email.service {
            EmailService::Resend | EmailService::Smtp if self.email.from.is_none() => {
                Err(ConfigError::Validation(
                    "[email] from is required when an email service is configured".to_string(),
                ))
            },
            EmailService::Smtp if self.email.smtp.is_none() => Err(ConfigError::Validation(
                "[email.smtp] section is required when service = \"smtp\"".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Returns the webhook shared secret from config or environment.
    #[must_use]
    pub fn webhook_secret(&self) -> Option<String> {
        self.webhook
            .shared_secret
            .clone()
            .or_else(|| std::env::var(WEBHOOK_SECRET_ENV).ok())
            .filter(|s| !s.is_empty())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:3000".parse().expect("valid literal address")
}

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("keygate.db")
}

/// Inbound webhook settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared secret expected in the `x-signature` header.
    ///
    /// When neither this nor the environment variable is set, signature
    /// verification is skipped (logged at warn on startup).
    #[serde(default)]
    pub shared_secret: Option<String>,
}

/// Which delivery channel to use for activation emails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailService {
    /// No delivery channel; notification becomes a no-op.
    #[default]
    None,
    /// HTTP-API-based transactional email (preferred).
    Resend,
    /// SMTP fallback.
    Smtp,
}

/// Email delivery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Selected delivery channel.
    #[serde(default)]
    pub service: EmailService,

    /// Sender address, e.g. `Store <noreply@example.com>`.
    #[serde(default)]
    pub from: Option<String>,

    /// HTTP API settings, used when `service = "resend"`.
    #[serde(default)]
    pub resend: ResendConfig,

    /// SMTP settings, required when `service = "smtp"`.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

impl EmailConfig {
    /// Returns the HTTP API key from config or environment.
    #[must_use]
    pub fn resend_api_key(&self) -> Option<String> {
        self.resend
            .api_key
            .clone()
            .or_else(|| std::env::var(RESEND_API_KEY_ENV).ok())
            .filter(|s| !s.is_empty())
    }
}

/// Settings for the HTTP-API email channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResendConfig {
    /// API key; falls back to [`RESEND_API_KEY_ENV`].
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL.
    #[serde(default = "default_resend_api_url")]
    pub api_url: String,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_resend_api_url(),
        }
    }
}

fn default_resend_api_url() -> String {
    "https://api.resend.com".to_string()
}

/// Settings for the SMTP email channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP relay host.
    pub host: String,

    /// Relay port (implicit-TLS).
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Relay username.
    pub username: String,

    /// Relay password; falls back to [`SMTP_PASSWORD_ENV`].
    #[serde(default)]
    pub password: Option<String>,
}

impl SmtpConfig {
    /// Returns the relay password from config or environment.
    #[must_use]
    pub fn resolved_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var(SMTP_PASSWORD_ENV).ok())
            .filter(|s| !s.is_empty())
    }
}

const fn default_smtp_port() -> u16 {
    465
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse failure.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantic validation failure.
    #[error("invalid config: {0}")]
    Validation(String),
}
