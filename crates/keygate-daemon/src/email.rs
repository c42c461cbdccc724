//! Email delivery channels.
//!
//! Two implementations of the core notification seam: an HTTP-API-based
//! transactional channel (preferred; SMTP egress is blocked in many
//! hosting environments) and an SMTP relay fallback. Selection happens
//! once at startup from config; an unconfigured or incomplete email
//! section yields no channel and the dispatcher degrades to a no-op.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keygate_core::notify::{NotificationChannel, NotifyError};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde_json::json;
use tracing::warn;

use crate::config::{EmailConfig, EmailService};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the configured delivery channel, if any.
///
/// Missing credentials downgrade to `None` with a warning rather than
/// failing startup: email is best-effort notification, not a hard
/// dependency of the pipeline.
#[must_use]
pub fn channel_from_config(config: &EmailConfig) -> Option<Arc<dyn NotificationChannel>> {
    match config.service {
        EmailService::None => None,
        EmailService::Resend => {
            let Some(from) = config.from.clone() else {
                warn!("email service is resend but [email] from is unset, disabling email");
                return None;
            };
            let Some(api_key) = config.resend_api_key() else {
                warn!("email service is resend but no API key found, disabling email");
                return None;
            };
            match ResendChannel::new(config.resend.api_url.clone(), api_key, from) {
                Ok(channel) => Some(Arc::new(channel)),
                Err(err) => {
                    warn!(error = %err, "failed to build HTTP email channel, disabling email");
                    None
                },
            }
        },
        EmailService::Smtp => {
            let Some(from) = config.from.clone() else {
                warn!("email service is smtp but [email] from is unset, disabling email");
                return None;
            };
            let Some(smtp) = &config.smtp else {
                warn!("email service is smtp but [email.smtp] is unset, disabling email");
                return None;
            };
            match SmtpChannel::new(smtp, from) {
                Ok(channel) => Some(Arc::new(channel)),
                Err(err) => {
                    warn!(error = %err, "failed to build SMTP channel, disabling email");
                    None
                },
            }
        },
    }
}

// =============================================================================
// ResendChannel
// =============================================================================

/// Transactional email over an HTTP API (`POST {api_url}/emails`).
pub struct ResendChannel {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl ResendChannel {
    /// Creates the channel.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be initialized.
    pub fn new(api_url: String, api_key: String, from: String) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            from,
        })
    }
}

#[async_trait]
impl NotificationChannel for ResendChannel {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [to],
                "subject": subject,
                "html": html_body,
            }))
            .send()
            .await
            .map_err(|e| NotifyError(format!("http send: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError(format!("email API returned {status}: {body}")));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "resend"
    }
}

// =============================================================================
// SmtpChannel
// =============================================================================

/// Transactional email over an SMTP relay.
pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpChannel {
    /// Creates the channel from SMTP settings.
    ///
    /// # Errors
    ///
    /// Returns an error when credentials are missing or the relay host
    /// is not a valid transport target.
    pub fn new(config: &crate::config::SmtpConfig, from: String) -> Result<Self, NotifyError> {
        let password = config
            .resolved_password()
            .ok_or_else(|| NotifyError("smtp password not configured".to_string()))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| NotifyError(format!("smtp relay {}: {e}", config.host)))?
            .port(config.port)
            .credentials(Credentials::new(config.username.clone(), password))
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl NotificationChannel for SmtpChannel {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| NotifyError(format!("from address: {e}")))?,
            )
            .to(to
                .parse()
                .map_err(|e| NotifyError(format!("to address: {e}")))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| NotifyError(format!("build message: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError(format!("smtp send: {e}")))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
