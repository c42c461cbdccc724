//! Notification dispatch: best-effort buyer email after issuance.
//!
//! By the time the dispatcher runs, the token and account state are already
//! durable. A send failure is logged and swallowed; it never rolls back
//! issuance or fails the request. An unconfigured channel is a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::account::ResolvedAccount;
use crate::event::PurchaseEvent;
use crate::issuer::{IssuedToken, TOKEN_VALIDITY_DAYS};

/// Error emitted by notification channel implementations.
#[derive(Debug, Error)]
#[error("notification channel error: {0}")]
pub struct NotifyError(pub String);

/// Delivery channel for transactional email.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Sends an HTML email.
    ///
    /// # Errors
    ///
    /// Returns an error when the channel could not deliver the message.
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError>;

    /// Returns the channel name for logging.
    fn name(&self) -> &'static str;
}

/// Outcome of a dispatch attempt, observable for tests and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The channel accepted the message.
    Sent,
    /// The channel failed; the failure was logged and swallowed.
    Failed,
    /// No channel is configured.
    Skipped,
}

/// Selects the message variant and sends it through the configured channel.
pub struct NotificationDispatcher {
    channel: Option<Arc<dyn NotificationChannel>>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher; `None` disables delivery entirely.
    #[must_use]
    pub fn new(channel: Option<Arc<dyn NotificationChannel>>) -> Self {
        Self { channel }
    }

    /// Returns `true` when a delivery channel is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.channel.is_some()
    }

    /// Sends the activation email for a processed purchase.
    ///
    /// Never fails: channel errors are logged and reported as
    /// [`Delivery::Failed`] so the pipeline can still answer success.
    pub async fn notify(
        &self,
        account: &ResolvedAccount,
        token: &IssuedToken,
        event: &PurchaseEvent,
    ) -> Delivery {
        let Some(channel) = &self.channel else {
            warn!("no notification channel configured, skipping email");
            return Delivery::Skipped;
        };

        let (subject, html) = if account.is_new {
            new_account_email(event, token, account.password.as_deref().unwrap_or_default())
        } else {
            existing_account_email(event, token)
        };

        match channel.send(&event.email, &subject, &html).await {
            Ok(()) => {
                info!(
                    channel = channel.name(),
                    to = %event.email,
                    variant = if account.is_new { "new_account" } else { "existing_account" },
                    "activation email sent"
                );
                Delivery::Sent
            },
            Err(err) => {
                warn!(
                    channel = channel.name(),
                    to = %event.email,
                    error = %err,
                    "activation email failed, token already issued"
                );
                Delivery::Failed
            },
        }
    }
}

/// Subject and body for a buyer whose account was just provisioned.
#[must_use]
pub fn new_account_email(
    event: &PurchaseEvent,
    token: &IssuedToken,
    password: &str,
) -> (String, String) {
    let subject = "Your new account and activation code".to_string();
    let html = format!(
        concat!(
            "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;\">",
            "<h1>Thank you for your purchase!</h1>",
            "<h2>A new account was created for you</h2>",
            "<p>This is your first purchase, so we set up an account for you.</p>",
            "<h2>Your account details</h2>",
            "<div style=\"font-family: monospace;\">",
            "<p><strong>Email:</strong> {email}</p>",
            "<p><strong>Password:</strong> {password}</p>",
            "<p><strong>Phone:</strong> {phone}</p>",
            "</div>",
            "<p><strong>Keep these details safe; you will need them for activation.</strong></p>",
            "<h2>Your activation code</h2>",
            "<div style=\"font-family: monospace; font-size: 28px; letter-spacing: 2px;\">{code}</div>",
            "<p>The code is personal and single-use, valid for {validity} days.</p>",
            "<h3>Next steps</h3>",
            "<ol>",
            "<li>Download your files from the store</li>",
            "<li>Run the activation client</li>",
            "<li>Enter your code, email, password and phone</li>",
            "<li>Your license key is generated automatically</li>",
            "</ol>",
            "</div>",
        ),
        email = event.email,
        password = password,
        phone = event.phone_number(),
        code = token.code,
        validity = TOKEN_VALIDITY_DAYS,
    );
    (subject, html)
}

/// Subject and body for a buyer with an existing account.
#[must_use]
pub fn existing_account_email(event: &PurchaseEvent, token: &IssuedToken) -> (String, String) {
    let subject = "Your activation code".to_string();
    let html = format!(
        concat!(
            "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;\">",
            "<h1>Thank you for your purchase!</h1>",
            "<h2>Your activation code</h2>",
            "<div style=\"font-family: monospace; font-size: 28px; letter-spacing: 2px;\">{code}</div>",
            "<p>The code is personal and single-use, valid for {validity} days.</p>",
            "<h2>Your account</h2>",
            "<p>Use your existing credentials (email + password + phone) together with the new code.</p>",
            "<h3>Next steps</h3>",
            "<ol>",
            "<li>Download your files from the store</li>",
            "<li>Run the activation client</li>",
            "<li>Enter the new code with your existing credentials</li>",
            "<li>Your license key is generated automatically</li>",
            "</ol>",
            "</div>",
        ),
        code = token.code,
        validity = TOKEN_VALIDITY_DAYS,
    );
    (subject, html)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use tokio::sync::Mutex;

    use super::*;
    use crate::identity::AccountId;
    use crate::token::ActivationCode;

    fn issued() -> IssuedToken {
        let created_at = Utc::now();
        IssuedToken {
            code: ActivationCode::generate(),
            created_at,
            expires_at: created_at + Duration::days(TOKEN_VALIDITY_DAYS),
        }
    }

    fn event() -> PurchaseEvent {
        serde_json::from_value(serde_json::json!({
            "sale_id": "s1",
            "email": "buyer@x.com",
            "custom_fields": { "phone": "+1" },
        }))
        .unwrap()
    }

    fn new_account() -> ResolvedAccount {
        ResolvedAccount {
            account_id: AccountId::new("acct-1"),
            is_new: true,
            password: Some("SECRETPW1234".to_string()),
        }
    }

    fn existing_account() -> ResolvedAccount {
        ResolvedAccount {
            account_id: AccountId::new("acct-1"),
            is_new: false,
            password: None,
        }
    }

    /// Channel that records everything it is asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingChannel {
        pub sent: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .await
                .push((to.to_string(), subject.to_string(), html.to_string()));
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    struct FailingChannel;

    #[async_trait]
    impl NotificationChannel for FailingChannel {
        async fn send(&self, _: &str, _: &str, _: &str) -> Result<(), NotifyError> {
            Err(NotifyError("smtp timeout".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn new_account_variant_carries_credentials() {
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = NotificationDispatcher::new(Some(channel.clone()));
        let token = issued();

        let delivery = dispatcher.notify(&new_account(), &token, &event()).await;
        assert_eq!(delivery, Delivery::Sent);

        let sent = channel.sent.lock().await;
        let (to, subject, html) = &sent[0];
        assert_eq!(to, "buyer@x.com");
        assert!(subject.contains("new account"));
        assert!(html.contains("SECRETPW1234"));
        assert!(html.contains(token.code.as_str()));
    }

    #[tokio::test]
    async fn existing_account_variant_omits_password() {
        let channel = Arc::new(RecordingChannel::default());
        let dispatcher = NotificationDispatcher::new(Some(channel.clone()));
        let token = issued();

        dispatcher.notify(&existing_account(), &token, &event()).await;

        let sent = channel.sent.lock().await;
        let (_, _, html) = &sent[0];
        assert!(html.contains(token.code.as_str()));
        assert!(html.contains("existing credentials"));
        assert!(!html.contains("Password:"));
    }

    #[tokio::test]
    async fn channel_failure_is_swallowed() {
        let dispatcher = NotificationDispatcher::new(Some(Arc::new(FailingChannel)));
        let delivery = dispatcher.notify(&new_account(), &issued(), &event()).await;
        assert_eq!(delivery, Delivery::Failed);
    }

    #[tokio::test]
    async fn unconfigured_channel_is_a_noop() {
        let dispatcher = NotificationDispatcher::new(None);
        assert!(!dispatcher.is_configured());
        let delivery = dispatcher.notify(&new_account(), &issued(), &event()).await;
        assert_eq!(delivery, Delivery::Skipped);
    }
}
