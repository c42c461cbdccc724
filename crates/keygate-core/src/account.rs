//! Account resolution: find an existing buyer account or provision one.
//!
//! Resolution must complete before any token is issued. A provisioning
//! failure is fatal for the request; a provider-side `AlreadyExists` is the
//! benign race signal (another delivery of the same email won creation) and
//! turns into one lookup retry.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::event::PurchaseEvent;
use crate::identity::{AccountId, IdentityError, IdentityProvider};
use crate::store::{collections, DocumentStore, StoreError};
use crate::token::generate_password;

/// Marker recorded on accounts provisioned by this pipeline.
pub const CREATED_VIA: &str = "purchase_webhook";

/// Outcome of resolving the buyer account for an event.
#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    /// Provider-assigned account identifier.
    pub account_id: AccountId,
    /// `true` when the account was provisioned by this resolution.
    pub is_new: bool,
    /// Generated password, present only for newly provisioned accounts.
    ///
    /// Never persisted by the pipeline; it reaches the buyer exclusively
    /// through the notification channel.
    pub password: Option<String>,
}

/// Errors emitted during account resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The identity provider failed.
    #[error("identity provider failure: {0}")]
    Identity(#[from] IdentityError),

    /// Writing the companion account-state document failed.
    #[error("account state write failed: {0}")]
    Store(#[from] StoreError),
}

/// Resolves buyer emails to accounts, provisioning on first contact.
pub struct AccountResolver {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn DocumentStore>,
}

impl AccountResolver {
    /// Creates a resolver over the given collaborators.
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityProvider>, store: Arc<dyn DocumentStore>) -> Self {
        Self { identity, store }
    }

    /// Resolves the account for `event`, provisioning it when absent.
    ///
    /// # Errors
    ///
    /// Any provider failure other than the not-found / already-exists
    /// signals is fatal and propagates; no token may be issued after a
    /// resolution failure.
    pub async fn resolve(&self, event: &PurchaseEvent) -> Result<ResolvedAccount, ResolveError> {
        match self.identity.lookup_by_email(&event.email).await {
            Ok(record) => {
                debug!(account_id = %record.account_id, "resolved existing account");
                Ok(ResolvedAccount {
                    account_id: record.account_id,
                    is_new: false,
                    password: None,
                })
            },
            Err(IdentityError::NotFound) => self.provision(event).await,
            Err(other) => Err(other.into()),
        }
    }

    async fn provision(&self, event: &PurchaseEvent) -> Result<ResolvedAccount, ResolveError> {
        let password = generate_password();
        let account_id = match self
            .identity
            .create_account(&event.email, &password, event.display_name())
            .await
        {
            Ok(id) => id,
            // Lost the creation race: some concurrent delivery provisioned
            // the email first. The provider's uniqueness constraint is the
            // arbiter; fall back to the account that won.
            Err(IdentityError::AlreadyExists) => {
                debug!("creation race lost, retrying lookup");
                let record = self.identity.lookup_by_email(&event.email).await?;
                return Ok(ResolvedAccount {
                    account_id: record.account_id,
                    is_new: false,
                    password: None,
                });
            },
            Err(other) => return Err(other.into()),
        };

        let now = Utc::now();
        self.store
            .set(
                collections::USERS,
                account_id.as_str(),
                json!({
                    "email": event.email,
                    "phone_number": event.phone_number(),
                    "trial_start_time": now.timestamp_millis(),
                    "seconds_used": 0,
                    "created_at": now.to_rfc3339(),
                    "created_via": CREATED_VIA,
                }),
            )
            .await?;

        info!(account_id = %account_id, "provisioned new account");
        Ok(ResolvedAccount {
            account_id,
            is_new: true,
            password: Some(password),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentity;
    use crate::store::MemoryStore;

    fn event_for(email: &str) -> PurchaseEvent {
        serde_json::from_value(serde_json::json!({
            "sale_id": "s1",
            "email": email,
            "full_name": "A B",
            "custom_fields": { "phone": "+1" },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn provisions_new_account_with_state_doc() {
        let identity = Arc::new(MemoryIdentity::new());
        let store = Arc::new(MemoryStore::new());
        let resolver = AccountResolver::new(identity.clone(), store.clone());

        let resolved = resolver.resolve(&event_for("new@x.com")).await.unwrap();
        assert!(resolved.is_new);
        let password = resolved.password.expect("new account carries a password");
        assert_eq!(password.len(), 12);

        let doc = store
            .get(collections::USERS, resolved.account_id.as_str())
            .await
            .unwrap()
            .expect("account state document written");
        assert_eq!(doc["email"], "new@x.com");
        assert_eq!(doc["phone_number"], "+1");
        assert_eq!(doc["seconds_used"], 0);
        assert_eq!(doc["created_via"], CREATED_VIA);
        assert!(doc["trial_start_time"].is_i64());
    }

    #[tokio::test]
    async fn reuses_existing_account() {
        let identity = Arc::new(MemoryIdentity::new());
        let store = Arc::new(MemoryStore::new());
        let seeded = identity.seed_account("existing@x.com", "A B").await;
        let resolver = AccountResolver::new(identity.clone(), store.clone());

        let resolved = resolver.resolve(&event_for("existing@x.com")).await.unwrap();
        assert!(!resolved.is_new);
        assert!(resolved.password.is_none());
        assert_eq!(resolved.account_id, seeded);
        // No state doc is written for existing accounts here.
        assert!(store
            .get(collections::USERS, seeded.as_str())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn at_most_one_account_per_email() {
        let identity = Arc::new(MemoryIdentity::new());
        let store = Arc::new(MemoryStore::new());
        let resolver = AccountResolver::new(identity.clone(), store.clone());

        let first = resolver.resolve(&event_for("one@x.com")).await.unwrap();
        let second = resolver.resolve(&event_for("one@x.com")).await.unwrap();
        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.account_id, second.account_id);
        assert_eq!(identity.len().await, 1);
    }

    /// Provider that reports `NotFound` once, then behaves like the seeded
    /// account existed all along. Models the lookup/create race window.
    struct RacyIdentity {
        inner: MemoryIdentity,
    }

    #[async_trait::async_trait]
    impl IdentityProvider for RacyIdentity {
        async fn lookup_by_email(
            &self,
            email: &str,
        ) -> Result<crate::identity::AccountRecord, IdentityError> {
            self.inner.lookup_by_email(email).await
        }

        async fn create_account(
            &self,
            email: &str,
            _password: &str,
            display_name: &str,
        ) -> Result<AccountId, IdentityError> {
            // Simulate the concurrent winner committing first.
            self.inner.seed_account(email, display_name).await;
            Err(IdentityError::AlreadyExists)
        }
    }

    #[tokio::test]
    async fn creation_race_falls_back_to_lookup() {
        let identity = Arc::new(RacyIdentity {
            inner: MemoryIdentity::new(),
        });
        let store = Arc::new(MemoryStore::new());
        let resolver = AccountResolver::new(identity, store);

        let resolved = resolver.resolve(&event_for("race@x.com")).await.unwrap();
        assert!(!resolved.is_new);
        assert!(resolved.password.is_none());
    }
}
