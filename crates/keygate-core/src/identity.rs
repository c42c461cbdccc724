//! Identity provider collaborator seam.
//!
//! The provider owns the account namespace and is the final arbiter of
//! email uniqueness: two concurrent resolutions of the same unseen email
//! can both observe `NotFound`, but only one `create_account` succeeds.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opaque account identifier assigned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Wraps an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account metadata returned by a lookup.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    /// Provider-assigned identifier.
    pub account_id: AccountId,
    /// Account email (unique within the provider).
    pub email: String,
    /// Display name recorded at creation.
    pub display_name: String,
}

/// Errors emitted by identity provider implementations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No account exists for the email.
    #[error("no account for email")]
    NotFound,

    /// An account already exists for the email (creation race).
    #[error("account already exists for email")]
    AlreadyExists,

    /// The provider failed for any other reason.
    #[error("identity provider error: {0}")]
    Provider(String),
}

/// Account lookup and provisioning primitives.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Looks up an account by email.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NotFound`] when no account exists; any other
    /// error means the lookup itself failed.
    async fn lookup_by_email(&self, email: &str) -> Result<AccountRecord, IdentityError>;

    /// Provisions a new account.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::AlreadyExists`] when the email is taken,
    /// which callers must treat as "retry the lookup", not as fatal.
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<AccountId, IdentityError>;
}

/// In-memory [`IdentityProvider`] for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryIdentity {
    accounts: RwLock<HashMap<String, AccountRecord>>,
}

impl MemoryIdentity {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing account, returning its id.
    pub async fn seed_account(&self, email: &str, display_name: &str) -> AccountId {
        let account_id = AccountId::new(Uuid::new_v4().to_string());
        let mut accounts = self.accounts.write().await;
        accounts.insert(
            email.to_string(),
            AccountRecord {
                account_id: account_id.clone(),
                email: email.to_string(),
                display_name: display_name.to_string(),
            },
        );
        account_id
    }

    /// Returns the number of accounts.
    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    /// Returns `true` when no accounts exist.
    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn lookup_by_email(&self, email: &str) -> Result<AccountRecord, IdentityError> {
        let accounts = self.accounts.read().await;
        accounts.get(email).cloned().ok_or(IdentityError::NotFound)
    }

    async fn create_account(
        &self,
        email: &str,
        _password: &str,
        display_name: &str,
    ) -> Result<AccountId, IdentityError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(email) {
            return Err(IdentityError::AlreadyExists);
        }
        let account_id = AccountId::new(Uuid::new_v4().to_string());
        accounts.insert(
            email.to_string(),
            AccountRecord {
                account_id: account_id.clone(),
                email: email.to_string(),
                display_name: display_name.to_string(),
            },
        );
        Ok(account_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_missing_is_not_found() {
        let identity = MemoryIdentity::new();
        assert!(matches!(
            identity.lookup_by_email("a@x.com").await,
            Err(IdentityError::NotFound)
        ));
    }

    #[tokio::test]
    async fn create_then_lookup_round_trips() {
        let identity = MemoryIdentity::new();
        let id = identity
            .create_account("a@x.com", "PW", "A B")
            .await
            .unwrap();
        let record = identity.lookup_by_email("a@x.com").await.unwrap();
        assert_eq!(record.account_id, id);
        assert_eq!(record.display_name, "A B");
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let identity = MemoryIdentity::new();
        identity
            .create_account("a@x.com", "PW", "A")
            .await
            .unwrap();
        assert!(matches!(
            identity.create_account("a@x.com", "PW2", "B").await,
            Err(IdentityError::AlreadyExists)
        ));
        assert_eq!(identity.len().await, 1);
    }
}
