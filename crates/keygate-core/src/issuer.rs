//! Activation token issuance and account purchase bookkeeping.
//!
//! Issues exactly one token per processed sale: generates a code, persists
//! the token document with create-if-absent semantics (a code collision is
//! a retryable conflict, never an overwrite), then merges the purchase
//! metadata into the account document without disturbing fields from
//! earlier purchases.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::account::ResolvedAccount;
use crate::event::PurchaseEvent;
use crate::store::{collections, DocumentStore, StoreError};
use crate::token::ActivationCode;

/// Token validity window.
pub const TOKEN_VALIDITY_DAYS: i64 = 30;

/// Attempts at generating a non-colliding code before giving up.
const MAX_CODE_ATTEMPTS: u32 = 3;

/// A freshly issued activation token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The activation code.
    pub code: ActivationCode,
    /// Issuance time.
    pub created_at: DateTime<Utc>,
    /// Expiry, exactly [`TOKEN_VALIDITY_DAYS`] after `created_at`.
    pub expires_at: DateTime<Utc>,
}

/// Errors emitted during token issuance.
#[derive(Debug, Error)]
pub enum IssueError {
    /// Every generated code collided with a persisted token.
    ///
    /// With a 36^12 space this practically never happens; repeated
    /// conflicts indicate a store misbehaving, so the request fails rather
    /// than looping.
    #[error("could not persist a unique activation code after {attempts} attempts")]
    CodeExhausted {
        /// Number of attempted codes.
        attempts: u32,
    },

    /// A persistence step failed.
    #[error("token persistence failed: {0}")]
    Store(#[from] StoreError),
}

/// Issues activation tokens bound to a resolved account and sale.
pub struct ActivationIssuer {
    store: Arc<dyn DocumentStore>,
}

impl ActivationIssuer {
    /// Creates an issuer over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Issues a token for the sale and merges purchase metadata into the
    /// account document.
    ///
    /// # Errors
    ///
    /// Persistence failure at any step is fatal for the request. The
    /// processed-sale record is written by the caller afterwards, so a
    /// failure here never leaves a sale marked done without its token.
    pub async fn issue(
        &self,
        account: &ResolvedAccount,
        event: &PurchaseEvent,
    ) -> Result<IssuedToken, IssueError> {
        let issued = self.persist_token(account, event).await?;

        self.store
            .merge(
                collections::USERS,
                account.account_id.as_str(),
                json!({ "purchase_info": purchase_info(event, issued.created_at) }),
            )
            .await?;
        debug!(account_id = %account.account_id, "merged purchase info into account");

        Ok(issued)
    }

    async fn persist_token(
        &self,
        account: &ResolvedAccount,
        event: &PurchaseEvent,
    ) -> Result<IssuedToken, IssueError> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = ActivationCode::generate();
            let created_at = Utc::now();
            let expires_at = created_at + Duration::days(TOKEN_VALIDITY_DAYS);

            let body = json!({
                "email": event.email,
                "phone_number": event.phone_number(),
                "account_id": account.account_id,
                "used": false,
                "license_key": Value::Null,
                "created_at": created_at.to_rfc3339(),
                "expires_at": expires_at.to_rfc3339(),
                "sale_id": event.sale_id,
            });

            match self
                .store
                .create(collections::ACTIVATION_TOKENS, code.as_str(), body)
                .await
            {
                Ok(()) => {
                    debug!(code = %code, sale_id = %event.sale_id, "activation token persisted");
                    return Ok(IssuedToken {
                        code,
                        created_at,
                        expires_at,
                    });
                },
                Err(err) if err.is_conflict() => {
                    warn!(attempt, "activation code collision, regenerating");
                },
                Err(err) => return Err(err.into()),
            }
        }
        Err(IssueError::CodeExhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }
}

/// Builds the purchase metadata object for the account document.
///
/// Fields absent from the event are left out entirely; the merge write
/// preserves whatever earlier purchases recorded.
fn purchase_info(event: &PurchaseEvent, purchased_at: DateTime<Utc>) -> Value {
    let mut info = Map::new();
    info.insert("sale_id".to_string(), json!(event.sale_id));
    info.insert("purchase_date".to_string(), json!(purchased_at.to_rfc3339()));
    info.insert("phone_number".to_string(), json!(event.phone_number()));
    if let Some(product_name) = &event.product_name {
        info.insert("product_name".to_string(), json!(product_name));
    }
    if let Some(price) = event.price {
        info.insert("price".to_string(), json!(price));
    }
    if let Some(currency) = &event.currency {
        info.insert("currency".to_string(), json!(currency));
    }
    if let Some(full_name) = &event.full_name {
        info.insert("customer_name".to_string(), json!(full_name));
    }
    Value::Object(info)
}
