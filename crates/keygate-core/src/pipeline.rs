//! The purchase-to-activation pipeline.
//!
//! One inbound event walks `RECEIVED → DEDUP_CHECKED → {DUPLICATE |
//! ACCOUNT_RESOLVED → TOKEN_ISSUED → NOTIFIED}`. No transition skips the
//! dedup check, and the terminal notify step can fail without failing the
//! request. Concurrent deliveries coordinate only through the store: the
//! dedup check is the fast path, the create-if-absent ledger write is the
//! authoritative guard, and the writer that loses that race suppresses its
//! notification and answers as a duplicate.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::account::{AccountResolver, ResolveError};
use crate::event::{PurchaseEvent, ValidationError};
use crate::identity::{AccountId, IdentityProvider};
use crate::issuer::{ActivationIssuer, IssueError};
use crate::ledger::{LedgerWrite, ProcessedSale, PurchaseLedger};
use crate::notify::{NotificationChannel, NotificationDispatcher};
use crate::store::{DocumentStore, StoreError};

/// Terminal result of processing one purchase event.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// The sale was processed and a token issued.
    Processed {
        /// The issued activation code.
        activation_token: String,
        /// Account the token is bound to.
        account_id: AccountId,
        /// Whether the account was provisioned for this sale.
        is_new_account: bool,
    },
    /// The sale was already processed; redelivery acknowledged with no
    /// side effects.
    Duplicate,
}

/// Errors that fail a pipeline run.
///
/// Duplicates are not errors, and notification failure never surfaces
/// here; everything else bubbles unmodified to the transport layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The event failed structural validation.
    #[error("invalid purchase event: {0}")]
    Validation(#[from] ValidationError),

    /// Account lookup or provisioning failed.
    #[error("account resolution failed: {0}")]
    AccountResolution(#[from] ResolveError),

    /// Token issuance or bookkeeping persistence failed.
    #[error("token issuance failed: {0}")]
    Issuance(#[from] IssueError),

    /// The ledger check or record failed.
    #[error("purchase ledger failure: {0}")]
    Ledger(#[from] StoreError),
}

impl PipelineError {
    /// Returns `true` when the failure is the caller's malformed input
    /// rather than an internal fault.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Orchestrates the reconciliation of one purchase event.
pub struct PurchasePipeline {
    resolver: AccountResolver,
    ledger: PurchaseLedger,
    issuer: ActivationIssuer,
    dispatcher: NotificationDispatcher,
}

impl PurchasePipeline {
    /// Wires the pipeline over its collaborators.
    #[must_use]
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        channel: Option<Arc<dyn NotificationChannel>>,
    ) -> Self {
        Self {
            resolver: AccountResolver::new(identity, Arc::clone(&store)),
            ledger: PurchaseLedger::new(Arc::clone(&store)),
            issuer: ActivationIssuer::new(store),
            dispatcher: NotificationDispatcher::new(channel),
        }
    }

    /// Returns `true` when a notification channel is configured.
    #[must_use]
    pub fn has_notification_channel(&self) -> bool {
        self.dispatcher.is_configured()
    }

    /// Processes one purchase event end to end.
    ///
    /// # Errors
    ///
    /// See [`PipelineError`]; a redelivered sale is a success
    /// ([`PipelineOutcome::Duplicate`]), never an error.
    #[instrument(skip(self, event), fields(sale_id = %event.sale_id))]
    pub async fn process(&self, event: &PurchaseEvent) -> Result<PipelineOutcome, PipelineError> {
        event.validate()?;

        if self.ledger.already_processed(&event.sale_id).await? {
            info!("sale already processed, acknowledging redelivery");
            return Ok(PipelineOutcome::Duplicate);
        }

        let account = self.resolver.resolve(event).await?;
        let token = self.issuer.issue(&account, event).await?;

        let record = ProcessedSale {
            sale_id: event.sale_id.clone(),
            email: event.email.clone(),
            activation_token: token.code.as_str().to_string(),
            account_id: account.account_id.clone(),
            is_new_account: account.is_new,
            processed_at: Utc::now(),
        };
        if self.ledger.record(&record).await? == LedgerWrite::LostRace {
            // A concurrent delivery of the same sale finished first. Our
            // token was already generated and persisted, but the buyer must
            // not receive two emails for one sale.
            warn!("lost ledger race after issuance, suppressing notification");
            return Ok(PipelineOutcome::Duplicate);
        }

        self.dispatcher.notify(&account, &token, event).await;

        info!(
            account_id = %account.account_id,
            is_new_account = account.is_new,
            "purchase processed"
        );
        Ok(PipelineOutcome::Processed {
            activation_token: token.code.as_str().to_string(),
            account_id: account.account_id,
            is_new_account: account.is_new,
        })
    }
}
