//! Purchase ledger: at-most-once processing per sale identifier.
//!
//! The existence of a processed-sale record is the dedup guard. The check
//! runs first in the pipeline; the record is written last, with
//! create-if-absent semantics, so it doubles as the authoritative "done"
//! marker. Two concurrent deliveries of one sale can both pass the check;
//! the conflict on the final write tells the loser to suppress its
//! duplicate notification.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::AccountId;
use crate::store::{collections, DocumentStore, StoreError};

/// Durable record marking a sale as fully processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedSale {
    /// Sale identifier (primary key).
    pub sale_id: String,
    /// Buyer email.
    pub email: String,
    /// Activation code issued for the sale.
    pub activation_token: String,
    /// Account the token was bound to.
    pub account_id: AccountId,
    /// Whether the account was provisioned by this processing run.
    pub is_new_account: bool,
    /// When processing completed.
    pub processed_at: DateTime<Utc>,
}

/// Result of attempting to record a processed sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    /// The record was written; this delivery owns the sale.
    Recorded,
    /// A concurrent delivery recorded the sale first.
    LostRace,
}

/// Ledger of processed sale identifiers.
pub struct PurchaseLedger {
    store: Arc<dyn DocumentStore>,
}

impl PurchaseLedger {
    /// Creates a ledger over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Returns `true` when the sale has already been processed.
    ///
    /// # Errors
    ///
    /// Propagates store failures; a failed check is fatal for the request
    /// because proceeding could double-issue.
    pub async fn already_processed(&self, sale_id: &str) -> Result<bool, StoreError> {
        let existing = self.store.get(collections::PURCHASES, sale_id).await?;
        Ok(existing.is_some())
    }

    /// Records the sale as processed with create-if-absent semantics.
    ///
    /// # Errors
    ///
    /// Propagates store failures other than the conflict signal, which is
    /// reported as [`LedgerWrite::LostRace`].
    pub async fn record(&self, record: &ProcessedSale) -> Result<LedgerWrite, StoreError> {
        let body = serde_json::to_value(record)
            .map_err(|e| StoreError::Backend(format!("serialize processed sale: {e}")))?;
        match self
            .store
            .create(collections::PURCHASES, &record.sale_id, body)
            .await
        {
            Ok(()) => {
                debug!(sale_id = %record.sale_id, "recorded processed sale");
                Ok(LedgerWrite::Recorded)
            },
            Err(err) if err.is_conflict() => Ok(LedgerWrite::LostRace),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn record_for(sale_id: &str) -> ProcessedSale {
        ProcessedSale {
            sale_id: sale_id.to_string(),
            email: "buyer@x.com".to_string(),
            activation_token: "AT-AAAA-BBBB-CCCC".to_string(),
            account_id: AccountId::new("acct-1"),
            is_new_account: true,
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unseen_sale_is_not_processed() {
        let ledger = PurchaseLedger::new(Arc::new(MemoryStore::new()));
        assert!(!ledger.already_processed("s1").await.unwrap());
    }

    #[tokio::test]
    async fn record_then_check() {
        let store = Arc::new(MemoryStore::new());
        let ledger = PurchaseLedger::new(store.clone());

        let outcome = ledger.record(&record_for("s1")).await.unwrap();
        assert_eq!(outcome, LedgerWrite::Recorded);
        assert!(ledger.already_processed("s1").await.unwrap());

        let doc = store
            .get(collections::PURCHASES, "s1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["email"], "buyer@x.com");
        assert_eq!(doc["is_new_account"], true);
    }

    #[tokio::test]
    async fn second_record_loses_the_race() {
        let ledger = PurchaseLedger::new(Arc::new(MemoryStore::new()));
        assert_eq!(
            ledger.record(&record_for("s1")).await.unwrap(),
            LedgerWrite::Recorded
        );
        assert_eq!(
            ledger.record(&record_for("s1")).await.unwrap(),
            LedgerWrite::LostRace
        );
    }
}
