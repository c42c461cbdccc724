//! keygate-core - purchase-to-activation reconciliation pipeline.
//!
//! Reconciles inbound purchase notifications from a commerce platform with
//! an identity store and issues a single-use activation credential to the
//! buyer. The crate owns the state-transition logic and its
//! failure-sensitive invariants:
//!
//! - idempotency under webhook redelivery (at-least-once inbound),
//! - at most one account per email,
//! - exactly one activation token per sale.
//!
//! Transport, durable storage, identity and email delivery are external
//! collaborators behind the [`store::DocumentStore`],
//! [`identity::IdentityProvider`] and [`notify::NotificationChannel`]
//! seams; in-memory implementations of the first two ship here so the
//! pipeline can be exercised hermetically.
//!
//! # Modules
//!
//! - [`token`]: activation code and password generation
//! - [`event`]: inbound purchase event model and validation
//! - [`store`]: document store seam, merge semantics, in-memory store
//! - [`identity`]: identity provider seam and in-memory provider
//! - [`account`]: account resolution and provisioning
//! - [`ledger`]: at-most-once processing guard per sale id
//! - [`issuer`]: token issuance and purchase bookkeeping
//! - [`notify`]: notification dispatch and email templates
//! - [`pipeline`]: end-to-end orchestration

pub mod account;
pub mod event;
pub mod identity;
pub mod issuer;
pub mod ledger;
pub mod notify;
pub mod pipeline;
pub mod store;
pub mod token;

pub use account::{AccountResolver, ResolveError, ResolvedAccount};
pub use event::{CustomFields, PurchaseEvent, ValidationError};
pub use identity::{AccountId, AccountRecord, IdentityError, IdentityProvider, MemoryIdentity};
pub use issuer::{ActivationIssuer, IssueError, IssuedToken, TOKEN_VALIDITY_DAYS};
pub use ledger::{LedgerWrite, ProcessedSale, PurchaseLedger};
pub use notify::{Delivery, NotificationChannel, NotificationDispatcher, NotifyError};
pub use pipeline::{PipelineError, PipelineOutcome, PurchasePipeline};
pub use store::{DocumentStore, MemoryStore, StoreError};
pub use token::ActivationCode;
