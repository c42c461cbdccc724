//! Inbound purchase event model.
//!
//! Events arrive from the commerce platform's webhook with at-least-once
//! delivery semantics: the same `sale_id` may be redelivered any number of
//! times. Everything except `sale_id` and `email` is optional, and optional
//! fields that are absent stay absent through the whole pipeline (no nulls
//! are ever persisted for them).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phone number recorded when the buyer did not supply one.
pub const DEFAULT_PHONE: &str = "none";

/// One purchase notification as delivered by the commerce platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseEvent {
    /// Unique sale identifier assigned by the platform.
    pub sale_id: String,

    /// Buyer email address.
    pub email: String,

    /// Buyer display name, when the platform knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Purchased product name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,

    /// Price in the platform's minor currency unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,

    /// ISO currency code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Seller-defined checkout fields.
    #[serde(default)]
    pub custom_fields: CustomFields,
}

/// Seller-defined checkout fields attached to the event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomFields {
    /// Buyer phone number collected at checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Structural validation failure for an inbound event.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl PurchaseEvent {
    /// Validates the structural requirements of the event.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingField`] when `sale_id` or `email`
    /// is empty. Nothing beyond structure is checked here; the platform is
    /// trusted for content.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sale_id.trim().is_empty() {
            return Err(ValidationError::MissingField("sale_id"));
        }
        if self.email.trim().is_empty() {
            return Err(ValidationError::MissingField("email"));
        }
        Ok(())
    }

    /// Returns the buyer phone number, falling back to [`DEFAULT_PHONE`].
    #[must_use]
    pub fn phone_number(&self) -> &str {
        self.custom_fields
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_PHONE)
    }

    /// Returns the display name to use when provisioning an account.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.email)
    }
}
