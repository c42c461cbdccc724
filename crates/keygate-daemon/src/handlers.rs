//! HTTP surface: purchase webhook and health endpoints.
//!
//! The transport maps pipeline results onto the platform's coarse status
//! contract: 200 for success and acknowledged redelivery, 401 for
//! malformed or unverifiable payloads, 500 for internal failure. Errors
//! bubble unmodified out of the pipeline; this module only translates.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use keygate_core::pipeline::{PipelineError, PipelineOutcome, PurchasePipeline};
use keygate_core::AccountId;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Header carrying the webhook shared secret.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// The reconciliation pipeline.
    pub pipeline: Arc<PurchasePipeline>,
    /// Shared secret expected in [`SIGNATURE_HEADER`]; `None` skips
    /// verification.
    pub webhook_secret: Option<Arc<str>>,
}

impl AppState {
    /// Creates handler state.
    #[must_use]
    pub fn new(pipeline: Arc<PurchasePipeline>, webhook_secret: Option<String>) -> Self {
        Self {
            pipeline,
            webhook_secret: webhook_secret.map(Into::into),
        }
    }
}

/// Builds the daemon router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/webhook/purchase", post(purchase_webhook))
        .with_state(state)
}

/// Errors that terminate webhook handling.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// The shared-secret header is missing or wrong.
    #[error("invalid signature")]
    InvalidSignature,

    /// The request body is not a structurally valid purchase event.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The pipeline failed internally.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Returns the HTTP status code for this error.
    ///
    /// - Invalid signature / payload: 401 (the platform's retry behavior
    ///   treats 401 as non-retryable rejection)
    /// - Internal: 500 (redelivered by the platform; the ledger makes the
    ///   retry safe)
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSignature | Self::InvalidPayload(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        // Internal details stay in the logs, not in the response body.
        let message = match &self {
            Self::InvalidSignature => "Invalid signature".to_string(),
            Self::InvalidPayload(reason) => format!("Invalid payload: {reason}"),
            Self::Internal(_) => "Internal server error".to_string(),
        };
        (
            self.status_code(),
            Json(json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}

impl From<PipelineError> for WebhookError {
    fn from(err: PipelineError) -> Self {
        if err.is_validation() {
            Self::InvalidPayload(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

/// Success body for a processed purchase.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessedResponse {
    success: bool,
    message: &'static str,
    activation_token: String,
    account_id: AccountId,
    is_new_account: bool,
}

async fn purchase_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError> {
    verify_signature(&state, &headers)?;

    let event: keygate_core::PurchaseEvent = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "rejecting malformed webhook body");
        WebhookError::InvalidPayload(e.to_string())
    })?;

    info!(sale_id = %event.sale_id, "webhook received");

    let outcome = state.pipeline.process(&event).await.map_err(|err| {
        let mapped = WebhookError::from(err);
        if matches!(mapped, WebhookError::Internal(_)) {
            error!(sale_id = %event.sale_id, error = %mapped, "pipeline failure");
        }
        mapped
    })?;

    let response = match outcome {
        PipelineOutcome::Processed {
            activation_token,
            account_id,
            is_new_account,
        } => Json(ProcessedResponse {
            success: true,
            message: "Purchase processed successfully",
            activation_token,
            account_id,
            is_new_account,
        })
        .into_response(),
        PipelineOutcome::Duplicate => Json(json!({
            "success": true,
            "message": "Already processed",
            "duplicate": true,
        }))
        .into_response(),
    };
    Ok(response)
}

fn verify_signature(state: &AppState, headers: &HeaderMap) -> Result<(), WebhookError> {
    let Some(expected) = &state.webhook_secret else {
        // No secret configured: structural validation is the only gate.
        return Ok(());
    };
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::InvalidSignature)?;
    if provided != expected.as_ref() {
        return Err(WebhookError::InvalidSignature);
    }
    Ok(())
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "online",
        "service": "keygate",
        "timestamp": Utc::now().to_rfc3339(),
        "config": {
            "store": true,
            "email": state.pipeline.has_notification_channel(),
            "webhook_secret": state.webhook_secret.is_some(),
        },
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
