//! Escrow error taxonomy.
//!
//! Every fallible operation in the core returns [`EscrowError`]. The HTTP
//! mapping lives here too so no handler invents its own status codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::transaction::TransactionState;

/// Unified error type for the escrow core.
#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    /// Malformed input, caller's fault.
    #[error("validation failed: {0}")]
    Validation(String),

    /// State-machine guard failed. Carries current vs. attempted state.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: TransactionState,
        to: TransactionState,
    },

    /// Decryption failed: wrong passphrase or tampered ciphertext.
    /// Deliberately does not distinguish the two.
    #[error("credential decryption failed")]
    Authentication,

    /// The one-time reveal was already consumed.
    #[error("credentials already revealed")]
    AlreadyRevealed,

    /// Webhook signature missing or invalid, rejected before parsing.
    #[error("webhook signature verification failed")]
    Signature,

    /// Provider event id seen before. Internal only: ingestion converts
    /// this into an idempotent success, it never reaches a caller.
    #[error("duplicate provider event: {0}")]
    DuplicateEvent(String),

    /// Per-transaction lock could not be acquired within the bounded wait.
    /// Retryable.
    #[error("transaction busy, retry later")]
    ConcurrencyConflict,

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("no credential vault for listing {0}")]
    VaultNotFound(u64),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EscrowError {
    /// Stable machine-readable name for responses and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::AlreadyRevealed => "ALREADY_REVEALED",
            Self::Signature => "SIGNATURE_ERROR",
            Self::DuplicateEvent(_) => "DUPLICATE_EVENT",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::VaultNotFound(_) => "VAULT_NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for the collaborator-facing surface.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::Authentication => StatusCode::BAD_REQUEST,
            Self::AlreadyRevealed => StatusCode::CONFLICT,
            Self::Signature => StatusCode::UNAUTHORIZED,
            Self::DuplicateEvent(_) => StatusCode::OK,
            Self::ConcurrencyConflict => StatusCode::SERVICE_UNAVAILABLE,
            Self::TransactionNotFound(_) | Self::VaultNotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

impl IntoResponse for EscrowError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.name(),
            message: self.to_string(),
        };
        (self.http_status(), Json(body)).into_response()
    }
}
