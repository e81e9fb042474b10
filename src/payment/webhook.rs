//! Webhook HTTP surface.
//!
//! `POST /webhooks/payment` with header `X-Provider-Signature` carrying a
//! hex HMAC over the raw body. 401 on missing/invalid signature, 400 on
//! malformed JSON, 200 with `{status, message}` on success or idempotent
//! no-op.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

use crate::error::EscrowError;
use crate::service::EscrowService;
use crate::transaction::TransactionId;

pub const SIGNATURE_HEADER: &str = "X-Provider-Signature";

pub fn router(service: Arc<EscrowService>) -> Router {
    Router::new()
        .route("/webhooks/payment", post(handle_payment_webhook))
        .route("/transactions/{transaction_id}/progress", get(get_progress))
        .with_state(service)
}

async fn handle_payment_webhook(
    State(service): State<Arc<EscrowService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, EscrowError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(EscrowError::Signature)?;

    let result = service.ingest_payment_event(&body, signature).await?;
    Ok(Json(serde_json::json!({
        "status": result.status,
        "message": result.message,
    })))
}

async fn get_progress(
    State(service): State<Arc<EscrowService>>,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, EscrowError> {
    let id: TransactionId = transaction_id
        .parse()
        .map_err(|_| EscrowError::Validation("invalid transaction id".to_string()))?;

    let step = service.current_step(id)?;
    let txn = service.get_transaction(id)?;
    Ok(Json(serde_json::json!({
        "transaction_id": txn.id,
        "state": txn.state,
        "current_step": step,
    })))
}
