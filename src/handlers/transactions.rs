//! Transaction HTTP handlers.
//!
//! This module implements the transactions API endpoint:
//! - POST {API_PREFIX}/transactions/{retailer_slug} - Process a purchase or refund

use crate::{
    db::DbPool,
    error::AppError,
    models::transaction::CreateTransactionRequest,
    payload::Payload,
    services::{retailer_service, transaction_service},
};
use axum::{
    Json,
    extract::{Path, State},
};

/// Process a transaction reported by the retailer's point of sale.
///
/// # Request Body
///
/// ```json
/// {
///   "id": "tx-0001",
///   "transaction_id": "payment-0001",
///   "transaction_total": 1250,
///   "datetime": 1700000000.0,
///   "MID": "mid-1",
///   "loyalty_id": "550e8400-e29b-41d4-a716-446655440000"
/// }
/// ```
///
/// # Response (200 OK)
///
/// One of `"Awarded"`, `"Threshold not met"`, `"Refund accepted"` or
/// `"Refunds not accepted"`.
///
/// # Errors
///
/// - **403** `INVALID_RETAILER`
/// - **404** `USER_NOT_FOUND`, `NO_ACTIVE_CAMPAIGNS`, `INACTIVE_RETAILER`
/// - **409** `USER_NOT_ACTIVE`, `DUPLICATE_TRANSACTION`
/// - **400** `INVALID_TX_DATE`
/// - **422** `FIELD_VALIDATION_ERROR`
pub async fn create_transaction(
    State(pool): State<DbPool>,
    Path(retailer_slug): Path<String>,
    Payload(request): Payload<CreateTransactionRequest>,
) -> Result<Json<&'static str>, AppError> {
    let retailer = retailer_service::get_by_slug(&pool, &retailer_slug).await?;
    let response = transaction_service::process_transaction(&pool, &retailer, &request).await?;

    Ok(Json(response))
}
