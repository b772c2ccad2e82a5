//! Account holder HTTP handlers.
//!
//! This module implements the accounts API endpoints, under `{API_PREFIX}/loyalty`:
//! - POST /{retailer_slug}/accounts/enrolment - Enrol a new account holder
//! - POST /{retailer_slug}/accounts/getbycredentials - Authenticate and view an account
//! - GET /{retailer_slug}/accounts/{account_holder_uuid} - View an account
//! - GET|PATCH /{retailer_slug}/accounts/{account_holder_uuid}/status - Read or deactivate

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::{USER_CHANNEL_HEADER, UserChannel},
    models::account_holder::{
        AccountHolderResponse, AccountHolderStatusResponse, GetByCredentialsRequest,
        UpdateStatusRequest,
    },
    payload::Payload,
    services::{account_service, retailer_service},
    validation::EnrolmentRequest,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::{Value, json};

/// Enrol a new account holder.
///
/// # Endpoint
///
/// `POST /{retailer_slug}/accounts/enrolment`
///
/// # Headers
///
/// `bpl-user-channel` is required.
///
/// # Request Body
///
/// ```json
/// {
///   "credentials": {"email": "jane@example.com", "first_name": "Jane", "last_name": "Doe"},
///   "marketing_preferences": [{"key": "marketing_pref", "value": true}],
///   "callback_url": "https://retailer.example.com/enrol/callback",
///   "third_party_identifier": "abc-123"
/// }
/// ```
///
/// # Response
///
/// - **Success (202 Accepted)**: `{}`. The account number is assigned later by the
///   activation task and reported to `callback_url`.
/// - **Error (409)**: `ACCOUNT_EXISTS`
/// - **Error (422)**: `FIELD_VALIDATION_ERROR`
pub async fn enrol(
    State(pool): State<DbPool>,
    Path(retailer_slug): Path<String>,
    UserChannel(channel): UserChannel,
    Payload(request): Payload<EnrolmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let retailer = retailer_service::get_by_slug(&pool, &retailer_slug).await?;
    account_service::enrol(&pool, &retailer, &request, &channel).await?;

    Ok((StatusCode::ACCEPTED, Json(json!({}))))
}

/// Account details for an email and account number pair.
///
/// # Response
///
/// - **Success (200 OK)**: balances, the last 10 transactions, rewards and pending rewards
/// - **Error (404)**: `NO_ACCOUNT_FOUND` unless an active holder matches
pub async fn get_by_credentials(
    State(pool): State<DbPool>,
    Path(retailer_slug): Path<String>,
    UserChannel(channel): UserChannel,
    Payload(request): Payload<GetByCredentialsRequest>,
) -> Result<Json<AccountHolderResponse>, AppError> {
    let retailer = retailer_service::get_by_slug(&pool, &retailer_slug).await?;
    let account = account_service::get_by_credentials(&pool, &retailer, &request, &channel).await?;

    Ok(Json(account))
}

/// Account details by account holder UUID.
pub async fn get_account(
    State(pool): State<DbPool>,
    Path((retailer_slug, account_holder_uuid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<AccountHolderResponse>, AppError> {
    let channel = headers
        .get(USER_CHANNEL_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    let retailer = retailer_service::get_by_slug(&pool, &retailer_slug).await?;
    let account =
        account_service::get_account(&pool, &retailer, &account_holder_uuid, channel).await?;

    Ok(Json(account))
}

pub async fn get_status(
    State(pool): State<DbPool>,
    Path((retailer_slug, account_holder_uuid)): Path<(String, String)>,
) -> Result<Json<AccountHolderStatusResponse>, AppError> {
    let retailer = retailer_service::get_by_slug(&pool, &retailer_slug).await?;
    let status = account_service::get_status(&pool, &retailer, &account_holder_uuid).await?;

    Ok(Json(AccountHolderStatusResponse { status }))
}

/// Deactivate an account holder.
///
/// # Request Body
///
/// `{"status": "inactive"}`
///
/// # Response
///
/// - **Success (200 OK)**: `{}`
/// - **Error (409)**: `INVALID_STATUS_REQUESTED` when already inactive
pub async fn update_status(
    State(pool): State<DbPool>,
    Path((retailer_slug, account_holder_uuid)): Path<(String, String)>,
    Payload(request): Payload<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let retailer = retailer_service::get_by_slug(&pool, &retailer_slug).await?;
    account_service::update_status(&pool, &retailer, &account_holder_uuid, request.status).await?;

    Ok(Json(json!({})))
}
