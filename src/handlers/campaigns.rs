//! Campaign management HTTP handlers.
//!
//! - POST {API_PREFIX}/campaigns/{retailer_slug}/status-change
//! - POST {API_PREFIX}/campaigns/{retailer_slug}/migration

use crate::{
    db::DbPool,
    error::AppError,
    models::campaign::{CampaignMigrationRequest, CampaignStatusChangeRequest},
    payload::Payload,
    services::{campaign_service, retailer_service},
};
use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

/// Activate, end or cancel a campaign.
///
/// # Request Body
///
/// ```json
/// {
///   "requested_status": "ended",
///   "campaign_slug": "spring-campaign",
///   "activity_metadata": {"sso_username": "jane.doe"},
///   "pending_rewards_action": "convert"
/// }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: `{}`
/// - **Error (404)**: `NO_CAMPAIGN_FOUND`
/// - **Error (409)**: `INVALID_STATUS_REQUESTED`, `MISSING_CAMPAIGN_COMPONENTS`
pub async fn status_change(
    State(pool): State<DbPool>,
    Path(retailer_slug): Path<String>,
    Payload(request): Payload<CampaignStatusChangeRequest>,
) -> Result<Json<Value>, AppError> {
    let retailer = retailer_service::get_by_slug(&pool, &retailer_slug).await?;
    campaign_service::change_status(&pool, &retailer, &request).await?;

    Ok(Json(json!({})))
}

/// Replace an active campaign with a draft one.
///
/// Failed checks are returned together as a list, each entry naming the
/// offending campaign slugs.
pub async fn migration(
    State(pool): State<DbPool>,
    Path(retailer_slug): Path<String>,
    Payload(request): Payload<CampaignMigrationRequest>,
) -> Result<Json<Value>, AppError> {
    let retailer = retailer_service::get_by_slug(&pool, &retailer_slug).await?;
    campaign_service::migrate(&pool, &retailer, &request).await?;

    Ok(Json(json!({})))
}
