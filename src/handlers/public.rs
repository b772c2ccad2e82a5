//! Public HTTP handlers, reached without authentication.

use crate::{
    db::DbPool,
    error::AppError,
    models::reward::RewardMicrositeResponse,
    services::public_service,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct UnsubscribeQuery {
    /// Opt-out token of the account holder.
    pub u: Option<String>,
}

/// Marketing opt-out link.
///
/// # Endpoint
///
/// `GET /{retailer_slug}/marketing/unsubscribe?u=<opt_out_token>`
///
/// Always answers 202 with an HTML confirmation page.
pub async fn unsubscribe(
    State(pool): State<DbPool>,
    Path(retailer_slug): Path<String>,
    Query(query): Query<UnsubscribeQuery>,
) -> Result<(StatusCode, Html<String>), AppError> {
    let page = public_service::unsubscribe(&pool, &retailer_slug, query.u.as_deref()).await?;

    Ok((StatusCode::ACCEPTED, Html(page)))
}

pub async fn reward_for_microsite(
    State(pool): State<DbPool>,
    Path((retailer_slug, reward_uuid)): Path<(String, String)>,
) -> Result<Json<RewardMicrositeResponse>, AppError> {
    let reward = public_service::reward_for_microsite(&pool, &retailer_slug, &reward_uuid).await?;

    Ok(Json(reward))
}
