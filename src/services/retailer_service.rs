//! Retailer lookups shared by every API.

use crate::{
    error::{AppError, ErrorCode},
    models::retailer::{Retailer, RetailerStatus},
};
use sqlx::PgExecutor;

const RETAILER_COLUMNS: &str = "id, name, slug, account_number_prefix, account_number_length, \
     profile_config, marketing_preference_config, loyalty_name, status, balance_lifespan, created_at";

pub async fn find_by_slug<'e>(
    executor: impl PgExecutor<'e>,
    slug: &str,
) -> Result<Option<Retailer>, AppError> {
    let retailer = sqlx::query_as::<_, Retailer>(&format!(
        "SELECT {RETAILER_COLUMNS} FROM retailer WHERE slug = $1"
    ))
    .bind(slug)
    .fetch_optional(executor)
    .await?;
    Ok(retailer)
}

/// Retailer named in the request path.
///
/// # Errors
///
/// `INVALID_RETAILER` when no retailer has this slug, `INACTIVE_RETAILER` when
/// the retailer is switched off.
pub async fn get_by_slug<'e>(
    executor: impl PgExecutor<'e>,
    slug: &str,
) -> Result<Retailer, AppError> {
    let retailer = find_by_slug(executor, slug)
        .await?
        .ok_or(AppError::Code(ErrorCode::InvalidRetailer))?;
    ensure_active(retailer)
}

fn ensure_active(retailer: Retailer) -> Result<Retailer, AppError> {
    match retailer.status {
        RetailerStatus::Inactive => Err(AppError::Code(ErrorCode::InactiveRetailer)),
        _ => Ok(retailer),
    }
}

pub async fn get_by_id<'e>(executor: impl PgExecutor<'e>, id: i64) -> Result<Retailer, AppError> {
    let retailer = sqlx::query_as::<_, Retailer>(&format!(
        "SELECT {RETAILER_COLUMNS} FROM retailer WHERE id = $1"
    ))
    .bind(id)
    .fetch_one(executor)
    .await?;
    Ok(retailer)
}

/// Store name of a MID, `N/A` when the MID is not registered.
pub async fn store_name<'e>(executor: impl PgExecutor<'e>, mid: &str) -> Result<String, AppError> {
    let name = sqlx::query_scalar::<_, String>("SELECT store_name FROM retailer_store WHERE mid = $1")
        .bind(mid)
        .fetch_optional(executor)
        .await?;
    Ok(name.unwrap_or_else(|| "N/A".to_string()))
}
