//! Periodic balance resets.
//!
//! A retailer with a `balance_lifespan` zeroes every campaign balance whose
//! `reset_date` has come, and pushes the date forward by the lifespan.

use crate::{db::DbPool, error::AppError, services::activity_service};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// A balance zeroed by [`reset_due_balances`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResetBalance {
    pub retailer_slug: String,
    pub campaign_slug: String,
    pub account_holder_uuid: Uuid,
    pub balance_lifespan: i32,
    pub original_balance: i64,
    pub reset_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

/// Zero every balance due for reset and record a BALANCE_CHANGE per balance.
///
/// Balances locked by a running transaction are skipped and picked up by the
/// next run. Returns the number of balances reset.
pub async fn reset_due_balances(pool: &DbPool) -> Result<u64, AppError> {
    let mut tx = pool.begin().await?;
    let reset = sqlx::query_as::<_, ResetBalance>(
        r#"
        WITH due AS (
            SELECT cb.id, cb.balance AS original_balance, r.balance_lifespan,
                   r.slug AS retailer_slug, c.slug AS campaign_slug, ah.account_holder_uuid
            FROM campaign_balance cb
            JOIN account_holder ah ON ah.id = cb.account_holder_id
            JOIN retailer r ON r.id = ah.retailer_id
            JOIN campaign c ON c.id = cb.campaign_id
            WHERE cb.reset_date <= CURRENT_DATE AND r.balance_lifespan IS NOT NULL
            FOR UPDATE OF cb SKIP LOCKED
        )
        UPDATE campaign_balance cb
        SET balance = 0, reset_date = CURRENT_DATE + due.balance_lifespan, updated_at = NOW()
        FROM due
        WHERE cb.id = due.id
        RETURNING due.retailer_slug, due.campaign_slug, due.account_holder_uuid,
                  due.balance_lifespan, due.original_balance, cb.reset_date, cb.updated_at
        "#,
    )
    .fetch_all(&mut *tx)
    .await?;

    let activities: Vec<_> = reset.iter().map(activity_service::balance_reset).collect();
    activity_service::store_all(&mut tx, &activities).await?;
    tx.commit().await?;

    tracing::info!(count = reset.len(), "Balances reset");
    Ok(reset.len() as u64)
}
