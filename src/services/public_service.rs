//! Unauthenticated endpoints reached from emails and reward links.

use crate::{
    db::DbPool,
    error::{AppError, ErrorCode},
    models::reward::{Reward, RewardMicrositeResponse},
    services::{activity_service, retailer_service},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

const OPT_OUT_MESSAGE: &str = "You have opted out of any further marketing";

/// HTML page returned by the marketing unsubscribe link.
pub fn opt_out_page(message: &str) -> String {
    format!(
        r#"
<!DOCTYPE HTML>
<html lang="en">
    <head>
        <title>Marketing opt out</title>
    </head>
    <body>
        <p>{message}</p>
    </body>
</html>
"#
    )
}

#[derive(sqlx::FromRow)]
struct OptOutHolder {
    account_holder_id: i64,
    account_holder_uuid: Uuid,
    retailer_name: String,
    retailer_slug: String,
}

#[derive(sqlx::FromRow)]
struct UpdatedPreference {
    key_name: String,
    updated_at: DateTime<Utc>,
}

/// Switch off every boolean marketing preference of the holder owning `token`.
///
/// Unknown or malformed tokens, and tokens of another retailer's holder,
/// still get the generic confirmation page.
pub async fn unsubscribe(
    pool: &DbPool,
    retailer_slug: &str,
    token: Option<&str>,
) -> Result<String, AppError> {
    let Some(opt_out_token) = token.and_then(|t| Uuid::parse_str(t).ok()) else {
        tracing::warn!(retailer = retailer_slug, "Invalid marketing opt-out token");
        return Ok(opt_out_page(OPT_OUT_MESSAGE));
    };

    let mut tx = pool.begin().await?;
    let holder = sqlx::query_as::<_, OptOutHolder>(
        r#"
        SELECT ah.id AS account_holder_id, ah.account_holder_uuid,
               r.name AS retailer_name, r.slug AS retailer_slug
        FROM account_holder ah
        JOIN retailer r ON r.id = ah.retailer_id
        WHERE ah.opt_out_token = $1
        "#,
    )
    .bind(opt_out_token)
    .fetch_optional(&mut *tx)
    .await?;

    let holder = match holder {
        Some(holder) if holder.retailer_slug == retailer_slug => holder,
        Some(_) => {
            tracing::warn!(retailer = retailer_slug, "Opt-out token belongs to another retailer");
            return Ok(opt_out_page(OPT_OUT_MESSAGE));
        }
        None => {
            tracing::warn!(retailer = retailer_slug, "Unknown marketing opt-out token");
            return Ok(opt_out_page(OPT_OUT_MESSAGE));
        }
    };

    let updated = sqlx::query_as::<_, UpdatedPreference>(
        r#"
        UPDATE account_holder_marketing_preference
        SET value = 'False', updated_at = NOW()
        WHERE account_holder_id = $1 AND value_type = 'BOOLEAN' AND value != 'False'
        RETURNING key_name, updated_at
        "#,
    )
    .bind(holder.account_holder_id)
    .fetch_all(&mut *tx)
    .await?;

    let activities: Vec<_> = updated
        .iter()
        .map(|pref| {
            activity_service::marketing_opt_out(
                &holder.retailer_slug,
                holder.account_holder_uuid,
                &pref.key_name,
                pref.updated_at,
            )
        })
        .collect();
    activity_service::store_all(&mut tx, &activities).await?;
    tx.commit().await?;

    tracing::info!(
        account_holder_uuid = %holder.account_holder_uuid,
        preferences = updated.len(),
        "Marketing preferences unsubscribed"
    );
    Ok(opt_out_page(&format!(
        "{OPT_OUT_MESSAGE} for {}",
        holder.retailer_name
    )))
}

/// Reward details for the reward microsite.
///
/// # Errors
///
/// - `INVALID_REQUEST`: malformed reward UUID or unknown retailer
/// - `NO_REWARD_FOUND`: no issued reward with this UUID for the retailer
pub async fn reward_for_microsite(
    pool: &DbPool,
    retailer_slug: &str,
    reward_uuid: &str,
) -> Result<RewardMicrositeResponse, AppError> {
    let reward_uuid =
        Uuid::parse_str(reward_uuid).map_err(|_| AppError::Code(ErrorCode::InvalidRequest))?;
    let retailer = retailer_service::find_by_slug(pool, retailer_slug)
        .await?
        .ok_or(AppError::Code(ErrorCode::InvalidRequest))?;

    let reward = sqlx::query_as::<_, Reward>(
        r#"
        SELECT id, reward_uuid, reward_config_id, account_holder_id, code, deleted,
               issued_date, expiry_date, redeemed_date, cancelled_date, associated_url,
               retailer_id, campaign_id
        FROM reward
        WHERE reward_uuid = $1 AND retailer_id = $2 AND account_holder_id IS NOT NULL
        "#,
    )
    .bind(reward_uuid)
    .bind(retailer.id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::Code(ErrorCode::NoRewardFound))?;

    let template_slug =
        sqlx::query_scalar::<_, String>("SELECT reward_slug FROM reward_config WHERE id = $1")
            .bind(reward.reward_config_id)
            .fetch_one(pool)
            .await?;

    Ok(RewardMicrositeResponse {
        status: reward.status(Utc::now()),
        code: reward.code,
        expiry_date: reward.expiry_date.map(|d| d.date_naive()),
        template_slug,
        redeemed_date: reward.redeemed_date.map(|d| d.date_naive()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_wraps_the_message() {
        let page = opt_out_page("You have opted out of any further marketing for Test Retailer");
        assert!(page.contains("<title>Marketing opt out</title>"));
        assert!(page.contains("<p>You have opted out of any further marketing for Test Retailer</p>"));
    }
}
