//! Reward issuance and pending reward conversion.
//!
//! Rewards are pre-loaded codes waiting in the `reward` table with no account
//! holder. Issuing one allocates the next free code of a reward config.

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        campaign::{Campaign, CampaignStatus},
        reward::IssuedRewardReason,
        retailer::RewardConfig,
        task::{RewardIssuanceParams, TaskOutcome, TaskType},
    },
    services::{activity_service, retailer_service, task_service},
    state::AppState,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

/// Pending rewards converted per scheduler run.
pub const CONVERSION_BATCH_SIZE: i64 = 1000;

pub(crate) const CAMPAIGN_COLUMNS: &str =
    "id, status, name, slug, reward_config_id, retailer_id, loyalty_type, start_date, end_date";

#[derive(sqlx::FromRow)]
struct FreeReward {
    id: i64,
    reward_uuid: Uuid,
    expiry_date: Option<DateTime<Utc>>,
}

/// Link shown to the account holder for a pre-loaded reward.
pub fn associated_url(base_url: &str, retailer_slug: &str, reward_uuid: Uuid) -> String {
    format!(
        "{}/reward?retailer={retailer_slug}&reward={reward_uuid}",
        base_url.trim_end_matches('/')
    )
}

/// Expiry of a newly issued reward. A code loaded with an expiry keeps it.
pub fn expiry_date(
    existing: Option<DateTime<Utc>>,
    issued_at: DateTime<Utc>,
    validity_days: Option<i64>,
) -> Option<DateTime<Utc>> {
    existing.or_else(|| {
        validity_days
            .and_then(Duration::try_days)
            .and_then(|validity| issued_at.checked_add_signed(validity))
    })
}

/// Issue one reward to an account holder.
///
/// # Process
///
/// 1. Cancel the task if the campaign has been cancelled
/// 2. Claim one unallocated code of the reward config (`FOR UPDATE SKIP LOCKED`)
/// 3. Allocate it with issue date, expiry and microsite URL
/// 4. Record a REWARD_STATUS activity
///
/// When no code is available the task is re-queued after
/// `REWARD_ISSUANCE_REQUEUE_BACKOFF_SECONDS` without counting a failure.
pub async fn issue_reward(
    state: &AppState,
    params: &RewardIssuanceParams,
) -> Result<TaskOutcome, AppError> {
    let mut tx = state.pool.begin().await?;

    let campaign = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaign WHERE id = $1"
    ))
    .bind(params.campaign_id)
    .fetch_one(&mut *tx)
    .await?;
    if campaign.status == CampaignStatus::Cancelled {
        tracing::info!(campaign = %campaign.slug, "Campaign cancelled, reward not issued");
        return Ok(TaskOutcome::Cancelled);
    }

    let reward_config = sqlx::query_as::<_, RewardConfig>(
        "SELECT id, reward_slug, retailer_id, fetch_type_id, status, required_fields_values FROM reward_config WHERE id = $1",
    )
    .bind(params.reward_config_id)
    .fetch_one(&mut *tx)
    .await?;

    let free = sqlx::query_as::<_, FreeReward>(
        r#"
        SELECT id, reward_uuid, expiry_date
        FROM reward
        WHERE reward_config_id = $1 AND account_holder_id IS NULL AND deleted IS FALSE
        ORDER BY id
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(reward_config.id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(free) = free else {
        tracing::warn!(
            reward_slug = %reward_config.reward_slug,
            "No unallocated rewards available, issuance re-queued"
        );
        return Ok(TaskOutcome::Requeue {
            after_seconds: state.config.reward_issuance_requeue_backoff_seconds,
        });
    };

    let retailer = retailer_service::get_by_id(&mut *tx, campaign.retailer_id).await?;
    let account_holder_uuid = sqlx::query_scalar::<_, Uuid>(
        "SELECT account_holder_uuid FROM account_holder WHERE id = $1",
    )
    .bind(params.account_holder_id)
    .fetch_one(&mut *tx)
    .await?;

    let issued_at = Utc::now();
    let expiry = expiry_date(free.expiry_date, issued_at, reward_config.validity_days()?);
    sqlx::query(
        r#"
        UPDATE reward
        SET account_holder_id = $2,
            campaign_id = $3,
            issued_date = $4,
            expiry_date = $5,
            associated_url = $6,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(free.id)
    .bind(params.account_holder_id)
    .bind(campaign.id)
    .bind(issued_at)
    .bind(expiry)
    .bind(associated_url(
        &state.config.pre_loaded_reward_base_url,
        &retailer.slug,
        free.reward_uuid,
    ))
    .execute(&mut *tx)
    .await?;

    let activity = activity_service::reward_issued(&activity_service::IssuedReward {
        retailer: &retailer,
        campaign: Some(&campaign),
        account_holder_uuid,
        reward_uuid: free.reward_uuid,
        reward_slug: &reward_config.reward_slug,
        issued_at,
        reason: params.reason.describe(),
        pending_reward_uuid: params.pending_reward_uuid,
    });
    activity_service::store(&mut tx, &activity).await?;

    tx.commit().await?;

    tracing::info!(reward_uuid = %free.reward_uuid, account_holder_uuid = %account_holder_uuid, "Reward issued");
    Ok(TaskOutcome::Success)
}

/// A pending reward being turned into issuance tasks.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ConvertiblePendingReward {
    pub id: i64,
    pub pending_reward_uuid: Uuid,
    pub account_holder_id: i64,
    pub campaign_id: i64,
    pub reward_config_id: i64,
    pub count: i32,
}

/// Issuance task parameters for every reward held by the pending rewards.
pub(crate) fn conversion_params(
    pending_rewards: &[ConvertiblePendingReward],
) -> Vec<RewardIssuanceParams> {
    pending_rewards
        .iter()
        .flat_map(|pending| {
            let params = RewardIssuanceParams {
                account_holder_id: pending.account_holder_id,
                campaign_id: pending.campaign_id,
                reward_config_id: pending.reward_config_id,
                reason: IssuedRewardReason::Converted,
                pending_reward_uuid: Some(pending.pending_reward_uuid),
            };
            std::iter::repeat_n(params, pending.count.max(0) as usize)
        })
        .collect()
}

/// Queue an issuance task per reward held by already deleted pending rewards.
pub(crate) async fn enqueue_conversions(
    conn: &mut PgConnection,
    pending_rewards: &[ConvertiblePendingReward],
) -> Result<usize, AppError> {
    let params = conversion_params(pending_rewards);
    task_service::enqueue_many(conn, TaskType::RewardIssuance, &params).await?;
    Ok(params.len())
}

/// Delete a campaign's pending rewards and queue their issuance.
pub(crate) async fn convert_campaign_pending_rewards(
    conn: &mut PgConnection,
    campaign_id: i64,
) -> Result<usize, AppError> {
    let deleted = sqlx::query_as::<_, ConvertiblePendingReward>(
        r#"
        DELETE FROM pending_reward
        WHERE campaign_id = $1
        RETURNING id, pending_reward_uuid, account_holder_id, campaign_id, reward_config_id, count
        "#,
    )
    .bind(campaign_id)
    .fetch_all(&mut *conn)
    .await?;
    let tasks = enqueue_conversions(conn, &deleted).await?;
    tracing::info!(campaign_id, pending_rewards = deleted.len(), tasks, "Pending rewards converted");
    Ok(tasks)
}

/// Convert every pending reward whose conversion date has passed.
///
/// Runs in batches of [`CONVERSION_BATCH_SIZE`]; rows locked by another
/// scheduler are skipped. Returns the number of pending rewards converted.
pub async fn convert_due_pending_rewards(pool: &DbPool) -> Result<u64, AppError> {
    let mut converted = 0u64;
    loop {
        let mut tx = pool.begin().await?;
        let due = sqlx::query_as::<_, ConvertiblePendingReward>(
            r#"
            SELECT id, pending_reward_uuid, account_holder_id, campaign_id, reward_config_id, count
            FROM pending_reward
            WHERE conversion_date <= NOW()
            ORDER BY conversion_date
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(CONVERSION_BATCH_SIZE)
        .fetch_all(&mut *tx)
        .await?;

        if due.is_empty() {
            return Ok(converted);
        }
        let ids: Vec<i64> = due.iter().map(|p| p.id).collect();
        sqlx::query("DELETE FROM pending_reward WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        let tasks = enqueue_conversions(&mut tx, &due).await?;
        tx.commit().await?;

        tracing::info!(pending_rewards = due.len(), tasks, "Pending rewards converted");
        converted += due.len() as u64;
        if (due.len() as i64) < CONVERSION_BATCH_SIZE {
            return Ok(converted);
        }
    }
}
