//! Campaign lifecycle service.
//!
//! This service handles:
//! - Loading campaigns together with their earn and reward rules
//! - Status changes (`draft` → `active` → `ended`/`cancelled`)
//! - Migrating account holders from one campaign to its replacement
//!
//! A retailer that is not in TEST must always keep one active campaign, so
//! the last active campaign can be neither ended nor cancelled.

use crate::{
    db::DbPool,
    error::{AppError, ErrorCode},
    models::{
        activity::Activity,
        campaign::{
            Campaign, CampaignMigrationRequest, CampaignStatus, CampaignStatusChangeRequest,
            CampaignWithRules, EarnRule, LoyaltyType, PendingRewardAction,
            PendingRewardMigrationAction, RewardRule,
        },
        retailer::Retailer,
    },
    services::{
        activity_service::{self, Migration},
        reward_service::{self, CAMPAIGN_COLUMNS},
        task_service,
    },
};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

/// Campaigns of a retailer in the given status, with their rules.
pub async fn campaigns_with_rules(
    conn: &mut PgConnection,
    retailer_id: i64,
    status: CampaignStatus,
) -> Result<Vec<CampaignWithRules>, AppError> {
    let campaigns = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaign WHERE retailer_id = $1 AND status = $2 ORDER BY id"
    ))
    .bind(retailer_id)
    .bind(status)
    .fetch_all(&mut *conn)
    .await?;
    attach_rules(conn, campaigns).await
}

/// One campaign of the retailer by slug, with its rules.
///
/// With `lock` the campaign row is held `FOR UPDATE` until the caller commits.
pub async fn find_with_rules(
    conn: &mut PgConnection,
    retailer_id: i64,
    slug: &str,
    lock: bool,
) -> Result<Option<CampaignWithRules>, AppError> {
    let lock_clause = if lock { " FOR UPDATE" } else { "" };
    let campaign = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaign WHERE retailer_id = $1 AND slug = $2{lock_clause}"
    ))
    .bind(retailer_id)
    .bind(slug)
    .fetch_optional(&mut *conn)
    .await?;

    match campaign {
        Some(campaign) => Ok(attach_rules(conn, vec![campaign]).await?.pop()),
        None => Ok(None),
    }
}

async fn attach_rules(
    conn: &mut PgConnection,
    campaigns: Vec<Campaign>,
) -> Result<Vec<CampaignWithRules>, AppError> {
    if campaigns.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i64> = campaigns.iter().map(|c| c.id).collect();

    let earn_rules = sqlx::query_as::<_, EarnRule>(
        r#"
        SELECT id, campaign_id, threshold, increment,
               ROUND(increment_multiplier * 100)::BIGINT AS multiplier_hundredths,
               max_amount
        FROM earn_rule
        WHERE campaign_id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let reward_rules = sqlx::query_as::<_, RewardRule>(
        r#"
        SELECT id, campaign_id, reward_config_id, reward_goal, reward_slug, allocation_window, reward_cap
        FROM reward_rule
        WHERE campaign_id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(campaigns
        .into_iter()
        .map(|campaign| CampaignWithRules {
            earn_rule: earn_rules
                .iter()
                .find(|r| r.campaign_id == campaign.id)
                .cloned(),
            reward_rule: reward_rules
                .iter()
                .find(|r| r.campaign_id == campaign.id)
                .cloned(),
            campaign,
        })
        .collect())
}

/// Error for a requested status the campaign cannot move to.
pub fn check_status_change(
    campaign: &CampaignWithRules,
    requested: CampaignStatus,
) -> Option<ErrorCode> {
    if !requested.is_valid_transition_from(campaign.campaign.status) {
        Some(ErrorCode::InvalidStatusRequested)
    } else if requested == CampaignStatus::Active && !campaign.is_activable() {
        Some(ErrorCode::MissingCampaignComponents)
    } else {
        None
    }
}

/// Whether ending `campaign_slug` would leave the retailer without an active campaign.
///
/// TEST retailers may run with none, but there must still be one to end.
pub fn is_last_active_campaign(
    retailer: &Retailer,
    active_slugs: &[String],
    campaign_slug: &str,
) -> bool {
    active_slugs.is_empty()
        || (!retailer.is_test() && active_slugs.iter().all(|slug| slug == campaign_slug))
}

async fn active_campaign_slugs(
    conn: &mut PgConnection,
    retailer_id: i64,
) -> Result<Vec<String>, AppError> {
    let slugs = sqlx::query_scalar::<_, String>(
        "SELECT slug FROM campaign WHERE retailer_id = $1 AND status = 'ACTIVE'",
    )
    .bind(retailer_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(slugs)
}

/// Change the status of a campaign.
///
/// # Process
///
/// 1. Validate the transition and, when ending or cancelling, that another
///    campaign stays active
/// 2. Convert or remove pending rewards of campaigns with a refund window
/// 3. Update the campaign status and dates
/// 4. `active`: create balances and release waiting activations;
///    `ended`/`cancelled`: delete balances, and cancel issued rewards on cancellation
///
/// # Errors
///
/// - `NO_CAMPAIGN_FOUND`: unknown slug for this retailer
/// - `INVALID_STATUS_REQUESTED`: illegal transition or last active campaign
/// - `MISSING_CAMPAIGN_COMPONENTS`: activation without earn and reward rules
pub async fn change_status(
    pool: &DbPool,
    retailer: &Retailer,
    request: &CampaignStatusChangeRequest,
) -> Result<(), AppError> {
    let requested = request.requested_status;
    let mut tx = pool.begin().await?;

    let campaign = find_with_rules(&mut tx, retailer.id, &request.campaign_slug, true)
        .await?
        .ok_or(AppError::Code(ErrorCode::NoCampaignFound))?;
    if let Some(code) = check_status_change(&campaign, requested) {
        return Err(AppError::Code(code));
    }
    let ending = matches!(requested, CampaignStatus::Ended | CampaignStatus::Cancelled);
    if ending {
        let active = active_campaign_slugs(&mut tx, retailer.id).await?;
        if is_last_active_campaign(retailer, &active, &campaign.campaign.slug) {
            return Err(AppError::Code(ErrorCode::InvalidStatusRequested));
        }
    }

    let mut activities = Vec::new();
    let has_refund_window = campaign
        .reward_rule
        .as_ref()
        .is_some_and(|rule| rule.allocation_window > 0);
    if ending && has_refund_window {
        if requested == CampaignStatus::Ended
            && request.pending_rewards_action == PendingRewardAction::Convert
        {
            reward_service::convert_campaign_pending_rewards(&mut tx, campaign.campaign.id).await?;
        } else {
            activities.extend(remove_pending_rewards(&mut tx, retailer, &campaign.campaign).await?);
        }
    }

    let sso_username = &request.activity_metadata.sso_username;
    activities.push(
        update_status(&mut tx, retailer, &campaign.campaign, requested, sso_username).await?,
    );

    match requested {
        CampaignStatus::Active => {
            create_balances(&mut tx, retailer.id, campaign.campaign.id).await?;
            task_service::release_waiting_activations(&mut tx, retailer.id).await?;
        }
        CampaignStatus::Ended | CampaignStatus::Cancelled => {
            delete_balances(&mut tx, campaign.campaign.id).await?;
        }
        CampaignStatus::Draft => {}
    }
    if requested == CampaignStatus::Cancelled {
        activities.extend(cancel_issued_rewards(&mut tx, retailer, &campaign).await?);
    }

    activity_service::store_all(&mut tx, &activities).await?;
    tx.commit().await?;

    tracing::info!(
        campaign = %campaign.campaign.slug,
        status = requested.as_str(),
        "Campaign status changed"
    );
    Ok(())
}

/// Set the new status with its start or end date and build the CAMPAIGN activity.
async fn update_status(
    conn: &mut PgConnection,
    retailer: &Retailer,
    campaign: &Campaign,
    requested: CampaignStatus,
    sso_username: &str,
) -> Result<Activity, AppError> {
    let updated_at = sqlx::query_scalar::<_, DateTime<Utc>>(
        r#"
        UPDATE campaign
        SET status = $2,
            start_date = CASE WHEN $2 = 'ACTIVE'::campaign_status THEN COALESCE(start_date, NOW()) ELSE start_date END,
            end_date = CASE WHEN $2 IN ('ENDED'::campaign_status, 'CANCELLED'::campaign_status) THEN NOW() ELSE end_date END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING updated_at
        "#,
    )
    .bind(campaign.id)
    .bind(requested)
    .fetch_one(&mut *conn)
    .await?;

    Ok(activity_service::campaign_status_change(
        &retailer.slug,
        campaign,
        sso_username,
        campaign.status,
        requested,
        updated_at,
    ))
}

/// Zero balances for every active account holder of the retailer.
///
/// Balances of a retailer with a `balance_lifespan` get their first reset date.
async fn create_balances(
    conn: &mut PgConnection,
    retailer_id: i64,
    campaign_id: i64,
) -> Result<u64, AppError> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO campaign_balance (account_holder_id, campaign_id, balance, reset_date)
        SELECT ah.id, $2, 0, CURRENT_DATE + r.balance_lifespan
        FROM account_holder ah
        JOIN retailer r ON r.id = ah.retailer_id
        WHERE ah.retailer_id = $1 AND ah.status = 'ACTIVE'
        ON CONFLICT (account_holder_id, campaign_id) DO NOTHING
        "#,
    )
    .bind(retailer_id)
    .bind(campaign_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    tracing::info!(campaign_id, inserted, "Campaign balances created");
    Ok(inserted)
}

async fn delete_balances(conn: &mut PgConnection, campaign_id: i64) -> Result<u64, AppError> {
    let deleted = sqlx::query("DELETE FROM campaign_balance WHERE campaign_id = $1")
        .bind(campaign_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    tracing::info!(campaign_id, deleted, "Campaign balances deleted");
    Ok(deleted)
}

#[derive(sqlx::FromRow)]
struct AffectedReward {
    reward_uuid: Uuid,
    account_holder_uuid: Uuid,
    at: DateTime<Utc>,
}

async fn remove_pending_rewards(
    conn: &mut PgConnection,
    retailer: &Retailer,
    campaign: &Campaign,
) -> Result<Vec<Activity>, AppError> {
    let removed = sqlx::query_as::<_, AffectedReward>(
        r#"
        DELETE FROM pending_reward pr
        USING account_holder ah
        WHERE pr.campaign_id = $1 AND ah.id = pr.account_holder_id
        RETURNING pr.pending_reward_uuid AS reward_uuid, ah.account_holder_uuid, NOW() AS at
        "#,
    )
    .bind(campaign.id)
    .fetch_all(&mut *conn)
    .await?;
    tracing::info!(campaign = %campaign.slug, count = removed.len(), "Pending rewards removed");

    Ok(removed
        .into_iter()
        .map(|r| {
            activity_service::pending_reward_removed(
                retailer,
                &campaign.slug,
                r.account_holder_uuid,
                r.reward_uuid,
                r.at,
            )
        })
        .collect())
}

/// Cancel every issued, unexpired reward of the campaign and its reward config.
async fn cancel_issued_rewards(
    conn: &mut PgConnection,
    retailer: &Retailer,
    campaign: &CampaignWithRules,
) -> Result<Vec<Activity>, AppError> {
    let cancelled = sqlx::query_as::<_, AffectedReward>(
        r#"
        UPDATE reward r
        SET cancelled_date = NOW(), updated_at = NOW()
        FROM account_holder ah
        WHERE r.campaign_id = $1
          AND r.account_holder_id = ah.id
          AND r.issued_date IS NOT NULL
          AND r.deleted IS FALSE
          AND (r.expiry_date IS NULL OR r.expiry_date >= NOW())
        RETURNING r.reward_uuid, ah.account_holder_uuid, r.cancelled_date AS at
        "#,
    )
    .bind(campaign.campaign.id)
    .fetch_all(&mut *conn)
    .await?;

    sqlx::query("UPDATE reward_config SET status = 'CANCELLED', updated_at = NOW() WHERE id = $1")
        .bind(campaign.campaign.reward_config_id)
        .execute(&mut *conn)
        .await?;
    tracing::info!(campaign = %campaign.campaign.slug, count = cancelled.len(), "Rewards cancelled");

    Ok(cancelled
        .into_iter()
        .map(|r| {
            activity_service::reward_cancelled(
                &retailer.slug,
                &campaign.campaign.slug,
                r.account_holder_uuid,
                r.reward_uuid,
                r.at,
            )
        })
        .collect())
}

/// Minimum balance carried over by a migration.
pub fn qualifying_balance(reward_goal: i64, qualifying_threshold: i64) -> i64 {
    reward_goal * qualifying_threshold / 100
}

/// Balance in the new campaign, rounded up. Stamps round up to whole stamps.
pub fn converted_balance(balance: i64, conversion_rate: i64, loyalty_type: LoyaltyType) -> i64 {
    let scaled = balance * conversion_rate;
    match loyalty_type {
        LoyaltyType::Accumulator => scaled.div_euclid(100) + i64::from(scaled.rem_euclid(100) != 0),
        LoyaltyType::Stamps => {
            (scaled.div_euclid(10_000) + i64::from(scaled.rem_euclid(10_000) != 0)) * 100
        }
    }
}

/// Validation failures of a migration request, grouped by error code.
pub fn migration_errors(
    retailer: &Retailer,
    from: &CampaignWithRules,
    to: &CampaignWithRules,
    active_slugs: &[String],
) -> Vec<(ErrorCode, Vec<String>)> {
    let mut missing_components = Vec::new();
    let mut invalid_status = Vec::new();

    if !CampaignStatus::Ended.is_valid_transition_from(from.campaign.status)
        || is_last_active_campaign(retailer, active_slugs, &from.campaign.slug)
    {
        invalid_status.push(from.campaign.slug.clone());
    }
    if !CampaignStatus::Active.is_valid_transition_from(to.campaign.status) {
        invalid_status.push(to.campaign.slug.clone());
    }
    if !to.is_activable() {
        missing_components.push(to.campaign.slug.clone());
    }

    [
        (ErrorCode::MissingCampaignComponents, missing_components),
        (ErrorCode::InvalidStatusRequested, invalid_status),
    ]
    .into_iter()
    .filter(|(_, slugs)| !slugs.is_empty())
    .collect()
}

#[derive(sqlx::FromRow)]
struct QualifyingBalance {
    account_holder_id: i64,
    account_holder_uuid: Uuid,
    balance: i64,
    reset_date: Option<NaiveDate>,
}

/// Migrate account holders from an active campaign to a draft replacement.
///
/// # Process
///
/// 1. Activate `to_campaign` and create its balances
/// 2. Optionally carry qualifying balances over at the conversion rate
/// 3. Transfer, convert or remove the pending rewards of `from_campaign`
/// 4. End `from_campaign` and delete its balances
/// 5. Record a CAMPAIGN_MIGRATION activity
///
/// # Errors
///
/// - 404 `NO_CAMPAIGN_FOUND` list naming the unknown slugs
/// - `INVALID_REQUEST`: the campaigns have different loyalty types
/// - 409 list of `INVALID_STATUS_REQUESTED` / `MISSING_CAMPAIGN_COMPONENTS`
pub async fn migrate(
    pool: &DbPool,
    retailer: &Retailer,
    request: &CampaignMigrationRequest,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let from = find_with_rules(&mut tx, retailer.id, &request.from_campaign, false).await?;
    let to = find_with_rules(&mut tx, retailer.id, &request.to_campaign, false).await?;
    let (from, to) = match (from, to) {
        (Some(from), Some(to)) => (from, to),
        (from, to) => {
            let mut missing = Vec::new();
            if from.is_none() {
                missing.push(request.from_campaign.clone());
            }
            if to.is_none() {
                missing.push(request.to_campaign.clone());
            }
            return Err(AppError::Campaigns {
                status: StatusCode::NOT_FOUND,
                errors: vec![(ErrorCode::NoCampaignFound, missing)],
            });
        }
    };

    if from.campaign.loyalty_type != to.campaign.loyalty_type {
        return Err(AppError::Code(ErrorCode::InvalidRequest));
    }
    let active = active_campaign_slugs(&mut tx, retailer.id).await?;
    let errors = migration_errors(retailer, &from, &to, &active);
    if !errors.is_empty() {
        return Err(AppError::Campaigns {
            status: StatusCode::CONFLICT,
            errors,
        });
    }

    let now = Utc::now();
    let sso_username = &request.activity_metadata.sso_username;
    let balance_action = &request.balance_action;
    let migration = Migration {
        retailer_slug: &retailer.slug,
        from_campaign_slug: &from.campaign.slug,
        to_campaign_slug: &to.campaign.slug,
        sso_username,
        transfer_balance_requested: balance_action.transfer,
        conversion_rate: balance_action.conversion_rate,
        qualifying_threshold: balance_action.qualifying_threshold,
        pending_rewards: match request.pending_rewards_action {
            PendingRewardMigrationAction::Transfer => "transfer",
            PendingRewardMigrationAction::Convert => "convert",
            PendingRewardMigrationAction::Remove => "remove",
        },
        at: now,
    };

    let mut activities = vec![
        update_status(&mut tx, retailer, &to.campaign, CampaignStatus::Active, sso_username)
            .await?,
    ];
    create_balances(&mut tx, retailer.id, to.campaign.id).await?;

    if balance_action.transfer {
        let goal = from.reward_rule.as_ref().map_or(0, |rule| rule.reward_goal);
        let qualifying = sqlx::query_as::<_, QualifyingBalance>(
            r#"
            SELECT cb.account_holder_id, ah.account_holder_uuid, cb.balance, cb.reset_date
            FROM campaign_balance cb
            JOIN account_holder ah ON ah.id = cb.account_holder_id
            WHERE cb.campaign_id = $1 AND cb.balance >= $2 AND cb.balance > 0
            ORDER BY cb.account_holder_id
            FOR UPDATE OF cb
            "#,
        )
        .bind(from.campaign.id)
        .bind(qualifying_balance(goal, balance_action.qualifying_threshold))
        .fetch_all(&mut *tx)
        .await?;

        let holder_ids: Vec<i64> = qualifying.iter().map(|q| q.account_holder_id).collect();
        let balances: Vec<i64> = qualifying
            .iter()
            .map(|q| {
                converted_balance(
                    q.balance,
                    balance_action.conversion_rate,
                    to.campaign.loyalty_type,
                )
            })
            .collect();
        let reset_dates: Vec<Option<NaiveDate>> = qualifying.iter().map(|q| q.reset_date).collect();
        sqlx::query(
            r#"
            UPDATE campaign_balance cb
            SET balance = v.balance, reset_date = v.reset_date, updated_at = NOW()
            FROM UNNEST($2::BIGINT[], $3::BIGINT[], $4::DATE[]) AS v(account_holder_id, balance, reset_date)
            WHERE cb.campaign_id = $1 AND cb.account_holder_id = v.account_holder_id
            "#,
        )
        .bind(to.campaign.id)
        .bind(&holder_ids)
        .bind(&balances)
        .bind(&reset_dates)
        .execute(&mut *tx)
        .await?;

        activities.extend(qualifying.iter().zip(&balances).map(|(q, balance)| {
            activity_service::migrated_balance(
                &migration,
                q.account_holder_uuid,
                to.campaign.loyalty_type,
                *balance,
            )
        }));
    }

    match request.pending_rewards_action {
        PendingRewardMigrationAction::Transfer => {
            let transferred = sqlx::query_as::<_, AffectedReward>(
                r#"
                UPDATE pending_reward pr
                SET campaign_id = $2, updated_at = NOW()
                FROM account_holder ah
                WHERE pr.campaign_id = $1 AND ah.id = pr.account_holder_id
                RETURNING pr.pending_reward_uuid AS reward_uuid, ah.account_holder_uuid, NOW() AS at
                "#,
            )
            .bind(from.campaign.id)
            .bind(to.campaign.id)
            .fetch_all(&mut *tx)
            .await?;
            activities.extend(transferred.into_iter().map(|r| {
                activity_service::pending_reward_transferred(
                    retailer,
                    &from.campaign.slug,
                    &to.campaign.slug,
                    r.account_holder_uuid,
                    r.reward_uuid,
                    r.at,
                )
            }));
        }
        PendingRewardMigrationAction::Convert => {
            reward_service::convert_campaign_pending_rewards(&mut tx, from.campaign.id).await?;
        }
        PendingRewardMigrationAction::Remove => {
            activities.extend(remove_pending_rewards(&mut tx, retailer, &from.campaign).await?);
        }
    }

    activities.push(
        update_status(&mut tx, retailer, &from.campaign, CampaignStatus::Ended, sso_username)
            .await?,
    );
    delete_balances(&mut tx, from.campaign.id).await?;
    activities.push(activity_service::campaign_migration(&migration));

    activity_service::store_all(&mut tx, &activities).await?;
    tx.commit().await?;

    tracing::info!(
        from = %from.campaign.slug,
        to = %to.campaign.slug,
        "Campaign migration complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::retailer::RetailerStatus;

    fn retailer(status: RetailerStatus) -> Retailer {
        Retailer {
            id: 1,
            name: "Test Retailer".into(),
            slug: "test-retailer".into(),
            account_number_prefix: "RTST".into(),
            account_number_length: 10,
            profile_config: String::new(),
            marketing_preference_config: String::new(),
            loyalty_name: "Bink".into(),
            status,
            balance_lifespan: None,
            created_at: Utc::now(),
        }
    }

    fn campaign(slug: &str, status: CampaignStatus, complete: bool) -> CampaignWithRules {
        CampaignWithRules {
            campaign: Campaign {
                id: 1,
                status,
                name: slug.to_string(),
                slug: slug.to_string(),
                reward_config_id: 1,
                retailer_id: 1,
                loyalty_type: LoyaltyType::Accumulator,
                start_date: None,
                end_date: None,
            },
            earn_rule: complete.then(|| EarnRule {
                id: 1,
                campaign_id: 1,
                threshold: 500,
                increment: None,
                multiplier_hundredths: 100,
                max_amount: 0,
            }),
            reward_rule: complete.then(|| RewardRule {
                id: 1,
                campaign_id: 1,
                reward_config_id: 1,
                reward_goal: 1000,
                reward_slug: "10percentoff".into(),
                allocation_window: 0,
                reward_cap: None,
            }),
        }
    }

    #[test]
    fn status_change_checks() {
        let draft = campaign("spring", CampaignStatus::Draft, true);
        assert_eq!(check_status_change(&draft, CampaignStatus::Active), None);
        assert_eq!(
            check_status_change(&draft, CampaignStatus::Ended),
            Some(ErrorCode::InvalidStatusRequested)
        );

        let incomplete = campaign("spring", CampaignStatus::Draft, false);
        assert_eq!(
            check_status_change(&incomplete, CampaignStatus::Active),
            Some(ErrorCode::MissingCampaignComponents)
        );
    }

    #[test]
    fn last_active_campaign_is_protected_outside_test() {
        let active = vec!["spring".to_string()];
        assert!(is_last_active_campaign(
            &retailer(RetailerStatus::Active),
            &active,
            "spring"
        ));
        assert!(!is_last_active_campaign(
            &retailer(RetailerStatus::Test),
            &active,
            "spring"
        ));
        assert!(is_last_active_campaign(&retailer(RetailerStatus::Test), &[], "spring"));

        let two = vec!["spring".to_string(), "summer".to_string()];
        assert!(!is_last_active_campaign(
            &retailer(RetailerStatus::Active),
            &two,
            "spring"
        ));
    }

    #[test]
    fn balances_convert_rounding_up() {
        assert_eq!(converted_balance(1001, 50, LoyaltyType::Accumulator), 501);
        assert_eq!(converted_balance(1000, 100, LoyaltyType::Accumulator), 1000);
        // 3.5 stamps at 50% is 1.75 stamps, rounded up to 2
        assert_eq!(converted_balance(350, 50, LoyaltyType::Stamps), 200);
        assert_eq!(converted_balance(400, 50, LoyaltyType::Stamps), 200);
        assert_eq!(qualifying_balance(1000, 25), 250);
    }

    #[test]
    fn migration_errors_are_grouped_by_code() {
        let retailer = retailer(RetailerStatus::Active);
        let from = campaign("old", CampaignStatus::Active, true);
        let to = campaign("new", CampaignStatus::Draft, false);
        let active = vec!["old".to_string()];

        let errors = migration_errors(&retailer, &from, &to, &active);
        assert_eq!(
            errors,
            vec![
                (ErrorCode::MissingCampaignComponents, vec!["new".to_string()]),
                (ErrorCode::InvalidStatusRequested, vec!["old".to_string()]),
            ]
        );

        let to = campaign("new", CampaignStatus::Draft, true);
        let active = vec!["old".to_string(), "other".to_string()];
        assert!(migration_errors(&retailer, &from, &to, &active).is_empty());
    }
}
