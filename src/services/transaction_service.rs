//! Transaction service - earn processing for retailer transactions.
//!
//! This service handles:
//! - Eligibility checks on the account holder and campaigns
//! - Duplicate detection on `(transaction_id, retailer)`
//! - Balance adjustments per active campaign, including refunds
//! - Pending rewards and reward issuance once a goal is met
//!
//! # Atomicity Guarantees
//!
//! Everything a processed transaction changes (balances, earns, pending
//! rewards, issuance tasks and activities) is written in one PostgreSQL
//! transaction. Campaign balances are locked `FOR UPDATE` for its duration.

use crate::{
    db::{DbPool, is_unique_violation},
    error::{AppError, ErrorCode},
    models::{
        account_holder::{AccountHolder, AccountHolderStatus, PendingReward},
        activity::Activity,
        campaign::{CampaignStatus, CampaignWithRules, EarnRule, RewardRule},
        reward::IssuedRewardReason,
        retailer::Retailer,
        task::{RewardIssuanceParams, TaskType},
        transaction::{CreateTransactionRequest, Transaction},
    },
    services::{
        activity_service::{self, BalanceChange},
        campaign_service,
        earn::{self, CampaignEarn},
        refund, retailer_service, task_service,
    },
};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use sqlx::{Connection, PgConnection};
use std::collections::HashMap;
use uuid::Uuid;

const TRANSACTION_COLUMNS: &str = "id, account_holder_id, retailer_id, transaction_id, amount, mid, \
     datetime, payment_transaction_id, processed";

/// Result of a processed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedTransaction {
    pub response: &'static str,
    /// A refund no campaign accepted.
    pub invalid_refund: bool,
}

/// Response body for a processed transaction.
pub fn transaction_response(accepted: bool, is_refund: bool) -> &'static str {
    match (accepted, is_refund) {
        (true, true) => "Refund accepted",
        (true, false) => "Awarded",
        (false, true) => "Refunds not accepted",
        (false, false) => "Threshold not met",
    }
}

/// Process a transaction reported by a retailer.
///
/// # Process
///
/// 1. Check the account holder, transaction date and campaigns
/// 2. Store the transaction; a duplicate is stored unprocessed and rejected
/// 3. Adjust the balance of every campaign active at the transaction date
/// 4. Record TX_HISTORY and the activities of each adjustment
/// 5. Record TX_IMPORT whatever the outcome
///
/// # Returns
///
/// The response string: `Awarded`, `Threshold not met`, `Refund accepted`
/// or `Refunds not accepted`.
///
/// # Errors
///
/// - `USER_NOT_FOUND` / `USER_NOT_ACTIVE`: no usable account holder
/// - `INVALID_TX_DATE`: transaction predates the enrolment
/// - `NO_ACTIVE_CAMPAIGNS`: nothing was running at the transaction date
/// - `DUPLICATE_TRANSACTION`: the transaction id was already processed
pub async fn process_transaction(
    pool: &DbPool,
    retailer: &Retailer,
    request: &CreateTransactionRequest,
) -> Result<&'static str, AppError> {
    let mut campaign_slugs = Vec::new();
    let outcome = handle_transaction(pool, retailer, request, &mut campaign_slugs).await;

    let (error, invalid_refund) = match &outcome {
        Ok(processed) => (None, processed.invalid_refund),
        Err(e) => (Some(e), false),
    };
    let activity =
        activity_service::tx_import(retailer, request, &campaign_slugs, error, invalid_refund);
    let mut conn = pool.acquire().await?;
    activity_service::store(&mut conn, &activity).await?;

    outcome.map(|processed| processed.response)
}

async fn handle_transaction(
    pool: &DbPool,
    retailer: &Retailer,
    request: &CreateTransactionRequest,
    campaign_slugs: &mut Vec<String>,
) -> Result<ProcessedTransaction, AppError> {
    let holder = sqlx::query_as::<_, AccountHolder>(
        r#"
        SELECT id, email, status, account_number, account_holder_uuid, opt_out_token, retailer_id, created_at
        FROM account_holder
        WHERE retailer_id = $1 AND account_holder_uuid = $2
        "#,
    )
    .bind(retailer.id)
    .bind(request.account_holder_uuid)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::Code(ErrorCode::UserNotFound))?;
    if holder.status != AccountHolderStatus::Active {
        return Err(AppError::Code(ErrorCode::UserNotActive));
    }
    if holder.created_at > request.datetime {
        return Err(AppError::Code(ErrorCode::InvalidTxDate));
    }

    let mut tx = pool.begin().await?;

    let campaigns: Vec<CampaignWithRules> =
        campaign_service::campaigns_with_rules(&mut tx, retailer.id, CampaignStatus::Active)
            .await?
            .into_iter()
            .filter(|c| c.campaign.is_active_at(request.datetime))
            .collect();
    if campaigns.is_empty() {
        return Err(AppError::Code(ErrorCode::NoActiveCampaigns));
    }
    campaign_slugs.extend(campaigns.iter().map(|c| c.campaign.slug.clone()));

    let Some(transaction) = insert_transaction(&mut tx, retailer, holder.id, request).await? else {
        tx.commit().await?;
        tracing::warn!(transaction_id = %request.transaction_id, "Duplicate transaction");
        return Err(AppError::Code(ErrorCode::DuplicateTransaction));
    };

    let campaign_ids: Vec<i64> = campaigns.iter().map(|c| c.campaign.id).collect();
    let mut balances = lock_balances(&mut tx, retailer, holder.id, &campaign_ids).await?;

    let mut activities = Vec::new();
    let mut earns = Vec::with_capacity(campaigns.len());
    for rules in &campaigns {
        let (Some(earn_rule), Some(reward_rule)) = (&rules.earn_rule, &rules.reward_rule) else {
            tracing::warn!(campaign = %rules.campaign.slug, "Active campaign is missing its rules");
            continue;
        };
        let balance = balances.entry(rules.campaign.id).or_insert(0);
        let mut adjuster = Adjuster {
            conn: &mut *tx,
            retailer,
            holder: &holder,
            transaction: &transaction,
            activities: &mut activities,
        };
        earns.push(
            adjuster
                .adjust(rules, earn_rule, reward_rule, balance)
                .await?,
        );
    }

    let store_name = retailer_service::store_name(&mut *tx, &transaction.mid).await?;
    let history = activity_service::tx_history(
        retailer,
        holder.account_holder_uuid,
        &transaction,
        &earns,
        &store_name,
    );
    activities.insert(0, history);
    activity_service::store_all(&mut tx, &activities).await?;

    tx.commit().await?;

    let accepted = earns.iter().any(|e| e.accepted);
    let is_refund = transaction.is_refund();
    tracing::info!(
        transaction_id = %transaction.transaction_id,
        accepted,
        is_refund,
        "Transaction processed"
    );
    Ok(ProcessedTransaction {
        response: transaction_response(accepted, is_refund),
        invalid_refund: is_refund && !accepted,
    })
}

/// Store the transaction as processed, or as a duplicate when the id is taken.
///
/// Returns `None` for a duplicate.
async fn insert_transaction(
    conn: &mut PgConnection,
    retailer: &Retailer,
    account_holder_id: i64,
    request: &CreateTransactionRequest,
) -> Result<Option<Transaction>, AppError> {
    let sql = format!(
        r#"
        INSERT INTO transaction (
            account_holder_id, retailer_id, transaction_id, amount, mid, datetime,
            payment_transaction_id, processed
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING {TRANSACTION_COLUMNS}
        "#
    );
    let insert = |processed: Option<bool>| {
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(account_holder_id)
            .bind(retailer.id)
            .bind(request.transaction_id.clone())
            .bind(request.amount)
            .bind(request.mid.clone())
            .bind(request.datetime)
            .bind(request.payment_transaction_id.clone())
            .bind(processed)
    };

    let mut savepoint = conn.begin().await?;
    match insert(Some(true)).fetch_one(&mut *savepoint).await {
        Ok(transaction) => {
            savepoint.commit().await?;
            Ok(Some(transaction))
        }
        Err(e) if is_unique_violation(&e) => {
            savepoint.rollback().await?;
            insert(None).fetch_one(&mut *conn).await?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Lock the holder's balances of the given campaigns, creating missing ones at zero.
async fn lock_balances(
    conn: &mut PgConnection,
    retailer: &Retailer,
    account_holder_id: i64,
    campaign_ids: &[i64],
) -> Result<HashMap<i64, i64>, AppError> {
    sqlx::query(
        r#"
        INSERT INTO campaign_balance (account_holder_id, campaign_id, balance, reset_date)
        SELECT $1, campaign_id, 0, CURRENT_DATE + $3::INTEGER FROM UNNEST($2::BIGINT[]) AS campaign_id
        ON CONFLICT (account_holder_id, campaign_id) DO NOTHING
        "#,
    )
    .bind(account_holder_id)
    .bind(campaign_ids)
    .bind(retailer.balance_lifespan)
    .execute(&mut *conn)
    .await?;

    let rows = sqlx::query_as::<_, (i64, i64)>(
        r#"
        SELECT campaign_id, balance
        FROM campaign_balance
        WHERE account_holder_id = $1 AND campaign_id = ANY($2)
        ORDER BY campaign_id
        FOR UPDATE
        "#,
    )
    .bind(account_holder_id)
    .bind(campaign_ids)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Conversion date of a pending reward: midnight UTC, `window` days from now.
pub fn conversion_date(now: DateTime<Utc>, allocation_window: i32) -> DateTime<Utc> {
    let day = now
        .checked_add_signed(Duration::days(i64::from(allocation_window)))
        .unwrap_or(now);
    day.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Applies one transaction to the holder's campaign balances.
struct Adjuster<'a> {
    conn: &'a mut PgConnection,
    retailer: &'a Retailer,
    holder: &'a AccountHolder,
    transaction: &'a Transaction,
    activities: &'a mut Vec<Activity>,
}

impl Adjuster<'_> {
    async fn adjust(
        &mut self,
        rules: &CampaignWithRules,
        earn_rule: &EarnRule,
        reward_rule: &RewardRule,
        balance: &mut i64,
    ) -> Result<CampaignEarn, AppError> {
        let campaign = &rules.campaign;
        let adjustment = earn::adjustment_amount(
            self.transaction.amount,
            campaign.loyalty_type,
            earn_rule,
            reward_rule.allocation_window,
        )
        .filter(|amount| *amount != 0);

        let Some(adjustment) = adjustment else {
            self.record_earn(rules, 0).await?;
            return Ok(CampaignEarn {
                campaign_slug: campaign.slug.clone(),
                loyalty_type: campaign.loyalty_type,
                amount: 0,
                threshold: earn_rule.threshold,
                accepted: false,
            });
        };

        let original_balance = *balance;
        let refund = if adjustment < 0 {
            let mut pending = self.pending_rewards_for_update(campaign.id).await?;
            let before = pending.clone();
            let outcome = refund::absorb_refund(-adjustment, *balance, &mut pending);
            self.save_pending_rewards(&before, &pending).await?;
            *balance = outcome.balance;
            Some(outcome)
        } else {
            *balance += adjustment;
            None
        };

        let change = BalanceChange {
            retailer: self.retailer,
            campaign,
            account_holder_uuid: self.holder.account_holder_uuid,
            transaction: self.transaction,
            adjustment,
            original_balance,
            new_balance: *balance,
        };
        if let Some(outcome) = &refund {
            if outcome.not_recouped > 0 {
                self.activities.push(activity_service::refund_not_recouped(
                    &change,
                    outcome.not_recouped,
                ));
            }
        }
        if *balance != original_balance {
            self.activities.push(activity_service::balance_change(&change));
        }
        if let Some(outcome) = &refund {
            let now = Utc::now();
            for removed in &outcome.removed {
                self.activities
                    .push(activity_service::pending_reward_deleted_by_refund(
                        &change,
                        removed.pending_reward_uuid,
                        removed.count,
                    ));
            }
            for update in outcome.cost_updates_of_kept() {
                self.activities.push(activity_service::pending_reward_cost_updated(
                    &change, update, now,
                ));
            }
        }

        self.record_earn(rules, adjustment).await?;

        if adjustment > 0 {
            let achieved = earn::rewards_achieved(reward_rule, *balance, adjustment);
            if achieved.count > 0 {
                let cost = achieved.cost(reward_rule, adjustment);
                tracing::info!(
                    transaction_id = %self.transaction.transaction_id,
                    campaign = %campaign.slug,
                    rewards = achieved.count,
                    cap_reached = achieved.cap_reached,
                    cost,
                    "Reward goal met"
                );
                self.allocate_rewards(rules, reward_rule, achieved.count, cost)
                    .await?;
                *balance -= cost;
            }
        }

        sqlx::query(
            "UPDATE campaign_balance SET balance = $3, updated_at = NOW() WHERE account_holder_id = $1 AND campaign_id = $2",
        )
        .bind(self.holder.id)
        .bind(campaign.id)
        .bind(*balance)
        .execute(&mut *self.conn)
        .await?;

        Ok(CampaignEarn {
            campaign_slug: campaign.slug.clone(),
            loyalty_type: campaign.loyalty_type,
            amount: adjustment,
            threshold: earn_rule.threshold,
            accepted: true,
        })
    }

    async fn record_earn(&mut self, rules: &CampaignWithRules, amount: i64) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO transaction_earn (transaction_id, loyalty_type, earn_amount) VALUES ($1, $2, $3)",
        )
        .bind(self.transaction.id)
        .bind(rules.campaign.loyalty_type)
        .bind(amount)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    /// Pending rewards of the campaign, newest first.
    async fn pending_rewards_for_update(
        &mut self,
        campaign_id: i64,
    ) -> Result<Vec<PendingReward>, AppError> {
        let rewards = sqlx::query_as::<_, PendingReward>(
            r#"
            SELECT id, pending_reward_uuid, account_holder_id, campaign_id, reward_config_id,
                   created_date, conversion_date, value, count, total_cost_to_user
            FROM pending_reward
            WHERE account_holder_id = $1 AND campaign_id = $2
            ORDER BY created_date DESC
            FOR UPDATE
            "#,
        )
        .bind(self.holder.id)
        .bind(campaign_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rewards)
    }

    async fn save_pending_rewards(
        &mut self,
        before: &[PendingReward],
        after: &[PendingReward],
    ) -> Result<(), AppError> {
        for (old, new) in before.iter().zip(after) {
            if new.count == 0 {
                sqlx::query("DELETE FROM pending_reward WHERE id = $1")
                    .bind(new.id)
                    .execute(&mut *self.conn)
                    .await?;
            } else if old != new {
                sqlx::query(
                    "UPDATE pending_reward SET count = $2, total_cost_to_user = $3, updated_at = NOW() WHERE id = $1",
                )
                .bind(new.id)
                .bind(new.count)
                .bind(new.total_cost_to_user)
                .execute(&mut *self.conn)
                .await?;
            }
        }
        Ok(())
    }

    /// Hold the rewards as a pending reward during the refund window, or queue their issuance.
    async fn allocate_rewards(
        &mut self,
        rules: &CampaignWithRules,
        reward_rule: &RewardRule,
        count: i64,
        total_cost_to_user: i64,
    ) -> Result<(), AppError> {
        let campaign = &rules.campaign;
        if reward_rule.allocation_window > 0 {
            let now = Utc::now();
            let pending_reward_uuid = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO pending_reward (
                    pending_reward_uuid, account_holder_id, campaign_id, reward_config_id,
                    created_date, conversion_date, value, count, total_cost_to_user
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(pending_reward_uuid)
            .bind(self.holder.id)
            .bind(campaign.id)
            .bind(reward_rule.reward_config_id)
            .bind(now)
            .bind(conversion_date(now, reward_rule.allocation_window))
            .bind(reward_rule.reward_goal)
            .bind(i32::try_from(count).unwrap_or(i32::MAX))
            .bind(total_cost_to_user)
            .execute(&mut *self.conn)
            .await?;

            self.activities.push(activity_service::pending_reward_issued(
                self.retailer,
                campaign,
                self.holder.account_holder_uuid,
                pending_reward_uuid,
                now,
                count,
            ));
        } else {
            let params: Vec<_> = (0..count)
                .map(|_| RewardIssuanceParams {
                    account_holder_id: self.holder.id,
                    campaign_id: campaign.id,
                    reward_config_id: reward_rule.reward_config_id,
                    reason: IssuedRewardReason::GoalMet,
                    pending_reward_uuid: None,
                })
                .collect();
            task_service::enqueue_many(&mut *self.conn, TaskType::RewardIssuance, &params).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn response_depends_on_acceptance_and_sign() {
        assert_eq!(transaction_response(true, false), "Awarded");
        assert_eq!(transaction_response(true, true), "Refund accepted");
        assert_eq!(transaction_response(false, false), "Threshold not met");
        assert_eq!(transaction_response(false, true), "Refunds not accepted");
    }

    #[test]
    fn conversion_date_is_midnight_after_the_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 15, 30, 0).unwrap();
        assert_eq!(
            conversion_date(now, 14),
            Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            conversion_date(now, 0),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }
}
