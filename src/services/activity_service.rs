//! Activity formatting and storage.
//!
//! Builders here turn domain events into [`Activity`] payloads; [`store`]
//! writes them to the `activity` table inside the caller's transaction and
//! emits them as tracing events.

use crate::{
    error::{AppError, ErrorCode},
    models::{
        activity::{Activity, ActivityType},
        campaign::{Campaign, CampaignStatus, LoyaltyType},
        retailer::Retailer,
        transaction::{CreateTransactionRequest, Transaction},
    },
    services::{balance_service::ResetBalance, earn::CampaignEarn, refund::CostUpdate},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

/// Format pence as pounds sterling, e.g. `£1,234.50` or `-£2.50`.
pub fn pence_to_currency(pence: i64) -> String {
    let sign = if pence < 0 { "-" } else { "" };
    format!("{sign}£{}", format_pounds(pence.unsigned_abs()))
}

/// Format pence as a plain amount, e.g. `1,234.50` or `-2.50`.
pub fn pence_to_amount(pence: i64) -> String {
    let sign = if pence < 0 { "-" } else { "" };
    format!("{sign}{}", format_pounds(pence.unsigned_abs()))
}

fn format_pounds(pence: u64) -> String {
    let pounds = (pence / 100).to_string();
    let mut grouped = String::with_capacity(pounds.len() + pounds.len() / 3);
    for (i, digit) in pounds.chars().enumerate() {
        if i > 0 && (pounds.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    format!("{grouped}.{:02}", pence % 100)
}

/// Stamp balances are stored in hundredths of a stamp.
pub fn stamps_to_string(value: i64) -> String {
    let stamps = value / 100;
    if stamps.abs() == 1 {
        format!("{stamps} stamp")
    } else {
        format!("{stamps} stamps")
    }
}

/// Balance value as shown to people: currency or stamps.
pub fn format_balance(loyalty_type: LoyaltyType, value: i64) -> String {
    match loyalty_type {
        LoyaltyType::Accumulator => pence_to_currency(value),
        LoyaltyType::Stamps => stamps_to_string(value),
    }
}

/// Persist an activity and log it.
pub async fn store(conn: &mut PgConnection, activity: &Activity) -> Result<(), AppError> {
    let payload = serde_json::to_value(activity)?;
    sqlx::query(
        r#"
        INSERT INTO activity (
            activity_type,
            retailer_slug,
            user_id,
            underlying_datetime,
            summary,
            payload
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(activity.activity_type.as_str())
    .bind(&activity.retailer)
    .bind(&activity.user_id)
    .bind(activity.underlying_datetime)
    .bind(&activity.summary)
    .bind(payload)
    .execute(&mut *conn)
    .await?;

    tracing::info!(
        activity_type = activity.activity_type.as_str(),
        retailer = %activity.retailer,
        summary = %activity.summary,
        "Activity recorded"
    );
    Ok(())
}

pub async fn store_all(conn: &mut PgConnection, activities: &[Activity]) -> Result<(), AppError> {
    for activity in activities {
        store(conn, activity).await?;
    }
    Ok(())
}

// Transactions

pub fn tx_import(
    retailer: &Retailer,
    request: &CreateTransactionRequest,
    campaign_slugs: &[String],
    error: Option<&AppError>,
    invalid_refund: bool,
) -> Activity {
    let failure_reason = match (error, invalid_refund) {
        (Some(error), _) => Some(tx_import_error_reason(error.code())),
        (None, true) => Some("Refunds not supported"),
        (None, false) => None,
    };
    let summary = match failure_reason {
        Some(_) => format!("{} Transaction Import Failed", retailer.name),
        None => format!("{} Transaction Imported", retailer.name),
    };

    let mut activity = Activity::new(
        ActivityType::TxImport,
        request.datetime,
        summary,
        pence_to_currency(request.amount),
        &retailer.slug,
    )
    .identifier(&request.transaction_id)
    .user(request.account_holder_uuid)
    .campaigns(campaign_slugs.iter().cloned())
    .data(json!({
        "transaction_id": request.transaction_id,
        "datetime": request.datetime,
        "amount": pence_to_amount(request.amount),
        "mid": request.mid,
    }));
    if let Some(reason) = failure_reason {
        activity = activity.reason(reason);
    }
    activity
}

fn tx_import_error_reason(code: Option<ErrorCode>) -> &'static str {
    match code {
        Some(ErrorCode::NoActiveCampaigns) => "No active campaigns",
        Some(ErrorCode::UserNotActive | ErrorCode::UserNotFound) => "No active user",
        Some(ErrorCode::DuplicateTransaction) => "Transaction ID not unique",
        _ => "Internal server error",
    }
}

pub fn tx_history(
    retailer: &Retailer,
    account_holder_uuid: Uuid,
    transaction: &Transaction,
    earns: &[CampaignEarn],
    store_name: &str,
) -> Activity {
    let is_refund = transaction.amount < 0;
    let tx_amount = pence_to_currency(transaction.amount.abs());
    let reasons = earns.iter().map(|earn| {
        let threshold = pence_to_currency(earn.threshold);
        match (earn.accepted, is_refund) {
            (true, true) => format!("refund of {tx_amount} accepted"),
            (true, false) => {
                format!("transaction amount {tx_amount} meets the required threshold {threshold}")
            }
            (false, true) => format!("refund of {tx_amount} not accepted"),
            (false, false) => format!(
                "transaction amount {tx_amount} does no meet the required threshold {threshold}"
            ),
        }
    });
    let earned: Vec<_> = earns
        .iter()
        .map(|earn| {
            let value = match earn.loyalty_type {
                LoyaltyType::Accumulator => pence_to_currency(earn.amount),
                LoyaltyType::Stamps => (earn.amount / 100).to_string(),
            };
            json!({"value": value, "type": earn.loyalty_type.as_str()})
        })
        .collect();

    let mut activity = Activity::new(
        ActivityType::TxHistory,
        transaction.datetime,
        format!(
            "{} Transaction Processed for {} (MID: {})",
            retailer.slug, store_name, transaction.mid
        ),
        pence_to_currency(transaction.amount),
        &retailer.slug,
    )
    .identifier(&transaction.transaction_id)
    .user(account_holder_uuid)
    .campaigns(earns.iter().map(|earn| earn.campaign_slug.clone()))
    .data(json!({
        "transaction_id": transaction.transaction_id,
        "datetime": transaction.datetime,
        "amount": pence_to_amount(transaction.amount),
        "amount_currency": "GBP",
        "store_name": store_name,
        "mid": transaction.mid,
        "earned": earned,
    }));
    for reason in reasons {
        activity = activity.reason(reason);
    }
    activity
}

/// Balance change caused by a purchase or refund.
pub struct BalanceChange<'a> {
    pub retailer: &'a Retailer,
    pub campaign: &'a Campaign,
    pub account_holder_uuid: Uuid,
    pub transaction: &'a Transaction,
    pub adjustment: i64,
    pub original_balance: i64,
    pub new_balance: i64,
}

pub fn balance_change(change: &BalanceChange<'_>) -> Activity {
    let sign = if change.adjustment > 0 { "+" } else { "" };
    let prefix = if change.adjustment < 0 {
        "Refund"
    } else {
        "Purchase"
    };
    Activity::new(
        ActivityType::BalanceChange,
        change.transaction.datetime,
        format!(
            "{} - {}: {sign}{}",
            change.retailer.name,
            change.campaign.name,
            format_balance(change.campaign.loyalty_type, change.adjustment)
        ),
        change.new_balance.to_string(),
        &change.retailer.slug,
    )
    .reason(format!(
        "{prefix} transaction id: {}",
        change.transaction.transaction_id
    ))
    .user(change.account_holder_uuid)
    .campaigns([change.campaign.slug.as_str()])
    .data(json!({
        "new_balance": change.new_balance,
        "original_balance": change.original_balance,
    }))
}

pub fn refund_not_recouped(change: &BalanceChange<'_>, not_recouped: i64) -> Activity {
    Activity::new(
        ActivityType::RefundNotRecouped,
        change.transaction.datetime,
        format!(
            "{} Refund transaction caused an account shortfall",
            change.retailer.name
        ),
        pence_to_currency(change.adjustment),
        &change.retailer.slug,
    )
    .reason("Account Holder Balance and/or Pending Rewards did not cover the refund")
    .identifier(&change.transaction.transaction_id)
    .user(change.account_holder_uuid)
    .campaigns([change.campaign.slug.as_str()])
    .data(json!({
        "datetime": change.transaction.datetime,
        "transaction_id": change.transaction.transaction_id,
        "amount": change.adjustment,
        "amount_recouped": change.adjustment.abs() - not_recouped,
        "amount_not_recouped": not_recouped,
    }))
}

pub fn pending_reward_deleted_by_refund(
    change: &BalanceChange<'_>,
    pending_reward_uuid: Uuid,
    count: i32,
) -> Activity {
    Activity::new(
        ActivityType::RewardStatus,
        change.transaction.datetime,
        format!(
            "{} Pending reward deleted for {}",
            change.retailer.name, change.campaign.name
        ),
        "deleted",
        &change.retailer.slug,
    )
    .reason("Pending Reward removed due to refund")
    .identifier(pending_reward_uuid.to_string())
    .user(change.account_holder_uuid)
    .campaigns([change.campaign.slug.as_str()])
    .data(json!({
        "new_status": "deleted",
        "original_status": "pending",
        "count": count,
    }))
}

pub fn pending_reward_cost_updated(
    change: &BalanceChange<'_>,
    update: &CostUpdate,
    updated_at: DateTime<Utc>,
) -> Activity {
    Activity::new(
        ActivityType::RewardUpdate,
        updated_at,
        "Pending Reward Record's total cost to user updated",
        pence_to_currency(update.new_total_cost_to_user),
        &change.retailer.slug,
    )
    .reason("Pending Reward updated due to refund")
    .identifier(update.pending_reward_uuid.to_string())
    .user(change.account_holder_uuid)
    .campaigns([change.campaign.slug.as_str()])
    .data(json!({
        "new_total_cost_to_user": update.new_total_cost_to_user,
        "original_total_cost_to_user": update.original_total_cost_to_user,
    }))
}

pub fn pending_reward_issued(
    retailer: &Retailer,
    campaign: &Campaign,
    account_holder_uuid: Uuid,
    pending_reward_uuid: Uuid,
    created_date: DateTime<Utc>,
    count: i64,
) -> Activity {
    Activity::new(
        ActivityType::RewardStatus,
        created_date,
        format!(
            "{} Pending reward issued for {}",
            retailer.name, campaign.name
        ),
        "pending",
        &retailer.slug,
    )
    .identifier(pending_reward_uuid.to_string())
    .user(account_holder_uuid)
    .campaigns([campaign.slug.as_str()])
    .data(json!({"new_status": "pending", "count": count}))
}

// Rewards

pub struct IssuedReward<'a> {
    pub retailer: &'a Retailer,
    pub campaign: Option<&'a Campaign>,
    pub account_holder_uuid: Uuid,
    pub reward_uuid: Uuid,
    pub reward_slug: &'a str,
    pub issued_at: DateTime<Utc>,
    pub reason: &'static str,
    pub pending_reward_uuid: Option<Uuid>,
}

pub fn reward_issued(issued: &IssuedReward<'_>) -> Activity {
    let mut data = json!({"new_status": "issued", "reward_slug": issued.reward_slug});
    let summary = match (issued.campaign, issued.pending_reward_uuid) {
        (Some(campaign), Some(pending_reward_uuid)) => {
            data["original_status"] = json!("pending");
            data["pending_reward_id"] = json!(pending_reward_uuid);
            format!(
                "{} Pending Reward issued for {}",
                issued.retailer.name, campaign.name
            )
        }
        _ => format!("{} Reward issued", issued.retailer.name),
    };
    Activity::new(
        ActivityType::RewardStatus,
        issued.issued_at,
        summary,
        "issued",
        &issued.retailer.slug,
    )
    .reason(issued.reason)
    .identifier(issued.reward_uuid.to_string())
    .user(issued.account_holder_uuid)
    .campaigns(issued.campaign.map(|c| c.slug.clone()))
    .data(data)
}

pub fn pending_reward_removed(
    retailer: &Retailer,
    campaign_slug: &str,
    account_holder_uuid: Uuid,
    pending_reward_uuid: Uuid,
    at: DateTime<Utc>,
) -> Activity {
    Activity::new(
        ActivityType::RewardStatus,
        at,
        format!(
            "{} Pending Reward removed for {campaign_slug}",
            retailer.slug
        ),
        "Deleted",
        &retailer.slug,
    )
    .reason("Pending Reward removed due to campaign end/cancellation")
    .identifier(pending_reward_uuid.to_string())
    .user(account_holder_uuid)
    .campaigns([campaign_slug])
    .data(json!({"new_status": "deleted", "original_status": "pending"}))
}

pub fn pending_reward_transferred(
    retailer: &Retailer,
    from_campaign_slug: &str,
    to_campaign_slug: &str,
    account_holder_uuid: Uuid,
    pending_reward_uuid: Uuid,
    at: DateTime<Utc>,
) -> Activity {
    Activity::new(
        ActivityType::RewardStatus,
        at,
        format!(
            "{} pending reward transferred from {from_campaign_slug} to {to_campaign_slug}",
            retailer.slug
        ),
        "N/A",
        &retailer.slug,
    )
    .reason("Pending reward transferred at campaign end")
    .identifier(pending_reward_uuid.to_string())
    .user(account_holder_uuid)
    .campaigns([from_campaign_slug, to_campaign_slug])
    .data(json!({"new_campaign": to_campaign_slug, "old_campaign": from_campaign_slug}))
}

pub fn reward_cancelled(
    retailer_slug: &str,
    campaign_slug: &str,
    account_holder_uuid: Uuid,
    reward_uuid: Uuid,
    cancelled_at: DateTime<Utc>,
) -> Activity {
    Activity::new(
        ActivityType::RewardStatus,
        cancelled_at,
        format!("{retailer_slug} Reward cancelled"),
        "cancelled",
        retailer_slug,
    )
    .reason("Reward cancelled due to campaign cancellation")
    .identifier(reward_uuid.to_string())
    .user(account_holder_uuid)
    .campaigns([campaign_slug])
    .data(json!({"new_status": "cancelled", "original_status": "issued"}))
}

// Accounts

/// A credential or marketing field echoed into ACCOUNT_REQUEST.
pub struct RequestField {
    pub field_name: String,
    pub value: String,
}

pub fn account_request(
    retailer_slug: &str,
    email: &str,
    third_party_identifier: &str,
    channel: &str,
    fields: &[RequestField],
    result: &str,
    at: DateTime<Utc>,
) -> Activity {
    let fields: Vec<_> = fields
        .iter()
        .map(|f| json!({"field_name": f.field_name, "value": f.value}))
        .collect();
    Activity::new(
        ActivityType::AccountRequest,
        at,
        format!("Enrolment Requested for {email}"),
        email,
        retailer_slug,
    )
    .user(third_party_identifier)
    .data(json!({
        "datetime": at,
        "channel": channel,
        "fields": fields,
        "result": result,
    }))
}

pub fn account_enrolment(
    retailer_slug: &str,
    account_holder_uuid: Uuid,
    channel: &str,
    third_party_identifier: &str,
    at: DateTime<Utc>,
) -> Activity {
    Activity::new(
        ActivityType::AccountEnrolment,
        at,
        format!("Joined via {channel}; Account activated"),
        channel,
        retailer_slug,
    )
    .reason(format!("Third Party Identifier: {third_party_identifier}"))
    .identifier(third_party_identifier)
    .user(account_holder_uuid)
    .data(json!({"datetime": at, "channel": channel}))
}

pub fn account_authentication(
    retailer_slug: &str,
    account_holder_uuid: Uuid,
    channel: &str,
    at: DateTime<Utc>,
) -> Activity {
    Activity::new(
        ActivityType::AccountAuthentication,
        at,
        format!("Account added to {channel}"),
        channel,
        retailer_slug,
    )
    .user(account_holder_uuid)
    .data(json!({"datetime": at, "channel": channel}))
}

pub fn account_view(
    retailer_slug: &str,
    account_holder_uuid: Uuid,
    channel: &str,
    campaign_slugs: &[String],
    at: DateTime<Utc>,
) -> Activity {
    Activity::new(
        ActivityType::AccountView,
        at,
        "Account viewed",
        channel,
        retailer_slug,
    )
    .reason("/accounts call made")
    .user(account_holder_uuid)
    .campaigns(campaign_slugs.iter().cloned())
}

/// A boolean marketing preference switched off through the opt-out link.
pub fn marketing_opt_out(
    retailer_slug: &str,
    account_holder_uuid: Uuid,
    field_name: &str,
    at: DateTime<Utc>,
) -> Activity {
    Activity::new(
        ActivityType::AccountChange,
        at,
        "Unsubscribed via marketing opt-out",
        "Marketing Preferences unsubscribed",
        retailer_slug,
    )
    .user(account_holder_uuid)
    .data(json!({
        "field_name": field_name,
        "original_value": "True",
        "new_value": "False",
    }))
}

// Campaigns

pub fn campaign_status_change(
    retailer_slug: &str,
    campaign: &Campaign,
    sso_username: &str,
    original_status: CampaignStatus,
    new_status: CampaignStatus,
    at: DateTime<Utc>,
) -> Activity {
    Activity::new(
        ActivityType::Campaign,
        at,
        format!("{} {}", campaign.name, new_status.as_str()),
        new_status.as_str(),
        retailer_slug,
    )
    .identifier(&campaign.slug)
    .user(sso_username)
    .campaigns([campaign.slug.as_str()])
    .data(json!({
        "campaign": {
            "new_values": {"status": new_status.as_str()},
            "original_values": {"status": original_status.as_str()},
        }
    }))
}

pub struct Migration<'a> {
    pub retailer_slug: &'a str,
    pub from_campaign_slug: &'a str,
    pub to_campaign_slug: &'a str,
    pub sso_username: &'a str,
    pub transfer_balance_requested: bool,
    pub conversion_rate: i64,
    pub qualifying_threshold: i64,
    pub pending_rewards: &'a str,
    pub at: DateTime<Utc>,
}

pub fn campaign_migration(migration: &Migration<'_>) -> Activity {
    Activity::new(
        ActivityType::CampaignMigration,
        migration.at,
        format!(
            "{} Campaign {} has ended and account holders have been migrated to Campaign {}",
            migration.retailer_slug, migration.from_campaign_slug, migration.to_campaign_slug
        ),
        "N/A",
        migration.retailer_slug,
    )
    .reason(format!("Campaign {} was ended", migration.from_campaign_slug))
    .identifier(migration.retailer_slug)
    .user(migration.sso_username)
    .campaigns([migration.from_campaign_slug, migration.to_campaign_slug])
    .data(json!({
        "transfer_balance_requested": migration.transfer_balance_requested,
        "ended_campaign": migration.from_campaign_slug,
        "activated_campaign": migration.to_campaign_slug,
        "balance_conversion_rate": migration.conversion_rate,
        "qualify_threshold": migration.qualifying_threshold,
        "pending_rewards": migration.pending_rewards,
    }))
}

pub fn migrated_balance(
    migration: &Migration<'_>,
    account_holder_uuid: Uuid,
    loyalty_type: LoyaltyType,
    new_balance: i64,
) -> Activity {
    let value = format_balance(loyalty_type, new_balance);
    Activity::new(
        ActivityType::BalanceChange,
        migration.at,
        format!(
            "{} {} Balance {value}",
            migration.retailer_slug, migration.to_campaign_slug
        ),
        value.clone(),
        migration.retailer_slug,
    )
    .reason(format!(
        "Migrated from ended campaign {}",
        migration.from_campaign_slug
    ))
    .user(account_holder_uuid)
    .campaigns([migration.to_campaign_slug])
    .data(json!({
        "loyalty_type": loyalty_type.as_str(),
        "new_balance": new_balance,
        "original_balance": 0,
    }))
}

pub fn balance_reset(reset: &ResetBalance) -> Activity {
    Activity::new(
        ActivityType::BalanceChange,
        reset.updated_at,
        format!(
            "{} {} Balance {}",
            reset.retailer_slug, reset.campaign_slug, reset.original_balance
        ),
        "0",
        &reset.retailer_slug,
    )
    .reason(format!("Balance Reset every {} days", reset.balance_lifespan))
    .user(reset.account_holder_uuid)
    .campaigns([reset.campaign_slug.as_str()])
    .data(json!({
        "reset_date": reset.reset_date,
        "new_balance": 0,
        "original_balance": reset.original_balance,
    }))
}
