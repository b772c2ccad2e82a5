//! Account holder service.
//!
//! This service handles:
//! - Enrolment of new account holders (created `PENDING`)
//! - Activation, run as a retry task once the retailer can take members
//! - Account lookups by credentials or UUID, with balances, history and rewards
//! - Status reads and deactivation
//!
//! Every lookup is scoped to the retailer named in the request path.

use crate::{
    db::{DbPool, is_unique_violation},
    error::{AppError, ErrorCode},
    models::{
        account_holder::{
            AccountHolder, AccountHolderResponse, AccountHolderStatus, AccountRewardResponse,
            CampaignBalanceResponse, GetByCredentialsRequest, PendingRewardResponse,
            TransactionHistoryResponse,
        },
        campaign::LoyaltyType,
        retailer::{ProfileConfig, Retailer},
        reward::RewardStatus,
        task::{ActivationParams, CallbackParams, RetryTaskStatus, TaskOutcome, TaskType},
    },
    services::{
        activity_service::{self, RequestField, pence_to_amount},
        retailer_service, task_service,
    },
    validation::{self, EnrolmentRequest},
};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use sqlx::{Connection, PgConnection};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Transactions listed in an account view.
pub const TRANSACTION_HISTORY_LIMIT: i64 = 10;

/// Shortest random part of an account number.
pub const MINIMUM_ACCOUNT_NUMBER_LENGTH: i32 = 10;

const ACCOUNT_HOLDER_COLUMNS: &str =
    "id, email, status, account_number, account_holder_uuid, opt_out_token, retailer_id, created_at";

/// Enrol a new account holder.
///
/// # Process
///
/// 1. Validate credentials and marketing answers against the retailer's config
/// 2. Create the holder as `PENDING` with profile and marketing preferences
/// 3. Create the enrolment callback task, `WAITING` until activation
/// 4. Queue the activation task
/// 5. Record an ACCOUNT_REQUEST activity whatever the outcome
///
/// # Errors
///
/// - `FieldValidation`: credentials or marketing answers are invalid
/// - `ACCOUNT_EXISTS`: the email is already enrolled with this retailer
pub async fn enrol(
    pool: &DbPool,
    retailer: &Retailer,
    request: &EnrolmentRequest,
    channel: &str,
) -> Result<(), AppError> {
    let profile_config = retailer.profile_config()?;
    let outcome = create_account_holder(pool, retailer, &profile_config, request, channel).await;

    let result = match &outcome {
        Ok(()) => "Accepted",
        Err(AppError::Code(ErrorCode::AccountExists)) => "ACCOUNT_EXISTS",
        Err(AppError::FieldValidation(_)) => "FIELD_VALIDATION_ERROR",
        Err(_) => "Error",
    };
    let activity = activity_service::account_request(
        &retailer.slug,
        request.raw_email(),
        &request.third_party_identifier,
        channel,
        &request_fields(request, &profile_config),
        result,
        Utc::now(),
    );
    let mut conn = pool.acquire().await?;
    activity_service::store(&mut conn, &activity).await?;

    outcome
}

/// Credentials known to the profile config plus every marketing answer.
fn request_fields(request: &EnrolmentRequest, profile_config: &ProfileConfig) -> Vec<RequestField> {
    let credentials = request
        .credentials
        .iter()
        .filter(|(key, _)| profile_config.contains_key(*key))
        .map(|(key, value)| RequestField {
            field_name: key.clone(),
            value: value_to_string(value),
        });
    let marketing = request
        .marketing_preferences
        .iter()
        .map(|pref| RequestField {
            field_name: pref.key.clone(),
            value: value_to_string(&pref.value),
        });
    credentials.chain(marketing).collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn create_account_holder(
    pool: &DbPool,
    retailer: &Retailer,
    profile_config: &ProfileConfig,
    request: &EnrolmentRequest,
    channel: &str,
) -> Result<(), AppError> {
    let credentials = validation::validate_credentials(&request.credentials, profile_config)?;
    let marketing = validation::validate_marketing_preferences(
        &request.marketing_preferences,
        &retailer.marketing_config()?,
    )?;

    let mut tx = pool.begin().await?;

    let account_holder_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO account_holder (email, status, account_holder_uuid, opt_out_token, retailer_id)
        VALUES ($1, 'PENDING', $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(&credentials.email)
    .bind(Uuid::new_v4())
    .bind(Uuid::new_v4())
    .bind(retailer.id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Code(ErrorCode::AccountExists)
        } else {
            AppError::Database(e)
        }
    })?;

    let profile = &credentials.profile;
    sqlx::query(
        r#"
        INSERT INTO account_holder_profile (
            account_holder_id, first_name, last_name, date_of_birth, phone,
            address_line1, address_line2, postcode, city, custom
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(account_holder_id)
    .bind(&profile.first_name)
    .bind(&profile.last_name)
    .bind(profile.date_of_birth)
    .bind(&profile.phone)
    .bind(&profile.address_line1)
    .bind(&profile.address_line2)
    .bind(&profile.postcode)
    .bind(&profile.city)
    .bind(&profile.custom)
    .execute(&mut *tx)
    .await?;

    for pref in &marketing {
        sqlx::query(
            r#"
            INSERT INTO account_holder_marketing_preference (account_holder_id, key_name, value, value_type)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(account_holder_id)
        .bind(&pref.key_name)
        .bind(&pref.value)
        .bind(pref.value_type)
        .execute(&mut *tx)
        .await?;
    }

    let callback_retry_task_id = task_service::create_task(
        &mut tx,
        TaskType::EnrolmentCallback,
        &CallbackParams {
            account_holder_id,
            callback_url: request.callback_url.clone(),
            third_party_identifier: request.third_party_identifier.clone(),
        },
        RetryTaskStatus::Waiting,
    )
    .await?;
    task_service::enqueue(
        &mut tx,
        TaskType::AccountHolderActivation,
        &ActivationParams {
            account_holder_id,
            callback_retry_task_id,
            third_party_identifier: request.third_party_identifier.clone(),
            channel: channel.to_string(),
        },
    )
    .await?;

    tx.commit().await?;

    tracing::info!(account_holder_id, retailer = %retailer.slug, "Account holder enrolled");
    Ok(())
}

/// Activate a pending account holder.
///
/// Assigns an account number, then activates the holder when the retailer is
/// in TEST or has at least one active campaign, creating a zero balance for
/// each active campaign. Activation releases the waiting enrolment callback.
/// A holder that cannot be activated yet leaves the task `WAITING`; it is
/// released again when one of the retailer's campaigns goes live.
pub async fn activate_account_holder(
    pool: &DbPool,
    params: &ActivationParams,
) -> Result<TaskOutcome, AppError> {
    let mut tx = pool.begin().await?;

    let holder = sqlx::query_as::<_, AccountHolder>(&format!(
        "SELECT {ACCOUNT_HOLDER_COLUMNS} FROM account_holder WHERE id = $1 FOR UPDATE"
    ))
    .bind(params.account_holder_id)
    .fetch_one(&mut *tx)
    .await?;
    let retailer = retailer_service::get_by_id(&mut *tx, holder.retailer_id).await?;

    if holder.status != AccountHolderStatus::Pending {
        tracing::warn!(
            account_holder_id = holder.id,
            status = ?holder.status,
            "Account holder is not pending, activation deferred"
        );
        return Ok(TaskOutcome::Waiting);
    }

    if holder.account_number.is_none() {
        assign_account_number(&mut tx, holder.id, || {
            generate_account_number(
                &retailer.account_number_prefix,
                retailer.account_number_length,
            )
        })
        .await?;
    }

    let campaign_ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM campaign WHERE retailer_id = $1 AND status = 'ACTIVE'",
    )
    .bind(retailer.id)
    .fetch_all(&mut *tx)
    .await?;

    if !retailer.is_test() && campaign_ids.is_empty() {
        tx.commit().await?;
        tracing::warn!(
            account_holder_id = holder.id,
            retailer = %retailer.slug,
            "No active campaigns for retailer, account holder left pending"
        );
        return Ok(TaskOutcome::Waiting);
    }

    sqlx::query(
        r#"
        INSERT INTO campaign_balance (account_holder_id, campaign_id, balance, reset_date)
        SELECT $1, campaign_id, 0, CURRENT_DATE + $3::INTEGER FROM UNNEST($2::BIGINT[]) AS campaign_id
        ON CONFLICT (account_holder_id, campaign_id) DO NOTHING
        "#,
    )
    .bind(holder.id)
    .bind(&campaign_ids)
    .bind(retailer.balance_lifespan)
    .execute(&mut *tx)
    .await?;

    let activated_at = sqlx::query_scalar::<_, DateTime<Utc>>(
        "UPDATE account_holder SET status = 'ACTIVE', updated_at = NOW() WHERE id = $1 RETURNING updated_at",
    )
    .bind(holder.id)
    .fetch_one(&mut *tx)
    .await?;

    let activity = activity_service::account_enrolment(
        &retailer.slug,
        holder.account_holder_uuid,
        &params.channel,
        &params.third_party_identifier,
        activated_at,
    );
    activity_service::store(&mut tx, &activity).await?;
    task_service::release_waiting(&mut tx, &[params.callback_retry_task_id]).await?;

    tx.commit().await?;

    tracing::info!(account_holder_uuid = %holder.account_holder_uuid, "Account holder activated");
    Ok(TaskOutcome::Success)
}

/// Give the holder the first candidate account number not already taken.
async fn assign_account_number(
    conn: &mut PgConnection,
    account_holder_id: i64,
    mut candidates: impl FnMut() -> Result<String, AppError>,
) -> Result<String, AppError> {
    loop {
        let candidate = candidates()?;
        let mut savepoint = conn.begin().await?;
        let updated = sqlx::query("UPDATE account_holder SET account_number = $2 WHERE id = $1")
            .bind(account_holder_id)
            .bind(&candidate)
            .execute(&mut *savepoint)
            .await;
        match updated {
            Ok(_) => {
                savepoint.commit().await?;
                return Ok(candidate);
            }
            Err(e) if is_unique_violation(&e) => {
                savepoint.rollback().await?;
                tracing::error!("Account number collision, generating a new number");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// `PREFIX` followed by a zero-padded random number in `[1, 10^length - 1]`.
///
/// # Errors
///
/// `Configuration` if the prefix is not alphanumeric or the length is below
/// [`MINIMUM_ACCOUNT_NUMBER_LENGTH`].
pub fn generate_account_number(prefix: &str, length: i32) -> Result<String, AppError> {
    let prefix = prefix.trim().to_uppercase();
    if prefix.is_empty() || !prefix.chars().all(char::is_alphanumeric) {
        return Err(AppError::Configuration(
            "account number prefix is not alpha-numeric".to_string(),
        ));
    }
    if length < MINIMUM_ACCOUNT_NUMBER_LENGTH {
        return Err(AppError::Configuration(format!(
            "minimum account number length is {MINIMUM_ACCOUNT_NUMBER_LENGTH}"
        )));
    }

    let mut rng = rand::rng();
    loop {
        let digits: String = (0..length)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect();
        // all zeroes is outside the range
        if digits.bytes().any(|b| b != b'0') {
            return Ok(format!("{prefix}{digits}"));
        }
    }
}

async fn find_account_holder(
    conn: &mut PgConnection,
    retailer_id: i64,
    account_holder_uuid: Uuid,
) -> Result<Option<AccountHolder>, AppError> {
    let holder = sqlx::query_as::<_, AccountHolder>(&format!(
        "SELECT {ACCOUNT_HOLDER_COLUMNS} FROM account_holder WHERE retailer_id = $1 AND account_holder_uuid = $2"
    ))
    .bind(retailer_id)
    .bind(account_holder_uuid)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(holder)
}

/// Path UUIDs that fail to parse are reported as unknown accounts.
pub fn parse_account_holder_uuid(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Code(ErrorCode::NoAccountFound))
}

/// Look an active holder up by email and account number.
///
/// Records an ACCOUNT_AUTHENTICATION activity.
///
/// # Errors
///
/// `NO_ACCOUNT_FOUND` unless an ACTIVE holder matches both credentials.
pub async fn get_by_credentials(
    pool: &DbPool,
    retailer: &Retailer,
    request: &GetByCredentialsRequest,
    channel: &str,
) -> Result<AccountHolderResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let holder = sqlx::query_as::<_, AccountHolder>(&format!(
        "SELECT {ACCOUNT_HOLDER_COLUMNS} FROM account_holder \
         WHERE retailer_id = $1 AND email = $2 AND account_number = $3"
    ))
    .bind(retailer.id)
    .bind(request.email.to_lowercase())
    .bind(&request.account_number)
    .fetch_optional(&mut *conn)
    .await?
    .filter(|holder| holder.status == AccountHolderStatus::Active)
    .ok_or(AppError::Code(ErrorCode::NoAccountFound))?;

    let response = account_response(&mut conn, retailer, &holder).await?;

    let activity = activity_service::account_authentication(
        &retailer.slug,
        holder.account_holder_uuid,
        channel,
        Utc::now(),
    );
    activity_service::store(&mut conn, &activity).await?;
    Ok(response)
}

/// Account view by UUID.
///
/// Records an ACCOUNT_VIEW activity naming the holder's campaigns.
///
/// # Errors
///
/// `NO_ACCOUNT_FOUND` for a malformed UUID or a holder that is not ACTIVE.
pub async fn get_account(
    pool: &DbPool,
    retailer: &Retailer,
    account_holder_uuid: &str,
    channel: &str,
) -> Result<AccountHolderResponse, AppError> {
    let account_holder_uuid = parse_account_holder_uuid(account_holder_uuid)?;
    let mut conn = pool.acquire().await?;
    let holder = find_account_holder(&mut conn, retailer.id, account_holder_uuid)
        .await?
        .filter(|holder| holder.status == AccountHolderStatus::Active)
        .ok_or(AppError::Code(ErrorCode::NoAccountFound))?;

    let response = account_response(&mut conn, retailer, &holder).await?;

    let campaign_slugs: Vec<String> = response
        .current_balances
        .iter()
        .map(|b| b.campaign_slug.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let activity = activity_service::account_view(
        &retailer.slug,
        holder.account_holder_uuid,
        channel,
        &campaign_slugs,
        Utc::now(),
    );
    activity_service::store(&mut conn, &activity).await?;
    Ok(response)
}

#[derive(sqlx::FromRow)]
struct BalanceRow {
    campaign_slug: String,
    balance: i64,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    datetime: DateTime<Utc>,
    amount: i64,
    store_name: Option<String>,
    loyalty_type: Option<LoyaltyType>,
    earn_amount: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct RewardRow {
    code: String,
    campaign_slug: String,
    issued_date: DateTime<Utc>,
    expiry_date: DateTime<Utc>,
    redeemed_date: Option<DateTime<Utc>>,
    cancelled_date: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct PendingRewardRow {
    created_date: DateTime<Utc>,
    conversion_date: DateTime<Utc>,
    count: i32,
    campaign_slug: String,
}

async fn account_response(
    conn: &mut PgConnection,
    retailer: &Retailer,
    holder: &AccountHolder,
) -> Result<AccountHolderResponse, AppError> {
    let balances = sqlx::query_as::<_, BalanceRow>(
        r#"
        SELECT c.slug AS campaign_slug, cb.balance
        FROM campaign_balance cb
        JOIN campaign c ON c.id = cb.campaign_id
        WHERE cb.account_holder_id = $1
        ORDER BY cb.id
        "#,
    )
    .bind(holder.id)
    .fetch_all(&mut *conn)
    .await?;

    let history = sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT t.datetime, t.amount, rs.store_name, te.loyalty_type, te.earn_amount
        FROM transaction t
        LEFT JOIN retailer_store rs ON rs.mid = t.mid
        LEFT JOIN LATERAL (
            SELECT loyalty_type, earn_amount
            FROM transaction_earn
            WHERE transaction_id = t.id
            ORDER BY id
            LIMIT 1
        ) te ON TRUE
        WHERE t.account_holder_id = $1 AND t.processed IS TRUE
        ORDER BY t.created_at DESC, t.id
        LIMIT $2
        "#,
    )
    .bind(holder.id)
    .bind(TRANSACTION_HISTORY_LIMIT)
    .fetch_all(&mut *conn)
    .await?;

    let rewards = sqlx::query_as::<_, RewardRow>(
        r#"
        SELECT r.code, c.slug AS campaign_slug, r.issued_date, r.expiry_date,
               r.redeemed_date, r.cancelled_date
        FROM reward r
        JOIN campaign c ON c.id = r.campaign_id
        WHERE r.account_holder_id = $1
          AND NOT r.deleted
          AND r.issued_date IS NOT NULL
          AND r.expiry_date IS NOT NULL
        ORDER BY r.issued_date
        "#,
    )
    .bind(holder.id)
    .fetch_all(&mut *conn)
    .await?;

    let pending = sqlx::query_as::<_, PendingRewardRow>(
        r#"
        SELECT pr.created_date, pr.conversion_date, pr.count, c.slug AS campaign_slug
        FROM pending_reward pr
        JOIN campaign c ON c.id = pr.campaign_id
        WHERE pr.account_holder_id = $1
        ORDER BY pr.created_date
        "#,
    )
    .bind(holder.id)
    .fetch_all(&mut *conn)
    .await?;

    let now = Utc::now();
    Ok(AccountHolderResponse {
        account_holder_uuid: holder.account_holder_uuid,
        email: holder.email.clone(),
        status: holder.status,
        account_number: holder.account_number.clone(),
        current_balances: current_balances(retailer, balances),
        transaction_history: transaction_history(history),
        rewards: rewards
            .into_iter()
            .map(|r| AccountRewardResponse {
                status: RewardStatus::derive(
                    r.cancelled_date,
                    r.redeemed_date,
                    Some(r.expiry_date),
                    now,
                )
                .as_str(),
                code: r.code,
                campaign_slug: r.campaign_slug,
                issued_date: r.issued_date.timestamp(),
                redeemed_date: r.redeemed_date.map(|d| d.timestamp()),
                expiry_date: r.expiry_date.timestamp(),
            })
            .collect(),
        pending_rewards: pending
            .into_iter()
            .flat_map(|p| {
                let item = PendingRewardResponse {
                    created_date: p.created_date.timestamp(),
                    conversion_date: p.conversion_date.timestamp(),
                    campaign_slug: p.campaign_slug,
                };
                std::iter::repeat_n(item, p.count.max(0) as usize)
            })
            .collect(),
    })
}

fn current_balances(retailer: &Retailer, rows: Vec<BalanceRow>) -> Vec<CampaignBalanceResponse> {
    if rows.is_empty() && retailer.is_test() {
        return vec![CampaignBalanceResponse {
            campaign_slug: "N/A".to_string(),
            value: 0.0,
        }];
    }
    rows.into_iter()
        .map(|row| CampaignBalanceResponse {
            campaign_slug: row.campaign_slug,
            value: row.balance as f64 / 100.0,
        })
        .collect()
}

fn transaction_history(mut rows: Vec<HistoryRow>) -> Vec<TransactionHistoryResponse> {
    rows.sort_by(|a, b| b.datetime.cmp(&a.datetime));
    rows.into_iter()
        .map(|row| {
            let loyalty_earned_value = row.loyalty_type.zip(row.earn_amount).map(
                |(loyalty_type, earn_amount)| match loyalty_type {
                    LoyaltyType::Accumulator => pence_to_amount(earn_amount),
                    LoyaltyType::Stamps => earn_amount.to_string(),
                },
            );
            TransactionHistoryResponse {
                datetime: row.datetime.timestamp(),
                amount: pence_to_amount(row.amount),
                amount_currency: "GBP".to_string(),
                location: row.store_name.unwrap_or_else(|| "N/A".to_string()),
                loyalty_earned_value,
                loyalty_earned_type: row.loyalty_type.map(|t| t.as_str().to_string()),
            }
        })
        .collect()
}

/// Current status of any holder of the retailer, active or not.
pub async fn get_status(
    pool: &DbPool,
    retailer: &Retailer,
    account_holder_uuid: &str,
) -> Result<AccountHolderStatus, AppError> {
    let account_holder_uuid = parse_account_holder_uuid(account_holder_uuid)?;
    let mut conn = pool.acquire().await?;
    find_account_holder(&mut conn, retailer.id, account_holder_uuid)
        .await?
        .map(|holder| holder.status)
        .ok_or(AppError::Code(ErrorCode::NoAccountFound))
}

/// Deactivate an account holder.
///
/// Only `inactive` may be requested. The holder's balances and pending
/// rewards are deleted and every reward still usable is cancelled.
///
/// # Errors
///
/// - `FieldValidation`: a status other than `inactive` was requested
/// - `NO_ACCOUNT_FOUND`: unknown holder
/// - `INVALID_STATUS_REQUESTED`: the holder is already inactive
pub async fn update_status(
    pool: &DbPool,
    retailer: &Retailer,
    account_holder_uuid: &str,
    status: AccountHolderStatus,
) -> Result<(), AppError> {
    if status != AccountHolderStatus::Inactive {
        return Err(AppError::FieldValidation(vec!["status".to_string()]));
    }
    let account_holder_uuid = parse_account_holder_uuid(account_holder_uuid)?;

    let mut tx = pool.begin().await?;
    let holder = find_account_holder(&mut tx, retailer.id, account_holder_uuid)
        .await?
        .ok_or(AppError::Code(ErrorCode::NoAccountFound))?;
    if holder.status == AccountHolderStatus::Inactive {
        return Err(AppError::Code(ErrorCode::InvalidStatusRequested));
    }

    sqlx::query("UPDATE account_holder SET status = 'INACTIVE', updated_at = NOW() WHERE id = $1")
        .bind(holder.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM campaign_balance WHERE account_holder_id = $1")
        .bind(holder.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM pending_reward WHERE account_holder_id = $1")
        .bind(holder.id)
        .execute(&mut *tx)
        .await?;
    let cancelled = sqlx::query(
        r#"
        UPDATE reward
        SET cancelled_date = NOW(), updated_at = NOW()
        WHERE account_holder_id = $1
          AND cancelled_date IS NULL
          AND redeemed_date IS NULL
          AND (expiry_date IS NULL OR expiry_date > NOW())
        "#,
    )
    .bind(holder.id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    tracing::info!(
        account_holder_uuid = %holder.account_holder_uuid,
        cancelled_rewards = cancelled,
        "Account holder deactivated"
    );
    Ok(())
}
