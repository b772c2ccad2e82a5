//! Database writes of the data generator.
//!
//! Rows are inserted with `UNNEST` over column arrays, [`BATCH_SIZE`]
//! account holders at a time.

use crate::fixtures::{self, AccountHolderType, RewardState};
use anyhow::{Context, bail};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use cosmos::{
    db::DbPool,
    models::{
        campaign::{CampaignStatus, CampaignWithRules, LoyaltyType},
        retailer::Retailer,
    },
    services::{campaign_service, retailer_service},
};
use rand::Rng;
use sqlx::PgConnection;
use std::collections::HashMap;
use uuid::Uuid;

pub const BATCH_SIZE: u64 = 1000;

pub const FETCH_TYPES: [(&str, &str, &str); 2] = [
    ("PRE_LOADED", "validity_days: integer", "cosmos.fetch_reward.pre_loaded"),
    ("JIGSAW_EGIFT", "transaction_value: integer", "cosmos.fetch_reward.jigsaw"),
];

/// Insert the known fetch types, keeping any that already exist.
pub async fn add_fetch_types(pool: &DbPool) -> anyhow::Result<()> {
    for (name, required_fields, path) in FETCH_TYPES {
        sqlx::query(
            "INSERT INTO fetch_type (name, required_fields, path) VALUES ($1, $2, $3) ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(required_fields)
        .bind(path)
        .execute(pool)
        .await?;
    }
    tracing::info!("Fetch types created");
    Ok(())
}

/// What `-B` creates for one retailer.
#[derive(Debug, Clone)]
pub struct RetailerSetup<'a> {
    pub retailer_slug: &'a str,
    pub campaign_slug: &'a str,
    pub reward_slug: &'a str,
    pub fetch_type: &'a str,
    pub loyalty_type: LoyaltyType,
    pub refund_window: i32,
    /// Store mids are `{mid_prefix}-{i}`. Mids are unique across retailers.
    pub mid_prefix: &'a str,
}

/// Recreate a TEST retailer with stores, a reward config and one active campaign.
pub async fn setup_retailer(pool: &DbPool, setup: &RetailerSetup<'_>) -> anyhow::Result<()> {
    if !FETCH_TYPES.iter().any(|(name, _, _)| *name == setup.fetch_type) {
        bail!("Unknown fetch type {}", setup.fetch_type);
    }
    let mut tx = pool.begin().await?;

    if let Some(existing) = retailer_service::find_by_slug(&mut *tx, setup.retailer_slug).await? {
        sqlx::query("DELETE FROM reward WHERE retailer_id = $1")
            .bind(existing.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM retailer WHERE id = $1")
            .bind(existing.id)
            .execute(&mut *tx)
            .await?;
        tracing::info!(retailer = setup.retailer_slug, "Existing retailer deleted");
    }

    let fetch_type_id = sqlx::query_scalar::<_, i64>("SELECT id FROM fetch_type WHERE name = $1")
        .bind(setup.fetch_type)
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| format!("Fetch type {} not found, run with -F first", setup.fetch_type))?;

    let name = fixtures::title_case(setup.retailer_slug);
    let retailer_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO retailer (name, slug, account_number_prefix, profile_config, marketing_preference_config, loyalty_name, status)
        VALUES ($1, $2, $3, $4, $5, $1, 'TEST')
        RETURNING id
        "#,
    )
    .bind(&name)
    .bind(setup.retailer_slug)
    .bind(fixtures::ACCOUNT_NUMBER_PREFIX)
    .bind(fixtures::PROFILE_CONFIG)
    .bind(fixtures::MARKETING_PREFERENCE_CONFIG)
    .fetch_one(&mut *tx)
    .await?;

    for i in 1..=5 {
        sqlx::query("INSERT INTO retailer_store (store_name, mid, retailer_id) VALUES ($1, $2, $3)")
            .bind(format!("Super Store {i}"))
            .bind(format!("{}-{i}", setup.mid_prefix))
            .bind(retailer_id)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("INSERT INTO retailer_fetch_type (retailer_id, fetch_type_id) VALUES ($1, $2)")
        .bind(retailer_id)
        .bind(fetch_type_id)
        .execute(&mut *tx)
        .await?;

    let reward_config_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO reward_config (reward_slug, retailer_id, fetch_type_id, required_fields_values)
        VALUES ($1, $2, $3, 'validity_days: 30')
        RETURNING id
        "#,
    )
    .bind(setup.reward_slug)
    .bind(retailer_id)
    .bind(fetch_type_id)
    .fetch_one(&mut *tx)
    .await?;

    let campaign_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO campaign (status, name, slug, reward_config_id, retailer_id, loyalty_type, start_date)
        VALUES ('ACTIVE', $1, $2, $3, $4, $5, NOW() - INTERVAL '5 minutes')
        RETURNING id
        "#,
    )
    .bind(fixtures::title_case(setup.campaign_slug))
    .bind(setup.campaign_slug)
    .bind(reward_config_id)
    .bind(retailer_id)
    .bind(setup.loyalty_type)
    .fetch_one(&mut *tx)
    .await?;

    let allocation_window = match setup.loyalty_type {
        LoyaltyType::Stamps => 0,
        LoyaltyType::Accumulator => setup.refund_window,
    };
    sqlx::query(
        r#"
        INSERT INTO reward_rule (campaign_id, reward_config_id, reward_goal, reward_slug, allocation_window)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(campaign_id)
    .bind(reward_config_id)
    .bind(fixtures::REWARD_GOAL)
    .bind(setup.reward_slug)
    .bind(allocation_window)
    .execute(&mut *tx)
    .await?;

    let increment = (setup.loyalty_type == LoyaltyType::Stamps).then_some(300i64);
    sqlx::query(
        "INSERT INTO earn_rule (campaign_id, threshold, increment, increment_multiplier) VALUES ($1, 500, $2, 1.25)",
    )
    .bind(campaign_id)
    .bind(increment)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(retailer = setup.retailer_slug, campaign = setup.campaign_slug, "Retailer created");
    Ok(())
}

/// How many and what kind of account holders to generate.
#[derive(Debug, Clone)]
pub struct Population<'a> {
    pub retailer_slug: &'a str,
    pub campaign_slug: &'a str,
    pub account_holders: u64,
    pub max_val: i64,
    pub unallocated_rewards: u64,
    pub tx_history: bool,
}

/// Replace the generated account holders of a retailer.
pub async fn populate(pool: &DbPool, population: &Population<'_>) -> anyhow::Result<()> {
    let retailer = retailer_service::find_by_slug(pool, population.retailer_slug)
        .await?
        .with_context(|| format!("Retailer '{}' does not exist", population.retailer_slug))?;
    tracing::info!(retailer = %retailer.name, "Selected retailer");

    let mut conn = pool.acquire().await?;
    let campaigns =
        campaign_service::campaigns_with_rules(&mut conn, retailer.id, CampaignStatus::Active).await?;
    let reward_goal = campaign_service::find_with_rules(&mut conn, retailer.id, population.campaign_slug, false)
        .await?
        .and_then(|campaign| campaign.reward_rule)
        .map(|rule| rule.reward_goal)
        .with_context(|| format!("Campaign '{}' has no reward rule", population.campaign_slug))?;
    let reward_config_id = campaigns
        .first()
        .map(|c| c.campaign.reward_config_id)
        .context("Retailer has no active campaign")?;
    let mids = sqlx::query_scalar::<_, String>("SELECT mid FROM retailer_store WHERE retailer_id = $1")
        .bind(retailer.id)
        .fetch_all(&mut *conn)
        .await?;
    drop(conn);

    clear_existing_account_holders(pool, retailer.id).await?;
    create_unallocated_rewards(pool, &retailer, &campaigns, reward_config_id, population.unallocated_rewards)
        .await?;

    let context = BatchContext {
        retailer: &retailer,
        campaigns: &campaigns,
        reward_config_id,
        reward_goal,
        mids: &mids,
        population,
    };
    for holder_type in AccountHolderType::ALL {
        tracing::info!(holder_type = holder_type.as_str(), "Creating account holders");
        let mut start = 1;
        while start <= population.account_holders {
            let end = (start + BATCH_SIZE - 1).min(population.account_holders);
            create_batch(pool, &context, holder_type, start..=end).await?;
            tracing::info!(created = end, total = population.account_holders, "Batch committed");
            start = end + 1;
        }
    }
    Ok(())
}

async fn clear_existing_account_holders(pool: &DbPool, retailer_id: i64) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    let generated = r"retailer_id = $1 AND email LIKE 'test\_%\_user\_%@autogen.bpl'";
    sqlx::query(&format!(
        "DELETE FROM reward WHERE account_holder_id IN (SELECT id FROM account_holder WHERE {generated})"
    ))
    .bind(retailer_id)
    .execute(&mut *tx)
    .await?;
    let deleted = sqlx::query(&format!("DELETE FROM account_holder WHERE {generated}"))
        .bind(retailer_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    tracing::info!(deleted, "Previously generated account holders deleted");
    Ok(())
}

async fn create_unallocated_rewards(
    pool: &DbPool,
    retailer: &Retailer,
    campaigns: &[CampaignWithRules],
    reward_config_id: i64,
    count: u64,
) -> anyhow::Result<()> {
    let mut rng = rand::rng();
    let mut rows = RewardRows::default();
    for campaign in campaigns {
        for _ in 0..count {
            rows.push(None, None, fixtures::reward_code(&mut rng), None);
        }
    }
    let mut conn = pool.acquire().await?;
    rows.insert(&mut conn, retailer.id, reward_config_id).await?;
    tracing::info!(count = rows.codes.len(), "Unallocated rewards created");
    Ok(())
}

struct BatchContext<'a> {
    retailer: &'a Retailer,
    campaigns: &'a [CampaignWithRules],
    reward_config_id: i64,
    reward_goal: i64,
    mids: &'a [String],
    population: &'a Population<'a>,
}

async fn create_batch(
    pool: &DbPool,
    context: &BatchContext<'_>,
    holder_type: AccountHolderType,
    range: std::ops::RangeInclusive<u64>,
) -> anyhow::Result<()> {
    let mut rng = rand::rng();
    let retailer = context.retailer;
    let mut tx = pool.begin().await?;

    let numbers: Vec<u64> = range.collect();
    let emails: Vec<String> = numbers.iter().map(|n| fixtures::email(holder_type, *n)).collect();
    let account_numbers: Vec<String> = numbers
        .iter()
        .map(|n| {
            fixtures::account_number(
                &retailer.account_number_prefix,
                holder_type,
                *n,
                rng.random_range(1..=999_999),
            )
        })
        .collect();
    let uuids: Vec<Uuid> = numbers.iter().map(|_| Uuid::new_v4()).collect();
    let tokens: Vec<Uuid> = numbers.iter().map(|_| Uuid::new_v4()).collect();

    let inserted: HashMap<String, i64> = sqlx::query_as::<_, (i64, String)>(
        r#"
        INSERT INTO account_holder (email, status, account_number, account_holder_uuid, opt_out_token, retailer_id)
        SELECT email, 'ACTIVE', account_number, account_holder_uuid, opt_out_token, $5
        FROM UNNEST($1::VARCHAR[], $2::VARCHAR[], $3::UUID[], $4::UUID[])
            AS t(email, account_number, account_holder_uuid, opt_out_token)
        RETURNING id, email
        "#,
    )
    .bind(&emails)
    .bind(&account_numbers)
    .bind(&uuids)
    .bind(&tokens)
    .bind(retailer.id)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .map(|(id, email)| (email, id))
    .collect();

    let now = Utc::now();
    let mut profiles = ProfileRows::default();
    let mut balances = BalanceRows::default();
    let mut rewards = RewardRows::default();
    let mut pending = PendingRewardRows::default();
    let mut transactions = TransactionRows::default();

    for (n, email) in numbers.iter().zip(&emails) {
        let Some(&account_holder_id) = inserted.get(email) else {
            bail!("Account holder {email} was not created");
        };
        profiles.push(account_holder_id, fixtures::fake_profile(&mut rng));

        for campaign in context.campaigns {
            balances.push(
                account_holder_id,
                campaign.campaign.id,
                holder_type.balance(context.population.max_val, &mut rng),
            );
        }

        for (count, state) in fixtures::reward_plan(*n) {
            for campaign in context.campaigns {
                let allocation_window = campaign
                    .reward_rule
                    .as_ref()
                    .map_or(0, |rule| rule.allocation_window);
                for _ in 0..*count {
                    match fixtures::reward_dates(now, *state, rng.random_range(2..=10)) {
                        Some(dates) => rewards.push(
                            Some(account_holder_id),
                            Some(campaign.campaign.id),
                            fixtures::reward_code(&mut rng),
                            Some(dates),
                        ),
                        None if allocation_window > 0 => pending.push(
                            account_holder_id,
                            campaign.campaign.id,
                            now,
                            now + Duration::days(i64::from(allocation_window)),
                        ),
                        None => {}
                    }
                }
            }
        }

        if context.population.tx_history && !context.mids.is_empty() {
            let how_many = rng.random_range(1..=10);
            let amounts = fixtures::transaction_amounts(context.reward_goal);
            for (i, amount) in amounts.iter().take(how_many).enumerate() {
                let mid = &context.mids[rng.random_range(0..context.mids.len())];
                transactions.push(
                    account_holder_id,
                    format!("autogen-{account_holder_id}-{i}"),
                    *amount,
                    mid.clone(),
                    now,
                );
            }
        }
    }

    profiles.insert(&mut tx).await?;
    balances.insert(&mut tx).await?;
    rewards
        .insert(&mut tx, retailer.id, context.reward_config_id)
        .await?;
    pending.insert(&mut tx, context.reward_config_id).await?;
    transactions
        .insert(&mut tx, retailer.id, context.campaigns)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[derive(Default)]
struct ProfileRows {
    account_holder_ids: Vec<i64>,
    first_names: Vec<String>,
    last_names: Vec<String>,
    dates_of_birth: Vec<Option<NaiveDate>>,
    phones: Vec<String>,
    address_lines1: Vec<String>,
    address_lines2: Vec<String>,
    postcodes: Vec<String>,
    cities: Vec<String>,
}

impl ProfileRows {
    fn push(&mut self, account_holder_id: i64, profile: fixtures::FakeProfile) {
        self.account_holder_ids.push(account_holder_id);
        self.first_names.push(profile.first_name);
        self.last_names.push(profile.last_name);
        self.dates_of_birth.push(profile.date_of_birth);
        self.phones.push(profile.phone);
        self.address_lines1.push(profile.address_line1);
        self.address_lines2.push(profile.address_line2);
        self.postcodes.push(profile.postcode);
        self.cities.push(profile.city);
    }

    /// Profiles plus the `marketing_pref` answer of every holder.
    async fn insert(&self, conn: &mut PgConnection) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO account_holder_profile
                (account_holder_id, first_name, last_name, date_of_birth, phone,
                 address_line1, address_line2, postcode, city)
            SELECT * FROM UNNEST($1::BIGINT[], $2::VARCHAR[], $3::VARCHAR[], $4::DATE[], $5::VARCHAR[],
                                 $6::VARCHAR[], $7::VARCHAR[], $8::VARCHAR[], $9::VARCHAR[])
            "#,
        )
        .bind(&self.account_holder_ids)
        .bind(&self.first_names)
        .bind(&self.last_names)
        .bind(&self.dates_of_birth)
        .bind(&self.phones)
        .bind(&self.address_lines1)
        .bind(&self.address_lines2)
        .bind(&self.postcodes)
        .bind(&self.cities)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO account_holder_marketing_preference (account_holder_id, key_name, value, value_type)
            SELECT id, 'marketing_pref', 'False', 'BOOLEAN' FROM UNNEST($1::BIGINT[]) AS t(id)
            "#,
        )
        .bind(&self.account_holder_ids)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
struct BalanceRows {
    account_holder_ids: Vec<i64>,
    campaign_ids: Vec<i64>,
    balances: Vec<i64>,
}

impl BalanceRows {
    fn push(&mut self, account_holder_id: i64, campaign_id: i64, balance: i64) {
        self.account_holder_ids.push(account_holder_id);
        self.campaign_ids.push(campaign_id);
        self.balances.push(balance);
    }

    async fn insert(&self, conn: &mut PgConnection) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_balance (account_holder_id, campaign_id, balance)
            SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::BIGINT[])
            "#,
        )
        .bind(&self.account_holder_ids)
        .bind(&self.campaign_ids)
        .bind(&self.balances)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
struct RewardRows {
    account_holder_ids: Vec<Option<i64>>,
    campaign_ids: Vec<Option<i64>>,
    codes: Vec<String>,
    issued_dates: Vec<Option<DateTime<Utc>>>,
    expiry_dates: Vec<Option<DateTime<Utc>>>,
    redeemed_dates: Vec<Option<DateTime<Utc>>>,
    cancelled_dates: Vec<Option<DateTime<Utc>>>,
}

impl RewardRows {
    fn push(
        &mut self,
        account_holder_id: Option<i64>,
        campaign_id: Option<i64>,
        code: String,
        dates: Option<fixtures::RewardDates>,
    ) {
        self.account_holder_ids.push(account_holder_id);
        self.campaign_ids.push(campaign_id);
        self.codes.push(code);
        self.issued_dates.push(dates.as_ref().map(|d| d.issued_date));
        self.expiry_dates.push(dates.as_ref().map(|d| d.expiry_date));
        self.redeemed_dates.push(dates.as_ref().and_then(|d| d.redeemed_date));
        self.cancelled_dates.push(dates.as_ref().and_then(|d| d.cancelled_date));
    }

    async fn insert(
        &self,
        conn: &mut PgConnection,
        retailer_id: i64,
        reward_config_id: i64,
    ) -> anyhow::Result<()> {
        if self.codes.is_empty() {
            return Ok(());
        }
        let uuids: Vec<Uuid> = self.codes.iter().map(|_| Uuid::new_v4()).collect();
        sqlx::query(
            r#"
            INSERT INTO reward
                (reward_uuid, account_holder_id, campaign_id, code, issued_date, expiry_date,
                 redeemed_date, cancelled_date, reward_config_id, retailer_id)
            SELECT t.*, $9, $10
            FROM UNNEST($1::UUID[], $2::BIGINT[], $3::BIGINT[], $4::VARCHAR[], $5::TIMESTAMPTZ[],
                        $6::TIMESTAMPTZ[], $7::TIMESTAMPTZ[], $8::TIMESTAMPTZ[]) AS t
            "#,
        )
        .bind(&uuids)
        .bind(&self.account_holder_ids)
        .bind(&self.campaign_ids)
        .bind(&self.codes)
        .bind(&self.issued_dates)
        .bind(&self.expiry_dates)
        .bind(&self.redeemed_dates)
        .bind(&self.cancelled_dates)
        .bind(reward_config_id)
        .bind(retailer_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
struct PendingRewardRows {
    account_holder_ids: Vec<i64>,
    campaign_ids: Vec<i64>,
    created_dates: Vec<DateTime<Utc>>,
    conversion_dates: Vec<DateTime<Utc>>,
}

impl PendingRewardRows {
    fn push(
        &mut self,
        account_holder_id: i64,
        campaign_id: i64,
        created_date: DateTime<Utc>,
        conversion_date: DateTime<Utc>,
    ) {
        self.account_holder_ids.push(account_holder_id);
        self.campaign_ids.push(campaign_id);
        self.created_dates.push(created_date);
        self.conversion_dates.push(conversion_date);
    }

    async fn insert(&self, conn: &mut PgConnection, reward_config_id: i64) -> anyhow::Result<()> {
        if self.account_holder_ids.is_empty() {
            return Ok(());
        }
        let uuids: Vec<Uuid> = self.account_holder_ids.iter().map(|_| Uuid::new_v4()).collect();
        sqlx::query(
            r#"
            INSERT INTO pending_reward
                (pending_reward_uuid, account_holder_id, campaign_id, created_date, conversion_date,
                 reward_config_id, value, count, total_cost_to_user)
            SELECT t.*, $6, $7, 1, $7
            FROM UNNEST($1::UUID[], $2::BIGINT[], $3::BIGINT[], $4::TIMESTAMPTZ[], $5::TIMESTAMPTZ[]) AS t
            "#,
        )
        .bind(&uuids)
        .bind(&self.account_holder_ids)
        .bind(&self.campaign_ids)
        .bind(&self.created_dates)
        .bind(&self.conversion_dates)
        .bind(reward_config_id)
        .bind(fixtures::PENDING_REWARD_VALUE)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[derive(Default)]
struct TransactionRows {
    account_holder_ids: Vec<i64>,
    transaction_ids: Vec<String>,
    amounts: Vec<i64>,
    mids: Vec<String>,
    datetimes: Vec<DateTime<Utc>>,
}

impl TransactionRows {
    fn push(
        &mut self,
        account_holder_id: i64,
        transaction_id: String,
        amount: i64,
        mid: String,
        datetime: DateTime<Utc>,
    ) {
        self.account_holder_ids.push(account_holder_id);
        self.transaction_ids.push(transaction_id);
        self.amounts.push(amount);
        self.mids.push(mid);
        self.datetimes.push(datetime);
    }

    /// Transactions plus one earn row per active campaign.
    async fn insert(
        &self,
        conn: &mut PgConnection,
        retailer_id: i64,
        campaigns: &[CampaignWithRules],
    ) -> anyhow::Result<()> {
        if self.transaction_ids.is_empty() {
            return Ok(());
        }
        let ids = sqlx::query_as::<_, (i64, i64)>(
            r#"
            INSERT INTO transaction (account_holder_id, transaction_id, amount, mid, datetime, retailer_id, processed)
            SELECT t.*, $6, TRUE
            FROM UNNEST($1::BIGINT[], $2::VARCHAR[], $3::BIGINT[], $4::VARCHAR[], $5::TIMESTAMPTZ[]) AS t
            RETURNING id, amount
            "#,
        )
        .bind(&self.account_holder_ids)
        .bind(&self.transaction_ids)
        .bind(&self.amounts)
        .bind(&self.mids)
        .bind(&self.datetimes)
        .bind(retailer_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut transaction_ids = Vec::new();
        let mut loyalty_types = Vec::new();
        let mut earn_amounts = Vec::new();
        for (id, amount) in ids {
            for campaign in campaigns {
                let loyalty_type = campaign.campaign.loyalty_type;
                transaction_ids.push(id);
                loyalty_types.push(loyalty_type.as_str());
                earn_amounts.push(fixtures::earn_amount(loyalty_type, amount));
            }
        }
        sqlx::query(
            r#"
            INSERT INTO transaction_earn (transaction_id, loyalty_type, earn_amount)
            SELECT id, loyalty_type::loyalty_type, earn_amount
            FROM UNNEST($1::BIGINT[], $2::TEXT[], $3::BIGINT[]) AS t(id, loyalty_type, earn_amount)
            "#,
        )
        .bind(&transaction_ids)
        .bind(&loyalty_types)
        .bind(&earn_amounts)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
