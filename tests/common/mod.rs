//! Rows and requests shared by the database-backed tests.
//!
//! Each `#[sqlx::test]` gets a freshly migrated database, so fixtures insert
//! plain rows without cleaning up.

#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::AUTHORIZATION},
};
use chrono::Utc;
use cosmos::{
    config::Config,
    db::DbPool,
    handlers::{Api, app},
    state::AppState,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

pub const VELA_TOKEN: &str = "vela-token";
pub const POLARIS_TOKEN: &str = "polaris-token";

pub fn state(pool: DbPool) -> AppState {
    let config = Config::from_vars([
        ("VELA_API_AUTH_TOKEN", VELA_TOKEN),
        ("POLARIS_API_AUTH_TOKEN", POLARIS_TOKEN),
    ])
    .unwrap();
    AppState::new(pool, config)
}

pub fn router(api: Api, pool: &DbPool) -> Router {
    app(api, state(pool.clone()))
}

pub fn request(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("bpl-user-channel", "user-channel")
        .header(AUTHORIZATION, format!("Token {token}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Insert a retailer with an email/first_name/last_name profile and one
/// boolean marketing question.
pub async fn retailer(pool: &DbPool, slug: &str, status: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO retailer (
            name, slug, account_number_prefix, profile_config,
            marketing_preference_config, loyalty_name, status
        )
        VALUES ($1, $2, 'RTST', $3, $4, 'Bink', $5::retailer_status)
        RETURNING id
        "#,
    )
    .bind(format!("Retailer {slug}"))
    .bind(slug)
    .bind("email:\n  required: true\nfirst_name:\n  required: true\nlast_name:\n  required: true\n")
    .bind("marketing_pref:\n  type: boolean\n  label: Sample Question?\n")
    .bind(status)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn set_balance_lifespan(pool: &DbPool, retailer_id: i64, days: i32) {
    sqlx::query("UPDATE retailer SET balance_lifespan = $2 WHERE id = $1")
        .bind(retailer_id)
        .bind(days)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn reward_config(pool: &DbPool, retailer_id: i64) -> i64 {
    let fetch_type_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO fetch_type (name, path)
        VALUES ('PRE_LOADED', 'cosmos.rewards.fetch_reward.pre_loaded.PreLoaded')
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .fetch_one(pool)
    .await
    .unwrap();
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO reward_config (reward_slug, retailer_id, fetch_type_id, required_fields_values)
        VALUES ('10percentoff', $1, $2, 'validity_days: 30')
        RETURNING id
        "#,
    )
    .bind(retailer_id)
    .bind(fetch_type_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Campaign shape used by [`campaign`].
pub struct CampaignSpec<'a> {
    pub slug: &'a str,
    pub status: &'a str,
    pub loyalty_type: &'a str,
    pub threshold: i64,
    pub reward_goal: i64,
    pub allocation_window: i32,
}

impl<'a> CampaignSpec<'a> {
    /// An accumulator campaign rewarding every £10 spent, no refund window.
    pub fn accumulator(slug: &'a str, status: &'a str) -> Self {
        Self {
            slug,
            status,
            loyalty_type: "ACCUMULATOR",
            threshold: 500,
            reward_goal: 1000,
            allocation_window: 0,
        }
    }
}

/// Insert a campaign with its earn and reward rules. Active campaigns
/// started yesterday.
pub async fn campaign(
    pool: &DbPool,
    retailer_id: i64,
    reward_config_id: i64,
    spec: &CampaignSpec<'_>,
) -> i64 {
    let campaign_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO campaign (status, name, slug, reward_config_id, retailer_id, loyalty_type, start_date)
        VALUES (
            $1::campaign_status, $2, $2, $3, $4, $5::loyalty_type,
            CASE WHEN $1 = 'ACTIVE' THEN NOW() - INTERVAL '1 day' END
        )
        RETURNING id
        "#,
    )
    .bind(spec.status)
    .bind(spec.slug)
    .bind(reward_config_id)
    .bind(retailer_id)
    .bind(spec.loyalty_type)
    .fetch_one(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO earn_rule (campaign_id, threshold, increment) VALUES ($1, $2, $3)")
        .bind(campaign_id)
        .bind(spec.threshold)
        .bind((spec.loyalty_type == "STAMPS").then_some(100_i64))
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        r#"
        INSERT INTO reward_rule (campaign_id, reward_config_id, reward_goal, reward_slug, allocation_window)
        VALUES ($1, $2, $3, '10percentoff', $4)
        "#,
    )
    .bind(campaign_id)
    .bind(reward_config_id)
    .bind(spec.reward_goal)
    .bind(spec.allocation_window)
    .execute(pool)
    .await
    .unwrap();
    campaign_id
}

pub struct Holder {
    pub id: i64,
    pub uuid: Uuid,
    pub opt_out_token: Uuid,
}

/// Insert an account holder created yesterday.
pub async fn account_holder(pool: &DbPool, retailer_id: i64, email: &str, status: &str) -> Holder {
    let (uuid, opt_out_token) = (Uuid::new_v4(), Uuid::new_v4());
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO account_holder (email, status, account_holder_uuid, opt_out_token, retailer_id, created_at)
        VALUES ($1, $2::account_holder_status, $3, $4, $5, NOW() - INTERVAL '1 day')
        RETURNING id
        "#,
    )
    .bind(email)
    .bind(status)
    .bind(uuid)
    .bind(opt_out_token)
    .bind(retailer_id)
    .fetch_one(pool)
    .await
    .unwrap();
    Holder {
        id,
        uuid,
        opt_out_token,
    }
}

pub async fn set_balance(pool: &DbPool, account_holder_id: i64, campaign_id: i64, balance: i64) {
    sqlx::query(
        r#"
        INSERT INTO campaign_balance (account_holder_id, campaign_id, balance)
        VALUES ($1, $2, $3)
        ON CONFLICT (account_holder_id, campaign_id) DO UPDATE SET balance = EXCLUDED.balance
        "#,
    )
    .bind(account_holder_id)
    .bind(campaign_id)
    .bind(balance)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn balance(pool: &DbPool, account_holder_id: i64, campaign_id: i64) -> Option<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT balance FROM campaign_balance WHERE account_holder_id = $1 AND campaign_id = $2",
    )
    .bind(account_holder_id)
    .bind(campaign_id)
    .fetch_optional(pool)
    .await
    .unwrap()
}

pub async fn count(pool: &DbPool, sql: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await.unwrap()
}

/// Transactions API body for a purchase made now.
pub fn transaction(account_holder_uuid: Uuid, id: &str, amount: i64) -> Value {
    json!({
        "id": id,
        "transaction_id": format!("payment-{id}"),
        "transaction_total": amount,
        "datetime": Utc::now().timestamp(),
        "MID": "mid-1",
        "loyalty_id": account_holder_uuid.to_string(),
    })
}
