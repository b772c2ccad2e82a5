//! Account holder activation, deactivation and opt-out against a real database.
//!
//! Run with `DATABASE_URL` pointing at a PostgreSQL server and `--ignored`.

mod common;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use common::{CampaignSpec, POLARIS_TOKEN, VELA_TOKEN};
use cosmos::{
    db::DbPool,
    handlers::Api,
    models::task::{ActivationParams, TaskOutcome},
    services::account_service,
};
use serde_json::json;
use tower::ServiceExt;

/// A WAITING enrolment callback and the activation params pointing at it.
async fn pending_enrolment(pool: &DbPool, account_holder_id: i64) -> ActivationParams {
    let callback_retry_task_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO retry_task (task_type, params, status)
        VALUES ('enrolment-callback', $1, 'WAITING')
        RETURNING id
        "#,
    )
    .bind(json!({
        "account_holder_id": account_holder_id,
        "callback_url": "https://example.com/callback",
        "third_party_identifier": "ext-0001",
    }))
    .fetch_one(pool)
    .await
    .unwrap();
    ActivationParams {
        account_holder_id,
        callback_retry_task_id,
        third_party_identifier: "ext-0001".into(),
        channel: "user-channel".into(),
    }
}

async fn task_status(pool: &DbPool, task_id: i64) -> String {
    sqlx::query_scalar::<_, String>("SELECT status::TEXT FROM retry_task WHERE id = $1")
        .bind(task_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn activation_creates_balances_and_releases_the_callback(pool: DbPool) {
    let retailer_id = common::retailer(&pool, "test-retailer", "ACTIVE").await;
    common::set_balance_lifespan(&pool, retailer_id, 14).await;
    let reward_config_id = common::reward_config(&pool, retailer_id).await;
    let spec = CampaignSpec::accumulator("spring", "ACTIVE");
    let campaign_id = common::campaign(&pool, retailer_id, reward_config_id, &spec).await;
    let holder = common::account_holder(&pool, retailer_id, "jane@example.com", "PENDING").await;
    let params = pending_enrolment(&pool, holder.id).await;

    let outcome = account_service::activate_account_holder(&pool, &params).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Success);

    let (status, account_number) = sqlx::query_as::<_, (String, Option<String>)>(
        "SELECT status::TEXT, account_number FROM account_holder WHERE id = $1",
    )
    .bind(holder.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "ACTIVE");
    assert!(account_number.is_some_and(|n| n.starts_with("RTST") && n.len() == 14));
    assert_eq!(common::balance(&pool, holder.id, campaign_id).await, Some(0));
    assert_eq!(
        common::count(&pool, "SELECT COUNT(*) FROM campaign_balance WHERE reset_date = CURRENT_DATE + 14").await,
        1
    );
    assert_eq!(task_status(&pool, params.callback_retry_task_id).await, "PENDING");
    assert_eq!(
        common::count(&pool, "SELECT COUNT(*) FROM activity WHERE activity_type = 'ACCOUNT_ENROLMENT'").await,
        1
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn activation_waits_until_a_campaign_goes_live(pool: DbPool) {
    let retailer_id = common::retailer(&pool, "test-retailer", "ACTIVE").await;
    let reward_config_id = common::reward_config(&pool, retailer_id).await;
    let draft = CampaignSpec::accumulator("spring", "DRAFT");
    let campaign_id = common::campaign(&pool, retailer_id, reward_config_id, &draft).await;
    let holder = common::account_holder(&pool, retailer_id, "jane@example.com", "PENDING").await;
    let params = pending_enrolment(&pool, holder.id).await;
    let activation_task_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO retry_task (task_type, params, status) VALUES ('account-holder-activation', $1, 'WAITING') RETURNING id",
    )
    .bind(serde_json::to_value(&params).unwrap())
    .fetch_one(&pool)
    .await
    .unwrap();

    let outcome = account_service::activate_account_holder(&pool, &params).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Waiting);
    let (status, has_number) = sqlx::query_as::<_, (String, bool)>(
        "SELECT status::TEXT, account_number IS NOT NULL FROM account_holder WHERE id = $1",
    )
    .bind(holder.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((status.as_str(), has_number), ("PENDING", true));
    assert_eq!(task_status(&pool, params.callback_retry_task_id).await, "WAITING");

    let (status, _) = common::send(
        common::router(Api::Campaigns, &pool),
        common::request(
            "POST",
            "/api/campaigns/test-retailer/status-change",
            VELA_TOKEN,
            json!({
                "requested_status": "active",
                "campaign_slug": "spring",
                "activity_metadata": {"sso_username": "Jane Doe"},
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task_status(&pool, activation_task_id).await, "PENDING");
    assert_eq!(common::balance(&pool, holder.id, campaign_id).await, None);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn deactivation_clears_balances_and_cancels_usable_rewards(pool: DbPool) {
    let retailer_id = common::retailer(&pool, "test-retailer", "ACTIVE").await;
    let reward_config_id = common::reward_config(&pool, retailer_id).await;
    let mut spec = CampaignSpec::accumulator("spring", "ACTIVE");
    spec.allocation_window = 7;
    let campaign_id = common::campaign(&pool, retailer_id, reward_config_id, &spec).await;
    let holder = common::account_holder(&pool, retailer_id, "jane@example.com", "ACTIVE").await;
    common::set_balance(&pool, holder.id, campaign_id, 300).await;
    sqlx::query(
        r#"
        INSERT INTO pending_reward (
            pending_reward_uuid, account_holder_id, campaign_id, reward_config_id,
            created_date, conversion_date, value, count, total_cost_to_user
        )
        VALUES (gen_random_uuid(), $1, $2, $3, NOW(), NOW() + INTERVAL '7 days', 1000, 1, 1000)
        "#,
    )
    .bind(holder.id)
    .bind(campaign_id)
    .bind(reward_config_id)
    .execute(&pool)
    .await
    .unwrap();
    for (code, redeemed) in [("usable", false), ("redeemed", true)] {
        sqlx::query(
            r#"
            INSERT INTO reward (
                reward_uuid, reward_config_id, account_holder_id, code, issued_date,
                expiry_date, redeemed_date, retailer_id, campaign_id
            )
            VALUES (
                gen_random_uuid(), $1, $2, $3, NOW(), NOW() + INTERVAL '30 days',
                CASE WHEN $4 THEN NOW() END, $5, $6
            )
            "#,
        )
        .bind(reward_config_id)
        .bind(holder.id)
        .bind(code)
        .bind(redeemed)
        .bind(retailer_id)
        .bind(campaign_id)
        .execute(&pool)
        .await
        .unwrap();
    }

    let uri = format!("/api/loyalty/test-retailer/accounts/{}/status", holder.uuid);
    let (status, body) = common::send(
        common::router(Api::Accounts, &pool),
        common::request("PATCH", &uri, POLARIS_TOKEN, json!({"status": "inactive"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    assert_eq!(
        common::count(&pool, "SELECT COUNT(*) FROM account_holder WHERE status = 'INACTIVE'").await,
        1
    );
    assert_eq!(common::count(&pool, "SELECT COUNT(*) FROM campaign_balance").await, 0);
    assert_eq!(common::count(&pool, "SELECT COUNT(*) FROM pending_reward").await, 0);
    let cancelled = sqlx::query_scalar::<_, String>(
        "SELECT code FROM reward WHERE cancelled_date IS NOT NULL",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(cancelled, vec!["usable".to_string()]);

    let (status, body) = common::send(
        common::router(Api::Accounts, &pool),
        common::request("PATCH", &uri, POLARIS_TOKEN, json!({"status": "inactive"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATUS_REQUESTED");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn unsubscribe_only_turns_off_boolean_preferences(pool: DbPool) {
    let retailer_id = common::retailer(&pool, "test-retailer", "ACTIVE").await;
    let holder = common::account_holder(&pool, retailer_id, "jane@example.com", "ACTIVE").await;
    for (key, value, value_type) in [
        ("marketing_pref", "True", "BOOLEAN"),
        ("favourites", "shoes,hats", "STRING_LIST"),
        ("shoe_size", "9", "INTEGER"),
    ] {
        sqlx::query(
            r#"
            INSERT INTO account_holder_marketing_preference (account_holder_id, key_name, value, value_type)
            VALUES ($1, $2, $3, $4::marketing_preference_value_type)
            "#,
        )
        .bind(holder.id)
        .bind(key)
        .bind(value)
        .bind(value_type)
        .execute(&pool)
        .await
        .unwrap();
    }

    let uri = format!(
        "/api/public/test-retailer/marketing/unsubscribe?u={}",
        holder.opt_out_token
    );
    let response = common::router(Api::Public, &pool)
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&page).contains("<html"));

    let preferences = sqlx::query_as::<_, (String, String)>(
        "SELECT key_name, value FROM account_holder_marketing_preference ORDER BY key_name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(
        preferences,
        vec![
            ("favourites".to_string(), "shoes,hats".to_string()),
            ("marketing_pref".to_string(), "False".to_string()),
            ("shoe_size".to_string(), "9".to_string()),
        ]
    );
    assert_eq!(
        common::count(&pool, "SELECT COUNT(*) FROM activity WHERE activity_type = 'ACCOUNT_CHANGE'").await,
        1
    );
}
