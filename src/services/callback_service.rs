//! Enrolment callbacks.
//!
//! Once an account holder is activated, the channel that enrolled them is told
//! the new account number by a JSON POST to the `callback_url` it supplied.
//! Delivery runs as the `enrolment-callback` retry task; every exchange that
//! gets a response is kept in the task's audit data.

use crate::{
    db::DbPool,
    error::AppError,
    models::task::{CallbackParams, RetryTask, TaskOutcome},
    services::task_service,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

/// Body POSTed to the callback URL.
///
/// # JSON Example
///
/// ```json
/// {
///   "UUID": "7f6e1c6b-2f0e-4a8e-9d8e-0b8f0c7d1a2b",
///   "email": "jane@example.com",
///   "account_number": "RTST1234567890",
///   "third_party_identifier": "ext-0001"
/// }
/// ```
#[derive(Debug, Serialize, PartialEq)]
pub struct CallbackPayload {
    #[serde(rename = "UUID")]
    pub account_holder_uuid: Uuid,
    pub email: String,
    pub account_number: Option<String>,
    pub third_party_identifier: String,
}

#[derive(sqlx::FromRow)]
struct CallbackHolder {
    account_holder_uuid: Uuid,
    email: String,
    account_number: Option<String>,
}

/// Deliver the enrolment callback of one task.
///
/// # Process
///
/// 1. Validate the callback URL; an unusable URL fails the task outright
/// 2. Load the activated account holder
/// 3. POST the payload with the worker's timeout
/// 4. Record request and response in the task's audit data
///
/// # Errors
///
/// Transport errors and non-2xx responses are returned as `Outbound`, which
/// makes the worker retry with backoff. A non-2xx response is audited first.
pub async fn send_enrolment_callback(
    pool: &DbPool,
    http: &reqwest::Client,
    task: &RetryTask,
) -> Result<TaskOutcome, AppError> {
    let params: CallbackParams = serde_json::from_value(task.params.clone())?;
    let url = match validate_callback_url(&params.callback_url) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(task_id = task.id, error = %e, "Unusable callback URL");
            return Ok(TaskOutcome::Failed {
                reason: e.to_string(),
            });
        }
    };

    let holder = sqlx::query_as::<_, CallbackHolder>(
        "SELECT account_holder_uuid, email, account_number FROM account_holder WHERE id = $1",
    )
    .bind(params.account_holder_id)
    .fetch_one(pool)
    .await?;

    tracing::info!(account_holder_uuid = %holder.account_holder_uuid, "Processing callback");
    let timestamp = Utc::now();
    let payload = CallbackPayload {
        account_holder_uuid: holder.account_holder_uuid,
        email: holder.email,
        account_number: holder.account_number,
        third_party_identifier: params.third_party_identifier,
    };

    let response = http.post(url).json(&payload).send().await?;
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let audit = callback_audit(timestamp, &params.callback_url, status.as_u16(), &body);
    let mut conn = pool.acquire().await?;
    task_service::append_audit(&mut conn, task.id, audit).await?;

    if !status.is_success() {
        return Err(AppError::Outbound(format!(
            "callback responded {}: {body}",
            status.as_u16()
        )));
    }

    tracing::info!(account_holder_uuid = %payload.account_holder_uuid, "Callback succeeded");
    Ok(TaskOutcome::Success)
}

/// Audit entry of one callback exchange.
pub fn callback_audit(timestamp: DateTime<Utc>, url: &str, status: u16, body: &str) -> Value {
    json!({
        "timestamp": timestamp,
        "request": {"url": url},
        "response": {"status": status, "body": body},
    })
}

/// Validate a callback URL.
///
/// # Rules
///
/// - Must be a valid absolute URL
/// - Must use HTTP or HTTPS
/// - Maximum 2048 characters
pub fn validate_callback_url(raw: &str) -> Result<Url, AppError> {
    if raw.len() > 2048 {
        return Err(AppError::Outbound(
            "callback URL exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = Url::parse(raw)
        .map_err(|_| AppError::Outbound(format!("invalid callback URL {raw:?}")))?;

    match parsed.scheme() {
        "https" | "http" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(AppError::Outbound(format!(
            "callback URL must use HTTP or HTTPS: {raw:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https_urls() {
        assert!(validate_callback_url("https://example.com/enrol/callback").is_ok());
        assert!(validate_callback_url("http://localhost:8000/callback").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        assert!(validate_callback_url("ftp://example.com/callback").is_err());
        assert!(validate_callback_url("not a url").is_err());
        assert!(validate_callback_url("mailto:someone@example.com").is_err());
        let long = format!("https://example.com/{}", "a".repeat(2048));
        assert!(validate_callback_url(&long).is_err());
    }

    #[test]
    fn audit_keeps_url_status_and_body() {
        let audit = callback_audit(
            Utc::now(),
            "https://example.com/callback",
            500,
            "internal error",
        );
        assert_eq!(audit["request"], json!({"url": "https://example.com/callback"}));
        assert_eq!(
            audit["response"],
            json!({"status": 500, "body": "internal error"})
        );
        assert!(audit["timestamp"].is_string());
    }

    #[test]
    fn payload_uses_uppercase_uuid_key() {
        let payload = CallbackPayload {
            account_holder_uuid: Uuid::nil(),
            email: "jane@example.com".into(),
            account_number: Some("RTST1234567890".into()),
            third_party_identifier: "ext-0001".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["UUID"], "00000000-0000-0000-0000-000000000000");
        assert_eq!(json["account_number"], "RTST1234567890");
    }
}
