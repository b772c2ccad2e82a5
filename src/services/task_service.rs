//! Retry task queue.
//!
//! Tasks are rows in `retry_task`. API handlers create them inside their own
//! database transaction, so a task only becomes visible once the work that
//! produced it is committed. The worker claims due tasks with
//! `FOR UPDATE SKIP LOCKED`, so any number of workers can share the table.
//!
//! # Status Flow
//!
//! - `PENDING` → `IN_PROGRESS` when claimed, leased for `TASK_LEASE_SECONDS`
//! - `IN_PROGRESS` → `SUCCESS`, `WAITING`, `CANCELLED`, `FAILED`, or back to `PENDING`
//! - an `IN_PROGRESS` task whose lease ran out (its worker died) is claimed
//!   again and the lost run counts as a failed attempt
//! - a failed attempt is retried after `base^attempts` seconds, capped at
//!   [`MAX_RETRY_DELAY_SECONDS`], until `TASK_MAX_RETRIES` is reached, then
//!   the task is `FAILED`
//! - `WAITING` tasks are moved back to `PENDING` by whatever they wait for
//! - finished tasks older than the retention period are deleted by the scheduler

use crate::{
    db::DbPool,
    error::AppError,
    models::task::{
        ActivationParams, RetryTask, RetryTaskStatus, RewardIssuanceParams, TaskOutcome, TaskType,
    },
    services::{account_service, balance_service, callback_service, reward_service},
    state::AppState,
};
use chrono::{DateTime, Days, Duration, NaiveTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::PgConnection;
use std::time::Duration as StdDuration;

/// Insert a task in the given status and return its id.
pub async fn create_task<P: Serialize>(
    conn: &mut PgConnection,
    task_type: TaskType,
    params: &P,
    status: RetryTaskStatus,
) -> Result<i64, AppError> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO retry_task (task_type, params, status)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(task_type.as_str())
    .bind(serde_json::to_value(params)?)
    .bind(status)
    .fetch_one(&mut *conn)
    .await?;

    tracing::debug!(task_id = id, task_type = task_type.as_str(), "Retry task created");
    Ok(id)
}

/// Insert a task that is due immediately.
pub async fn enqueue<P: Serialize>(
    conn: &mut PgConnection,
    task_type: TaskType,
    params: &P,
) -> Result<i64, AppError> {
    create_task(conn, task_type, params, RetryTaskStatus::Pending).await
}

pub async fn enqueue_many<P: Serialize>(
    conn: &mut PgConnection,
    task_type: TaskType,
    params: &[P],
) -> Result<Vec<i64>, AppError> {
    let mut ids = Vec::with_capacity(params.len());
    for p in params {
        ids.push(enqueue(conn, task_type, p).await?);
    }
    Ok(ids)
}

/// Move `WAITING` tasks back to `PENDING`, due now.
pub async fn release_waiting(conn: &mut PgConnection, task_ids: &[i64]) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE retry_task
        SET status = 'PENDING', next_attempt_time = NOW(), updated_at = NOW()
        WHERE id = ANY($1) AND status = 'WAITING'
        "#,
    )
    .bind(task_ids)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Release every waiting activation task of a retailer.
///
/// Called when one of its campaigns goes live.
pub async fn release_waiting_activations(
    conn: &mut PgConnection,
    retailer_id: i64,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE retry_task
        SET status = 'PENDING', next_attempt_time = NOW(), updated_at = NOW()
        WHERE task_type = $1
          AND status = 'WAITING'
          AND (params->>'account_holder_id')::BIGINT IN (
              SELECT id FROM account_holder WHERE retailer_id = $2 AND status = 'PENDING'
          )
        "#,
    )
    .bind(TaskType::AccountHolderActivation.as_str())
    .bind(retailer_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        tracing::info!(
            retailer_id,
            count = result.rows_affected(),
            "Re-queued waiting account holder activations"
        );
    }
    Ok(result.rows_affected())
}

/// Longest wait between two attempts of a task.
pub const MAX_RETRY_DELAY_SECONDS: i64 = 7 * 24 * 3600;

/// Append one entry to a task's audit trail.
pub async fn append_audit(
    conn: &mut PgConnection,
    task_id: i64,
    entry: Value,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE retry_task SET audit_data = audit_data || jsonb_build_array($2::jsonb), updated_at = NOW() WHERE id = $1",
    )
    .bind(task_id)
    .bind(entry)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// State a task moves to after one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub status: RetryTaskStatus,
    pub attempts: i32,
    /// Seconds until the next attempt, when the task runs again.
    pub retry_in: Option<i64>,
}

impl Transition {
    pub fn after(outcome: &TaskOutcome, attempts: i32) -> Self {
        let (status, retry_in) = match outcome {
            TaskOutcome::Success => (RetryTaskStatus::Success, None),
            TaskOutcome::Waiting => (RetryTaskStatus::Waiting, None),
            TaskOutcome::Cancelled => (RetryTaskStatus::Cancelled, None),
            TaskOutcome::Failed { .. } => (RetryTaskStatus::Failed, None),
            TaskOutcome::Requeue { after_seconds } => {
                (RetryTaskStatus::Pending, Some(*after_seconds))
            }
        };
        Self {
            status,
            attempts,
            retry_in,
        }
    }

    pub fn after_failure(attempts: i32, max_retries: i32, backoff_base: i64) -> Self {
        let attempts = attempts + 1;
        if attempts >= max_retries {
            Self {
                status: RetryTaskStatus::Failed,
                attempts,
                retry_in: None,
            }
        } else {
            Self {
                status: RetryTaskStatus::Pending,
                attempts,
                retry_in: Some(retry_delay(backoff_base, attempts)),
            }
        }
    }
}

/// Exponential backoff: `base^attempts` seconds.
pub fn retry_delay(backoff_base: i64, attempts: i32) -> i64 {
    backoff_base.saturating_pow(attempts.max(0) as u32)
}

/// When a task due again in `retry_in` seconds runs next, the delay capped at
/// [`MAX_RETRY_DELAY_SECONDS`].
pub fn next_attempt_at(now: DateTime<Utc>, retry_in: i64) -> DateTime<Utc> {
    now + Duration::seconds(retry_in.clamp(0, MAX_RETRY_DELAY_SECONDS))
}

/// Background task processor.
///
/// Holds the shared pool and configuration plus one HTTP client reused by
/// every outbound callback.
#[derive(Clone)]
pub struct Worker {
    state: AppState,
    http: reqwest::Client,
}

impl Worker {
    pub fn new(state: AppState) -> Result<Self, AppError> {
        let config = &state.config;
        if config.task_lease_seconds <= config.callback_timeout_seconds as i64 {
            return Err(AppError::Configuration(
                "TASK_LEASE_SECONDS must exceed CALLBACK_TIMEOUT_SECONDS".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(state.config.callback_timeout_seconds))
            .build()?;
        Ok(Self { state, http })
    }

    /// Process due tasks until interrupted.
    pub async fn run(&self) -> Result<(), AppError> {
        let idle = StdDuration::from_secs(self.state.config.task_poll_interval_seconds);
        tracing::info!("Task worker started");
        loop {
            // a running task is never interrupted; shutdown is only checked while idle
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "Task worker iteration failed"),
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }
        tracing::info!("Task worker stopped");
        Ok(())
    }

    /// Claim and run one due task. Returns false when nothing was due.
    pub async fn process_next(&self) -> Result<bool, AppError> {
        let config = &self.state.config;
        let Some(task) = claim_next(&self.state.pool, config.task_lease_seconds).await? else {
            return Ok(false);
        };

        tracing::info!(task_id = task.id, task_type = %task.task_type, attempts = task.attempts, "Running task");
        let (transition, audit) = match self.dispatch(&task).await {
            Ok(outcome) => {
                tracing::info!(task_id = task.id, ?outcome, "Task finished");
                let audit = match &outcome {
                    TaskOutcome::Failed { reason } => {
                        Some(json!({"timestamp": Utc::now(), "error": reason}))
                    }
                    _ => None,
                };
                (Transition::after(&outcome, task.attempts), audit)
            }
            Err(e) => {
                tracing::warn!(task_id = task.id, error = %e, "Task attempt failed");
                let audit = json!({"timestamp": Utc::now(), "error": e.to_string()});
                (
                    Transition::after_failure(
                        task.attempts,
                        config.task_max_retries,
                        config.task_retry_backoff_base,
                    ),
                    Some(audit),
                )
            }
        };

        if transition.status == RetryTaskStatus::Failed {
            tracing::error!(task_id = task.id, task_type = %task.task_type, "Task failed permanently");
        }
        apply_transition(&self.state.pool, task.id, &transition, audit).await?;
        Ok(true)
    }

    async fn dispatch(&self, task: &RetryTask) -> Result<TaskOutcome, AppError> {
        let pool = &self.state.pool;
        match TaskType::from_name(&task.task_type) {
            Some(TaskType::AccountHolderActivation) => {
                let params: ActivationParams = serde_json::from_value(task.params.clone())?;
                account_service::activate_account_holder(pool, &params).await
            }
            Some(TaskType::EnrolmentCallback) => {
                callback_service::send_enrolment_callback(pool, &self.http, task).await
            }
            Some(TaskType::RewardIssuance) => {
                let params: RewardIssuanceParams = serde_json::from_value(task.params.clone())?;
                reward_service::issue_reward(&self.state, &params).await
            }
            None => Err(AppError::Configuration(format!(
                "unknown task type {}",
                task.task_type
            ))),
        }
    }
}

/// Claim the most overdue task and lease it for `lease_seconds`.
///
/// An `IN_PROGRESS` task is only due again once its lease has run out, which
/// means the worker running it stopped before recording a result.
pub async fn claim_next(pool: &DbPool, lease_seconds: i64) -> Result<Option<RetryTask>, AppError> {
    let task = sqlx::query_as::<_, RetryTask>(
        r#"
        UPDATE retry_task
        SET status = 'IN_PROGRESS',
            attempts = attempts + CASE WHEN status = 'IN_PROGRESS' THEN 1 ELSE 0 END,
            next_attempt_time = NOW() + make_interval(secs => $1),
            updated_at = NOW()
        WHERE id = (
            SELECT id FROM retry_task
            WHERE status IN ('PENDING', 'IN_PROGRESS') AND next_attempt_time <= NOW()
            ORDER BY next_attempt_time
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING id, task_type, params, status, attempts, next_attempt_time, audit_data
        "#,
    )
    .bind(lease_seconds as f64)
    .fetch_optional(pool)
    .await?;
    Ok(task)
}

/// Record the result of a run. Only tasks still `IN_PROGRESS` are updated.
pub async fn apply_transition(
    pool: &DbPool,
    task_id: i64,
    transition: &Transition,
    audit: Option<Value>,
) -> Result<(), AppError> {
    let next_attempt_time = transition
        .retry_in
        .map(|retry_in| next_attempt_at(Utc::now(), retry_in));
    let audit = match audit {
        Some(entry) => json!([entry]),
        None => json!([]),
    };

    sqlx::query(
        r#"
        UPDATE retry_task
        SET status = $2,
            attempts = $3,
            next_attempt_time = COALESCE($4, next_attempt_time),
            audit_data = audit_data || $5::jsonb,
            updated_at = NOW()
        WHERE id = $1 AND status = 'IN_PROGRESS'
        "#,
    )
    .bind(task_id)
    .bind(transition.status)
    .bind(transition.attempts)
    .bind(next_attempt_time)
    .bind(audit)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete `SUCCESS` and `CANCELLED` tasks created before midnight UTC
/// `retention_days` ago. Failed tasks are kept for investigation.
pub async fn cleanup_old_tasks(pool: &DbPool, retention_days: i32) -> Result<u64, AppError> {
    let Some(cutoff) = cleanup_cutoff(Utc::now(), retention_days) else {
        return Ok(0);
    };
    let result = sqlx::query(
        "DELETE FROM retry_task WHERE status IN ('SUCCESS', 'CANCELLED') AND created_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Midnight UTC `retention_days` before `now`.
pub fn cleanup_cutoff(now: DateTime<Utc>, retention_days: i32) -> Option<DateTime<Utc>> {
    now.date_naive()
        .checked_sub_days(Days::new(retention_days.max(0) as u64))
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
}

fn every(seconds: u64) -> tokio::time::Interval {
    tokio::time::interval(StdDuration::from_secs(seconds.max(1)))
}

/// Periodic jobs.
///
/// - converts pending rewards whose refund window has closed
/// - resets balances that reached their reset date
/// - deletes finished tasks past the retention period
pub async fn run_scheduler(state: AppState) -> Result<(), AppError> {
    let config = &state.config;
    let mut pending_rewards = every(config.pending_rewards_schedule_seconds);
    let mut balances = every(config.reset_balances_schedule_seconds);
    let mut cleanup = every(config.task_cleanup_schedule_seconds);
    tracing::info!("Scheduler started");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = pending_rewards.tick() => {
                match reward_service::convert_due_pending_rewards(&state.pool).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "Converted pending rewards"),
                    Err(e) => tracing::error!(error = %e, "Pending reward conversion failed"),
                }
            }
            _ = balances.tick() => {
                if let Err(e) = balance_service::reset_due_balances(&state.pool).await {
                    tracing::error!(error = %e, "Balance reset failed");
                }
            }
            _ = cleanup.tick() => {
                match cleanup_old_tasks(&state.pool, config.task_cleanup_retention_days).await {
                    Ok(count) => tracing::info!(count, "Old retry tasks deleted"),
                    Err(e) => tracing::error!(error = %e, "Retry task cleanup failed"),
                }
            }
        }
    }
    tracing::info!("Scheduler stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(retry_delay(3, 1), 3);
        assert_eq!(retry_delay(3, 2), 9);
        assert_eq!(retry_delay(3, 5), 243);
        assert_eq!(retry_delay(3, 0), 1);
        assert_eq!(retry_delay(10, 40), i64::MAX);
    }

    #[test]
    fn failures_retry_until_max_attempts() {
        let t = Transition::after_failure(0, 6, 3);
        assert_eq!(t.status, RetryTaskStatus::Pending);
        assert_eq!(t.attempts, 1);
        assert_eq!(t.retry_in, Some(3));

        let t = Transition::after_failure(4, 6, 3);
        assert_eq!(t.retry_in, Some(243));

        let t = Transition::after_failure(5, 6, 3);
        assert_eq!(t.status, RetryTaskStatus::Failed);
        assert_eq!(t.attempts, 6);
        assert_eq!(t.retry_in, None);
    }

    #[test]
    fn retry_delay_is_capped() {
        let now = Utc::now();
        assert_eq!(next_attempt_at(now, 9), now + Duration::seconds(9));
        assert_eq!(
            next_attempt_at(now, i64::MAX),
            now + Duration::seconds(MAX_RETRY_DELAY_SECONDS)
        );

        let t = Transition::after_failure(39, 50, 10);
        assert_eq!(t.retry_in, Some(i64::MAX));
        assert!(next_attempt_at(now, t.retry_in.unwrap()) > now);
    }

    #[test]
    fn cleanup_cutoff_is_midnight_retention_days_ago() {
        let now = DateTime::parse_from_rfc3339("2026-10-17T15:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let cutoff = cleanup_cutoff(now, 180).unwrap();
        assert_eq!(cutoff.to_rfc3339(), "2026-04-20T00:00:00+00:00");
        assert_eq!(cleanup_cutoff(now, i32::MAX), None);
    }

    #[test]
    fn permanent_failure_skips_retries() {
        let outcome = TaskOutcome::Failed {
            reason: "invalid callback URL".into(),
        };
        assert_eq!(
            Transition::after(&outcome, 1),
            Transition {
                status: RetryTaskStatus::Failed,
                attempts: 1,
                retry_in: None,
            }
        );
    }

    #[test]
    fn outcomes_do_not_count_as_attempts() {
        let t = Transition::after(&TaskOutcome::Requeue { after_seconds: 3600 }, 2);
        assert_eq!(
            t,
            Transition {
                status: RetryTaskStatus::Pending,
                attempts: 2,
                retry_in: Some(3600),
            }
        );
        assert_eq!(
            Transition::after(&TaskOutcome::Waiting, 0).status,
            RetryTaskStatus::Waiting
        );
        assert_eq!(
            Transition::after(&TaskOutcome::Cancelled, 0).status,
            RetryTaskStatus::Cancelled
        );
    }
}
