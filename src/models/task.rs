//! Retry task models.
//!
//! Background work (activation, callbacks, reward issuance) is queued as rows
//! in `retry_task` and picked up by the task worker.

use crate::models::reward::IssuedRewardReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "retry_task_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryTaskStatus {
    Pending,
    InProgress,
    Waiting,
    Success,
    Failed,
    Cancelled,
}

/// Kinds of background task, stored by name in `retry_task.task_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    AccountHolderActivation,
    EnrolmentCallback,
    RewardIssuance,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::AccountHolderActivation => "account-holder-activation",
            TaskType::EnrolmentCallback => "enrolment-callback",
            TaskType::RewardIssuance => "reward-issuance",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "account-holder-activation" => Some(TaskType::AccountHolderActivation),
            "enrolment-callback" => Some(TaskType::EnrolmentCallback),
            "reward-issuance" => Some(TaskType::RewardIssuance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RetryTask {
    pub id: i64,
    pub task_type: String,
    pub params: serde_json::Value,
    pub status: RetryTaskStatus,
    pub attempts: i32,
    pub next_attempt_time: DateTime<Utc>,
    pub audit_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivationParams {
    pub account_holder_id: i64,
    /// Enrolment callback created alongside this task, released on activation.
    pub callback_retry_task_id: i64,
    pub third_party_identifier: String,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallbackParams {
    pub account_holder_id: i64,
    pub callback_url: String,
    pub third_party_identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardIssuanceParams {
    pub account_holder_id: i64,
    pub campaign_id: i64,
    pub reward_config_id: i64,
    pub reason: IssuedRewardReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reward_uuid: Option<Uuid>,
}

/// Result of running a task once.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success,
    /// Nothing to do yet; the task waits for an external trigger.
    Waiting,
    /// Try again after the given number of seconds without counting a failure.
    Requeue { after_seconds: i64 },
    Cancelled,
    /// The task can never succeed; it is failed without further attempts.
    Failed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names_round_trip() {
        for task_type in [
            TaskType::AccountHolderActivation,
            TaskType::EnrolmentCallback,
            TaskType::RewardIssuance,
        ] {
            assert_eq!(TaskType::from_name(task_type.as_str()), Some(task_type));
        }
        assert_eq!(TaskType::from_name("send-email"), None);
    }

    #[test]
    fn issuance_params_omit_missing_pending_reward() {
        let params = RewardIssuanceParams {
            account_holder_id: 1,
            campaign_id: 2,
            reward_config_id: 3,
            reason: IssuedRewardReason::GoalMet,
            pending_reward_uuid: None,
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "account_holder_id": 1,
                "campaign_id": 2,
                "reward_config_id": 3,
                "reason": "GOAL_MET",
            })
        );
    }
}
