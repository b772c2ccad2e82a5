//! Reward models.
//!
//! Rewards are pre-loaded codes. An unallocated reward has no account holder;
//! issuance assigns one together with the issue and expiry dates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Reward {
    pub id: i64,
    pub reward_uuid: Uuid,
    pub reward_config_id: i64,
    pub account_holder_id: Option<i64>,
    pub code: String,
    pub deleted: bool,
    pub issued_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub redeemed_date: Option<DateTime<Utc>>,
    pub cancelled_date: Option<DateTime<Utc>>,
    pub associated_url: String,
    pub retailer_id: i64,
    pub campaign_id: Option<i64>,
}

/// Status derived from a reward's dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    Issued,
    Cancelled,
    Redeemed,
    Expired,
}

impl RewardStatus {
    /// Cancellation wins over redemption, which wins over expiry.
    pub fn derive(
        cancelled_date: Option<DateTime<Utc>>,
        redeemed_date: Option<DateTime<Utc>>,
        expiry_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        if cancelled_date.is_some() {
            RewardStatus::Cancelled
        } else if redeemed_date.is_some() {
            RewardStatus::Redeemed
        } else if expiry_date.is_some_and(|expiry| expiry < now) {
            RewardStatus::Expired
        } else {
            RewardStatus::Issued
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RewardStatus::Issued => "issued",
            RewardStatus::Cancelled => "cancelled",
            RewardStatus::Redeemed => "redeemed",
            RewardStatus::Expired => "expired",
        }
    }
}

impl Reward {
    pub fn status(&self, now: DateTime<Utc>) -> RewardStatus {
        RewardStatus::derive(
            self.cancelled_date,
            self.redeemed_date,
            self.expiry_date,
            now,
        )
    }
}

/// Why a reward is being issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssuedRewardReason {
    GoalMet,
    Converted,
}

impl IssuedRewardReason {
    pub fn describe(&self) -> &'static str {
        match self {
            IssuedRewardReason::GoalMet => "Reward goal met",
            IssuedRewardReason::Converted => "Pending reward converted",
        }
    }
}

/// Reward data shown on the public microsite.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RewardMicrositeResponse {
    pub code: String,
    pub expiry_date: Option<NaiveDate>,
    pub template_slug: String,
    pub status: RewardStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeemed_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_precedence() {
        let now = Utc::now();
        let past = Some(now - Duration::days(1));
        let future = Some(now + Duration::days(1));

        assert_eq!(RewardStatus::derive(None, None, future, now), RewardStatus::Issued);
        assert_eq!(RewardStatus::derive(None, None, past, now), RewardStatus::Expired);
        assert_eq!(RewardStatus::derive(None, past, past, now), RewardStatus::Redeemed);
        assert_eq!(RewardStatus::derive(past, past, past, now), RewardStatus::Cancelled);
    }

    #[test]
    fn reason_serializes_as_screaming_snake() {
        let json = serde_json::to_string(&IssuedRewardReason::GoalMet).unwrap();
        assert_eq!(json, "\"GOAL_MET\"");
    }
}
