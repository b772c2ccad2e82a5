//! Campaign, earn rule and reward rule models.

use crate::{
    error::AppError,
    payload::{FieldReader, FromPayload},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Campaign lifecycle.
///
/// Allowed transitions:
/// - `Draft` → `Active`
/// - `Active` → `Ended` or `Cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "campaign_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Draft,
    Cancelled,
    Ended,
}

impl CampaignStatus {
    /// Whether a campaign currently in `current` may move to `self`.
    pub fn is_valid_transition_from(self, current: CampaignStatus) -> bool {
        matches!(
            (current, self),
            (CampaignStatus::Draft, CampaignStatus::Active)
                | (CampaignStatus::Active, CampaignStatus::Ended)
                | (CampaignStatus::Active, CampaignStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Draft => "draft",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "loyalty_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoyaltyType {
    Accumulator,
    Stamps,
}

impl LoyaltyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltyType::Accumulator => "ACCUMULATOR",
            LoyaltyType::Stamps => "STAMPS",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Campaign {
    pub id: i64,
    pub status: CampaignStatus,
    pub name: String,
    pub slug: String,
    pub reward_config_id: i64,
    pub retailer_id: i64,
    pub loyalty_type: LoyaltyType,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Active at `at`: status ACTIVE, started, and not yet ended.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active
            && self.start_date.is_some_and(|start| start <= at)
            && self.end_date.is_none_or(|end| end > at)
    }
}

/// How a transaction converts into balance.
///
/// `increment_multiplier` is stored as NUMERIC(10, 2); it is loaded here in
/// hundredths so earn calculations stay in integer arithmetic.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EarnRule {
    pub id: i64,
    pub campaign_id: i64,
    pub threshold: i64,
    pub increment: Option<i64>,
    pub multiplier_hundredths: i64,
    pub max_amount: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RewardRule {
    pub id: i64,
    pub campaign_id: i64,
    pub reward_config_id: i64,
    pub reward_goal: i64,
    pub reward_slug: String,
    /// Refund window in days; zero issues rewards immediately.
    pub allocation_window: i32,
    pub reward_cap: Option<i32>,
}

/// A campaign with the rules needed to process earn.
#[derive(Debug, Clone)]
pub struct CampaignWithRules {
    pub campaign: Campaign,
    pub earn_rule: Option<EarnRule>,
    pub reward_rule: Option<RewardRule>,
}

impl CampaignWithRules {
    /// A draft with a reward rule and at least one earn rule can go live.
    pub fn is_activable(&self) -> bool {
        self.campaign.status == CampaignStatus::Draft
            && self.reward_rule.is_some()
            && self.earn_rule.is_some()
    }
}

/// What to do with pending rewards when a campaign ends or is cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingRewardAction {
    #[default]
    Remove,
    Convert,
}

/// What to do with pending rewards when a campaign is migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingRewardMigrationAction {
    Transfer,
    Convert,
    Remove,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityMetadata {
    pub sso_username: String,
}

/// Body of `POST /{retailer_slug}/status-change`.
#[derive(Debug, Clone)]
pub struct CampaignStatusChangeRequest {
    pub requested_status: CampaignStatus,
    pub activity_metadata: ActivityMetadata,
    pub campaign_slug: String,
    pub pending_rewards_action: PendingRewardAction,
}

impl FromPayload for CampaignStatusChangeRequest {
    fn from_payload(value: &Value) -> Result<Self, AppError> {
        let mut reader = FieldReader::new(value)?;
        let requested_status = reader.parse("requested_status");
        let activity_metadata = reader.parse("activity_metadata");
        let campaign_slug = reader.string("campaign_slug");
        let pending_rewards_action = reader.parse_or_default("pending_rewards_action");

        let built = (|| {
            Some(Self {
                requested_status: requested_status?,
                activity_metadata: activity_metadata?,
                campaign_slug: campaign_slug?,
                pending_rewards_action: pending_rewards_action?,
            })
        })();
        reader.finish(built)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceAction {
    pub transfer: bool,
    /// Percentage of the old balance carried over, 1..=100.
    pub conversion_rate: i64,
    /// Percentage of the old reward goal a balance must reach to qualify, 0..=100.
    pub qualifying_threshold: i64,
}

impl BalanceAction {
    fn is_valid(&self) -> bool {
        (1..=100).contains(&self.conversion_rate) && (0..=100).contains(&self.qualifying_threshold)
    }
}

/// Body of `POST /{retailer_slug}/migration`.
#[derive(Debug, Clone)]
pub struct CampaignMigrationRequest {
    pub from_campaign: String,
    pub to_campaign: String,
    pub activity_metadata: ActivityMetadata,
    pub balance_action: BalanceAction,
    pub pending_rewards_action: PendingRewardMigrationAction,
}

impl FromPayload for CampaignMigrationRequest {
    fn from_payload(value: &Value) -> Result<Self, AppError> {
        let mut reader = FieldReader::new(value)?;
        let from_campaign = reader.string("from_campaign");
        let to_campaign = reader.string("to_campaign");
        let activity_metadata = reader.parse("activity_metadata");
        let balance_action = reader
            .parse::<BalanceAction>("balance_action")
            .filter(BalanceAction::is_valid);
        if balance_action.is_none() {
            reader.fail("balance_action");
        }
        let pending_rewards_action = reader.parse("pending_rewards_action");

        let built = (|| {
            Some(Self {
                from_campaign: from_campaign?,
                to_campaign: to_campaign?,
                activity_metadata: activity_metadata?,
                balance_action: balance_action?,
                pending_rewards_action: pending_rewards_action?,
            })
        })();
        reader.finish(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn campaign(status: CampaignStatus) -> Campaign {
        Campaign {
            id: 1,
            status,
            name: "Spring".into(),
            slug: "spring".into(),
            reward_config_id: 1,
            retailer_id: 1,
            loyalty_type: LoyaltyType::Accumulator,
            start_date: None,
            end_date: None,
        }
    }

    #[test]
    fn only_documented_transitions_are_valid() {
        use CampaignStatus::*;
        assert!(Active.is_valid_transition_from(Draft));
        assert!(Ended.is_valid_transition_from(Active));
        assert!(Cancelled.is_valid_transition_from(Active));

        assert!(!Active.is_valid_transition_from(Active));
        assert!(!Ended.is_valid_transition_from(Draft));
        assert!(!Active.is_valid_transition_from(Ended));
        assert!(!Draft.is_valid_transition_from(Cancelled));
    }

    #[test]
    fn active_window_is_half_open() {
        let now = Utc::now();
        let mut c = campaign(CampaignStatus::Active);
        assert!(!c.is_active_at(now), "no start date");

        c.start_date = Some(now - Duration::minutes(5));
        assert!(c.is_active_at(now));

        c.end_date = Some(now);
        assert!(!c.is_active_at(now), "end date is exclusive");

        c.end_date = Some(now + Duration::days(1));
        c.status = CampaignStatus::Draft;
        assert!(!c.is_active_at(now));
    }

    #[test]
    fn activable_needs_both_rules_and_draft_status() {
        let rules = CampaignWithRules {
            campaign: campaign(CampaignStatus::Draft),
            earn_rule: Some(EarnRule {
                id: 1,
                campaign_id: 1,
                threshold: 500,
                increment: None,
                multiplier_hundredths: 100,
                max_amount: 0,
            }),
            reward_rule: None,
        };
        assert!(!rules.is_activable());

        let rules = CampaignWithRules {
            reward_rule: Some(RewardRule {
                id: 1,
                campaign_id: 1,
                reward_config_id: 1,
                reward_goal: 1000,
                reward_slug: "10percentoff".into(),
                allocation_window: 0,
                reward_cap: None,
            }),
            ..rules
        };
        assert!(rules.is_activable());
    }

    #[test]
    fn status_change_request_defaults_to_remove() {
        let request = CampaignStatusChangeRequest::from_payload(&serde_json::json!({
            "requested_status": "ended",
            "activity_metadata": {"sso_username": "ops"},
            "campaign_slug": " spring ",
        }))
        .unwrap();
        assert_eq!(request.requested_status, CampaignStatus::Ended);
        assert_eq!(request.campaign_slug, "spring");
        assert_eq!(request.pending_rewards_action, PendingRewardAction::Remove);
    }

    #[test]
    fn status_change_request_reports_bad_fields() {
        let err = CampaignStatusChangeRequest::from_payload(&serde_json::json!({
            "requested_status": "paused",
            "activity_metadata": {"sso_username": "ops"},
            "campaign_slug": "",
        }))
        .unwrap_err();
        match err {
            AppError::FieldValidation(fields) => {
                assert_eq!(fields, vec!["requested_status", "campaign_slug"])
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn migration_request_bounds_balance_action() {
        let body = |rate: i64| {
            serde_json::json!({
                "from_campaign": "old",
                "to_campaign": "new",
                "activity_metadata": {"sso_username": "ops"},
                "balance_action": {"transfer": true, "conversion_rate": rate, "qualifying_threshold": 50},
                "pending_rewards_action": "transfer",
            })
        };
        let request = CampaignMigrationRequest::from_payload(&body(100)).unwrap();
        assert_eq!(
            request.pending_rewards_action,
            PendingRewardMigrationAction::Transfer
        );
        assert!(CampaignMigrationRequest::from_payload(&body(0)).is_err());
    }
}
