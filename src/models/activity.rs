//! Activity events.
//!
//! Activities are the audit trail of the platform: one row per business event,
//! with a human readable summary and a type-specific `data` document.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    TxHistory,
    TxImport,
    RefundNotRecouped,
    BalanceChange,
    RewardStatus,
    RewardUpdate,
    AccountRequest,
    AccountEnrolment,
    AccountAuthentication,
    AccountView,
    AccountChange,
    Campaign,
    CampaignMigration,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::TxHistory => "TX_HISTORY",
            ActivityType::TxImport => "TX_IMPORT",
            ActivityType::RefundNotRecouped => "REFUND_NOT_RECOUPED",
            ActivityType::BalanceChange => "BALANCE_CHANGE",
            ActivityType::RewardStatus => "REWARD_STATUS",
            ActivityType::RewardUpdate => "REWARD_UPDATE",
            ActivityType::AccountRequest => "ACCOUNT_REQUEST",
            ActivityType::AccountEnrolment => "ACCOUNT_ENROLMENT",
            ActivityType::AccountAuthentication => "ACCOUNT_AUTHENTICATION",
            ActivityType::AccountView => "ACCOUNT_VIEW",
            ActivityType::AccountChange => "ACCOUNT_CHANGE",
            ActivityType::Campaign => "CAMPAIGN",
            ActivityType::CampaignMigration => "CAMPAIGN_MIGRATION",
        }
    }
}

/// Activity payload.
///
/// # JSON Example
///
/// ```json
/// {
///   "type": "BALANCE_CHANGE",
///   "datetime": "2024-03-01T10:00:01Z",
///   "underlying_datetime": "2024-03-01T10:00:00Z",
///   "summary": "Test Retailer - Spring: +£5.00",
///   "reasons": ["Purchase transaction id: tx-1"],
///   "activity_identifier": "N/A",
///   "user_id": "9f2b5c3e-7a43-4a57-8a38-2ad83f8cb8e4",
///   "associated_value": "500",
///   "retailer": "test-retailer",
///   "campaigns": ["spring"],
///   "data": {"new_balance": 500, "original_balance": 0}
/// }
/// ```
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub datetime: DateTime<Utc>,
    pub underlying_datetime: DateTime<Utc>,
    pub summary: String,
    pub reasons: Vec<String>,
    pub activity_identifier: String,
    pub user_id: Option<String>,
    pub associated_value: String,
    pub retailer: String,
    pub campaigns: Vec<String>,
    pub data: Value,
}

impl Activity {
    pub fn new(
        activity_type: ActivityType,
        underlying_datetime: DateTime<Utc>,
        summary: impl Into<String>,
        associated_value: impl Into<String>,
        retailer_slug: impl Into<String>,
    ) -> Self {
        Self {
            activity_type,
            datetime: Utc::now(),
            underlying_datetime,
            summary: summary.into(),
            reasons: Vec::new(),
            activity_identifier: "N/A".to_string(),
            user_id: None,
            associated_value: associated_value.into(),
            retailer: retailer_slug.into(),
            campaigns: Vec::new(),
            data: Value::Object(Default::default()),
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    pub fn user(mut self, user_id: impl ToString) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.activity_identifier = identifier.into();
        self
    }

    pub fn campaigns<I, S>(mut self, campaigns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.campaigns = campaigns.into_iter().map(Into::into).collect();
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}
