//! Account holder data models and API request/response types.
//!
//! This module defines:
//! - `AccountHolder`: a loyalty member of one retailer
//! - `PendingReward`: rewards earned but held back until the refund window closes
//! - `CampaignBalance`, marketing preference and profile rows
//! - The JSON shapes returned by the accounts API

use crate::models::retailer::MarketingFieldType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an account holder.
///
/// New enrolments start `Pending` and become `Active` once the activation
/// task has assigned an account number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_holder_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "lowercase")]
pub enum AccountHolderStatus {
    Pending,
    Active,
    Inactive,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountHolder {
    pub id: i64,
    pub email: String,
    pub status: AccountHolderStatus,
    pub account_number: Option<String>,
    pub account_holder_uuid: Uuid,
    pub opt_out_token: Uuid,
    pub retailer_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Profile columns collected at enrolment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileData {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub postcode: Option<String>,
    pub city: Option<String>,
    pub custom: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(
    type_name = "marketing_preference_value_type",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum MarketingPreferenceValueType {
    Boolean,
    Integer,
    Float,
    String,
    StringList,
    Date,
    Datetime,
}

impl From<MarketingFieldType> for MarketingPreferenceValueType {
    fn from(field_type: MarketingFieldType) -> Self {
        match field_type {
            MarketingFieldType::Boolean => Self::Boolean,
            MarketingFieldType::String => Self::String,
            MarketingFieldType::Integer | MarketingFieldType::Timestamp => Self::Integer,
            MarketingFieldType::Float => Self::Float,
            MarketingFieldType::StringList => Self::StringList,
            MarketingFieldType::Date => Self::Date,
            MarketingFieldType::Datetime => Self::Datetime,
        }
    }
}

impl MarketingPreferenceValueType {
    /// Interpret a stored boolean preference.
    pub fn parse_bool(value: &str) -> bool {
        matches!(
            value.to_ascii_lowercase().as_str(),
            "true" | "1" | "t" | "yes" | "y"
        )
    }
}

/// A marketing preference ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketingPreferenceData {
    pub key_name: String,
    pub value: String,
    pub value_type: MarketingPreferenceValueType,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CampaignBalance {
    pub id: i64,
    pub account_holder_id: i64,
    pub campaign_id: i64,
    pub balance: i64,
}

/// Rewards earned while a campaign's refund window is still open.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PendingReward {
    pub id: i64,
    pub pending_reward_uuid: Uuid,
    pub account_holder_id: i64,
    pub campaign_id: i64,
    pub reward_config_id: i64,
    pub created_date: DateTime<Utc>,
    pub conversion_date: DateTime<Utc>,
    pub value: i64,
    pub count: i32,
    pub total_cost_to_user: i64,
}

impl PendingReward {
    pub fn total_value(&self) -> i64 {
        i64::from(self.count) * self.value
    }

    /// Amount the holder paid beyond the face value of the rewards.
    pub fn slush(&self) -> i64 {
        self.total_cost_to_user - self.total_value()
    }

    pub fn set_slush(&mut self, slush: i64) {
        self.total_cost_to_user = self.total_value() + slush;
    }
}

/// Request body of `POST /{retailer_slug}/accounts/getbycredentials`.
#[derive(Debug, Clone)]
pub struct GetByCredentialsRequest {
    pub email: String,
    pub account_number: String,
}

/// Request body of `PATCH /{retailer_slug}/accounts/{uuid}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AccountHolderStatus,
}

#[derive(Debug, Serialize)]
pub struct AccountHolderStatusResponse {
    pub status: AccountHolderStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CampaignBalanceResponse {
    pub campaign_slug: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransactionHistoryResponse {
    pub datetime: i64,
    pub amount: String,
    pub amount_currency: String,
    pub location: String,
    pub loyalty_earned_value: Option<String>,
    pub loyalty_earned_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AccountRewardResponse {
    pub code: String,
    pub campaign_slug: String,
    pub issued_date: i64,
    pub redeemed_date: Option<i64>,
    pub expiry_date: i64,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingRewardResponse {
    pub created_date: i64,
    pub conversion_date: i64,
    pub campaign_slug: String,
}

/// Account view returned by the accounts API.
///
/// # JSON Example
///
/// ```json
/// {
///   "UUID": "7f6e1c6b-...",
///   "email": "jane@example.com",
///   "status": "active",
///   "account_number": "RTST1234567890",
///   "current_balances": [{"campaign_slug": "spring", "value": 7.5}],
///   "transaction_history": [],
///   "rewards": [],
///   "pending_rewards": []
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AccountHolderResponse {
    #[serde(rename = "UUID")]
    pub account_holder_uuid: Uuid,
    pub email: String,
    pub status: AccountHolderStatus,
    pub account_number: Option<String>,
    pub current_balances: Vec<CampaignBalanceResponse>,
    pub transaction_history: Vec<TransactionHistoryResponse>,
    pub rewards: Vec<AccountRewardResponse>,
    pub pending_rewards: Vec<PendingRewardResponse>,
}
