//! Retailer, store and reward configuration models.
//!
//! A retailer carries two YAML documents:
//! - `profile_config` lists the enrolment credentials and whether each is required
//! - `marketing_preference_config` lists the marketing questions and their value types

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "retailer_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetailerStatus {
    Test,
    Active,
    Inactive,
    Deleted,
    Archived,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Retailer {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub account_number_prefix: String,
    pub account_number_length: i32,
    pub profile_config: String,
    pub marketing_preference_config: String,
    pub loyalty_name: String,
    pub status: RetailerStatus,
    /// Days between balance resets. Balances never reset when unset.
    pub balance_lifespan: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Per-field options of a retailer profile configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ProfileFieldConfig {
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Value types a marketing question may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketingFieldType {
    Boolean,
    String,
    Integer,
    Float,
    StringList,
    Date,
    Datetime,
    Timestamp,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MarketingFieldConfig {
    #[serde(rename = "type")]
    pub field_type: MarketingFieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

pub type ProfileConfig = BTreeMap<String, ProfileFieldConfig>;
pub type MarketingConfig = BTreeMap<String, MarketingFieldConfig>;

impl Retailer {
    pub fn is_test(&self) -> bool {
        self.status == RetailerStatus::Test
    }

    /// Parsed `profile_config`. A field declared with no options is optional.
    pub fn profile_config(&self) -> Result<ProfileConfig, AppError> {
        parse_profile_config(&self.profile_config)
    }

    /// Parsed `marketing_preference_config`. An empty document means no questions.
    pub fn marketing_config(&self) -> Result<MarketingConfig, AppError> {
        parse_marketing_config(&self.marketing_preference_config)
    }
}

pub fn parse_profile_config(raw: &str) -> Result<ProfileConfig, AppError> {
    let parsed: BTreeMap<String, Option<ProfileFieldConfig>> = serde_yaml::from_str(raw)
        .map_err(|e| AppError::Configuration(format!("profile_config: {e}")))?;
    Ok(parsed
        .into_iter()
        .map(|(field, options)| (field, options.unwrap_or_default()))
        .collect())
}

pub fn parse_marketing_config(raw: &str) -> Result<MarketingConfig, AppError> {
    if raw.trim().is_empty() {
        return Ok(MarketingConfig::new());
    }
    serde_yaml::from_str(raw)
        .map_err(|e| AppError::Configuration(format!("marketing_preference_config: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reward_config_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardConfigStatus {
    Active,
    Cancelled,
    Ended,
}

/// Reward template of a retailer, bound to the fetch type that supplies codes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RewardConfig {
    pub id: i64,
    pub reward_slug: String,
    pub retailer_id: i64,
    pub fetch_type_id: i64,
    pub status: RewardConfigStatus,
    pub required_fields_values: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RequiredFieldsValues {
    validity_days: Option<i64>,
}

impl RewardConfig {
    /// `validity_days` from `required_fields_values`, if configured.
    pub fn validity_days(&self) -> Result<Option<i64>, AppError> {
        match self.required_fields_values.as_deref() {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => serde_yaml::from_str::<RequiredFieldsValues>(raw)
                .map(|values| values.validity_days)
                .map_err(|e| AppError::Configuration(format!("required_fields_values: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_config_fields_default_to_optional() {
        let config = parse_profile_config(
            "email:\n  required: true\nfirst_name:\n  required: true\nphone:\ncustom:\n  required: false\n",
        )
        .unwrap();
        assert!(config["email"].required);
        assert!(config["first_name"].required);
        assert!(!config["phone"].required);
        assert!(!config["custom"].required);
    }

    #[test]
    fn marketing_config_reads_types_and_labels() {
        let config = parse_marketing_config(
            "marketing_pref:\n  type: boolean\n  label: Sample Question?\nfavourites:\n  type: string_list\n",
        )
        .unwrap();
        assert_eq!(config["marketing_pref"].field_type, MarketingFieldType::Boolean);
        assert_eq!(config["marketing_pref"].label.as_deref(), Some("Sample Question?"));
        assert_eq!(config["favourites"].field_type, MarketingFieldType::StringList);
        assert!(parse_marketing_config("  ").unwrap().is_empty());
    }

    #[test]
    fn unknown_marketing_type_is_a_configuration_error() {
        let err = parse_marketing_config("pref:\n  type: colour\n").unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn validity_days_comes_from_required_fields_values() {
        let mut config = RewardConfig {
            id: 1,
            reward_slug: "10percentoff".into(),
            retailer_id: 1,
            fetch_type_id: 1,
            status: RewardConfigStatus::Active,
            required_fields_values: Some("validity_days: 30".into()),
        };
        assert_eq!(config.validity_days().unwrap(), Some(30));

        config.required_fields_values = None;
        assert_eq!(config.validity_days().unwrap(), None);
    }
}
