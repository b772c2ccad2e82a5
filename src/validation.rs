//! Enrolment payload validation.
//!
//! Which credentials an enrolment must carry is decided per retailer by its
//! `profile_config`, and which marketing questions must be answered by its
//! `marketing_preference_config`. Both are only known at request time, so the
//! request is first read loosely into [`EnrolmentRequest`] and then checked
//! against the retailer's configuration here.

use crate::{
    error::AppError,
    models::{
        account_holder::{
            GetByCredentialsRequest, MarketingPreferenceData, MarketingPreferenceValueType,
            ProfileData, UpdateStatusRequest,
        },
        retailer::{MarketingConfig, MarketingFieldType, ProfileConfig},
    },
    payload::{FieldReader, FromPayload},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z\-\x{00C0}-\x{00FF}']+\s*){1,4}$").expect("Invalid Regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:0|\+?44)(?:\d-?\s?){9,15}$").expect("Invalid Regex"));
static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9#.,;:+\-&' ]){1,100}$").expect("Invalid Regex"));
static POSTCODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Ha-hJ-Yj-y]?[0-9][A-Za-z0-9]? ?[0-9][A-Za-z]{2}|[Gg][Ii][Rr] ?0[Aa]{2})$")
        .expect("Invalid Regex")
});
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("Invalid Regex")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn is_valid_name(name: &str) -> bool {
    (1..=100).contains(&name.chars().count()) && NAME_RE.is_match(name)
}

/// A `{key, value}` answer to a marketing question.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MarketingPreferenceInput {
    pub key: String,
    pub value: Value,
}

/// Body of `POST /{retailer_slug}/accounts/enrolment`.
///
/// # JSON Example
///
/// ```json
/// {
///   "credentials": {
///     "email": "jane@example.com",
///     "first_name": "Jane",
///     "last_name": "Doe"
///   },
///   "marketing_preferences": [{"key": "marketing_pref", "value": true}],
///   "callback_url": "https://example.com/enrol/callback",
///   "third_party_identifier": "ext-0001"
/// }
/// ```
#[derive(Debug, Clone)]
pub struct EnrolmentRequest {
    pub credentials: Map<String, Value>,
    pub marketing_preferences: Vec<MarketingPreferenceInput>,
    pub callback_url: String,
    pub third_party_identifier: String,
}

impl FromPayload for EnrolmentRequest {
    fn from_payload(value: &Value) -> Result<Self, AppError> {
        let mut reader = FieldReader::new(value)?;
        let credentials = reader.parse("credentials");
        let marketing_preferences = reader.parse("marketing_preferences");
        let callback_url = reader.raw("callback_url").and_then(Value::as_str).map(str::to_string);
        if callback_url.is_none() {
            reader.fail("callback_url");
        }
        let third_party_identifier = reader.bounded_string("third_party_identifier", 200);

        let built = (|| {
            Some(Self {
                credentials: credentials?,
                marketing_preferences: marketing_preferences?,
                callback_url: callback_url?,
                third_party_identifier: third_party_identifier?,
            })
        })();
        reader.finish(built)
    }
}

impl EnrolmentRequest {
    /// Email as submitted, before validation.
    pub fn raw_email(&self) -> &str {
        self.credentials
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

impl FromPayload for GetByCredentialsRequest {
    fn from_payload(value: &Value) -> Result<Self, AppError> {
        let mut reader = FieldReader::new(value)?;
        let email = reader.string("email").filter(|email| is_valid_email(email));
        if email.is_none() {
            reader.fail("email");
        }
        let account_number = reader.raw("account_number").and_then(Value::as_str).map(str::to_string);
        if account_number.is_none() {
            reader.fail("account_number");
        }

        let built = email.zip(account_number).map(|(email, account_number)| Self {
            email,
            account_number,
        });
        reader.finish(built)
    }
}

impl FromPayload for UpdateStatusRequest {
    fn from_payload(value: &Value) -> Result<Self, AppError> {
        let mut reader = FieldReader::new(value)?;
        let status = reader.parse("status");
        reader.finish(status.map(|status| Self { status }))
    }
}

/// Credentials after validation: the lowercased email plus profile columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCredentials {
    pub email: String,
    pub profile: ProfileData,
}

/// Check credentials against a retailer's profile configuration.
///
/// Fields missing from the configuration are dropped. Configured fields with
/// no dedicated validator must be strings.
///
/// # Errors
///
/// `FieldValidation` naming every missing or invalid field.
pub fn validate_credentials(
    credentials: &Map<String, Value>,
    config: &ProfileConfig,
) -> Result<ValidatedCredentials, AppError> {
    let mut errors = Vec::new();
    let mut email = None;
    let mut profile = ProfileData::default();

    for (field, options) in config {
        let value = match credentials.get(field).filter(|v| !v.is_null()) {
            Some(value) => value,
            None => {
                if options.required || field == "email" {
                    errors.push(field.clone());
                }
                continue;
            }
        };
        let Some(raw) = value.as_str() else {
            errors.push(field.clone());
            continue;
        };

        let valid = match field.as_str() {
            "email" => {
                let ok = is_valid_email(raw.trim());
                email = ok.then(|| raw.trim().to_lowercase());
                ok
            }
            "first_name" | "last_name" => {
                let ok = is_valid_name(raw);
                if ok {
                    if field == "first_name" {
                        profile.first_name = raw.to_string();
                    } else {
                        profile.last_name = raw.to_string();
                    }
                }
                ok
            }
            "date_of_birth" => match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(date) => {
                    profile.date_of_birth = Some(date);
                    true
                }
                Err(_) => false,
            },
            "phone" => {
                let ok = PHONE_RE.is_match(raw);
                profile.phone = ok.then(|| raw.to_string());
                ok
            }
            "address_line1" | "address_line2" | "city" => {
                let trimmed = raw.trim();
                let ok = ADDRESS_RE.is_match(trimmed);
                let slot = match field.as_str() {
                    "address_line1" => &mut profile.address_line1,
                    "address_line2" => &mut profile.address_line2,
                    _ => &mut profile.city,
                };
                *slot = ok.then(|| trimmed.to_string());
                ok
            }
            "postcode" => {
                let ok = POSTCODE_RE.is_match(raw);
                profile.postcode = ok.then(|| raw.to_string());
                ok
            }
            "custom" => {
                let trimmed = raw.trim();
                profile.custom = (!trimmed.is_empty()).then(|| trimmed.to_string());
                !trimmed.is_empty()
            }
            _ => true,
        };
        if !valid {
            errors.push(field.clone());
        }
    }

    match email {
        Some(email) if errors.is_empty() => Ok(ValidatedCredentials { email, profile }),
        _ => {
            if errors.is_empty() {
                errors.push("email".to_string());
            }
            Err(AppError::FieldValidation(errors))
        }
    }
}

/// Check marketing answers against a retailer's marketing configuration.
///
/// Every configured question must be answered with a value of its declared
/// type. Answers to unknown questions are ignored. Values are stored as
/// strings: booleans as `True`/`False`, string lists joined with `", "`.
///
/// # Errors
///
/// `FieldValidation` naming every missing or mistyped question.
pub fn validate_marketing_preferences(
    preferences: &[MarketingPreferenceInput],
    config: &MarketingConfig,
) -> Result<Vec<MarketingPreferenceData>, AppError> {
    let mut errors = Vec::new();
    let mut validated = Vec::with_capacity(config.len());

    for (key, options) in config {
        // the last answer for a key wins
        let answer = preferences.iter().rev().find(|p| &p.key == key);
        match answer.and_then(|p| marketing_value(options.field_type, &p.value)) {
            Some(value) => validated.push(MarketingPreferenceData {
                key_name: key.clone(),
                value,
                value_type: MarketingPreferenceValueType::from(options.field_type),
            }),
            None => errors.push(key.clone()),
        }
    }

    if errors.is_empty() {
        Ok(validated)
    } else {
        Err(AppError::FieldValidation(errors))
    }
}

fn marketing_value(field_type: MarketingFieldType, value: &Value) -> Option<String> {
    match (field_type, value) {
        (MarketingFieldType::Boolean, Value::Bool(b)) => {
            Some(if *b { "True" } else { "False" }.to_string())
        }
        (MarketingFieldType::String, Value::String(s)) => Some(s.clone()),
        (MarketingFieldType::Integer | MarketingFieldType::Timestamp, Value::Number(n)) => {
            n.as_i64().map(|i| i.to_string())
        }
        (MarketingFieldType::Float, Value::Number(n)) if n.is_f64() => {
            n.as_f64().map(|f| format!("{f:?}"))
        }
        (MarketingFieldType::StringList, Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|items| items.join(", ")),
        (MarketingFieldType::Date, Value::String(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .map(|date| date.to_string()),
        (MarketingFieldType::Datetime, Value::String(s)) => parse_datetime(s),
        _ => None,
    }
}

/// RFC 3339 or naive ISO-8601; naive values are taken as UTC.
fn parse_datetime(raw: &str) -> Option<String> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc().fixed_offset())
        })
        .ok()?;
    Some(parsed.format("%Y-%m-%d %H:%M:%S%:z").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::retailer::{parse_marketing_config, parse_profile_config};
    use serde_json::json;

    fn profile_config() -> ProfileConfig {
        parse_profile_config(
            "email:\n  required: true\nfirst_name:\n  required: true\nlast_name:\n  required: true\n\
             phone:\n  required: false\npostcode:\n  required: false\naddress_line1:\n  required: false\n",
        )
        .unwrap()
    }

    fn credentials(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn valid_credentials_are_normalised() {
        let validated = validate_credentials(
            &credentials(json!({
                "email": "Jane.Doe@Example.COM",
                "first_name": "Jane",
                "last_name": "O'Brien-Smith",
                "phone": "+447700900123",
                "postcode": "SW1A 1AA",
                "address_line1": "  1 High Street ",
                "unconfigured": "dropped",
            })),
            &profile_config(),
        )
        .unwrap();
        assert_eq!(validated.email, "jane.doe@example.com");
        assert_eq!(validated.profile.last_name, "O'Brien-Smith");
        assert_eq!(validated.profile.address_line1.as_deref(), Some("1 High Street"));
        assert_eq!(validated.profile.postcode.as_deref(), Some("SW1A 1AA"));
    }

    #[test]
    fn reports_missing_and_invalid_fields() {
        let err = validate_credentials(
            &credentials(json!({
                "email": "not-an-email",
                "first_name": "Jane5",
                "phone": "12345",
            })),
            &profile_config(),
        )
        .unwrap_err();
        match err {
            AppError::FieldValidation(mut fields) => {
                fields.sort();
                assert_eq!(fields, vec!["email", "first_name", "last_name", "phone"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn names_allow_up_to_four_words() {
        assert!(is_valid_name("Mary Jane Anne Smith"));
        assert!(!is_valid_name("A B C D E"));
        assert!(is_valid_name("Zoë"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn marketing_values_follow_declared_types() {
        let config = parse_marketing_config(
            "marketing_pref:\n  type: boolean\nfavourites:\n  type: string_list\nscore:\n  type: float\n",
        )
        .unwrap();
        let prefs = vec![
            MarketingPreferenceInput {
                key: "marketing_pref".into(),
                value: json!(false),
            },
            MarketingPreferenceInput {
                key: "favourites".into(),
                value: json!(["tea", "cake"]),
            },
            MarketingPreferenceInput {
                key: "score".into(),
                value: json!(3.0),
            },
        ];
        let validated = validate_marketing_preferences(&prefs, &config).unwrap();
        let values: Vec<_> = validated
            .iter()
            .map(|p| (p.key_name.as_str(), p.value.as_str()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("favourites", "tea, cake"),
                ("marketing_pref", "False"),
                ("score", "3.0"),
            ]
        );
    }

    #[test]
    fn marketing_questions_are_mandatory_and_strict() {
        let config = parse_marketing_config("marketing_pref:\n  type: boolean\nage:\n  type: integer\n").unwrap();
        let prefs = vec![MarketingPreferenceInput {
            key: "marketing_pref".into(),
            value: json!("yes"),
        }];
        match validate_marketing_preferences(&prefs, &config).unwrap_err() {
            AppError::FieldValidation(fields) => assert_eq!(fields, vec!["age", "marketing_pref"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn datetimes_are_stored_with_offset() {
        assert_eq!(
            parse_datetime("2024-03-01T10:00:00Z").as_deref(),
            Some("2024-03-01 10:00:00+00:00")
        );
        assert_eq!(
            parse_datetime("2024-03-01T10:00:00").as_deref(),
            Some("2024-03-01 10:00:00+00:00")
        );
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn enrolment_request_requires_its_envelope() {
        let err = EnrolmentRequest::from_payload(&json!({
            "credentials": {"email": "a@b.com"},
            "marketing_preferences": [],
            "third_party_identifier": "   ",
        }))
        .unwrap_err();
        match err {
            AppError::FieldValidation(fields) => {
                assert_eq!(fields, vec!["callback_url", "third_party_identifier"])
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn get_by_credentials_needs_a_valid_email() {
        let request = GetByCredentialsRequest::from_payload(&json!({
            "email": "jane@example.com",
            "account_number": "RTST1234567890",
        }))
        .unwrap();
        assert_eq!(request.account_number, "RTST1234567890");
        assert!(GetByCredentialsRequest::from_payload(&json!({
            "email": "jane",
            "account_number": "RTST1234567890",
        }))
        .is_err());
    }
}
