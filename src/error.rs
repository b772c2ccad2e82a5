//! Error types and HTTP error response handling.
//!
//! Every API error is rendered as the same JSON body:
//!
//! ```json
//! {
//!   "display_message": "Requested retailer is invalid.",
//!   "code": "INVALID_RETAILER"
//! }
//! ```
//!
//! Some codes carry a `fields` list (validation errors) or a `campaigns` list
//! (campaign operations naming the offending slugs).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Business error codes shared by all cosmos APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoAccountFound,
    AccountExists,
    UserNotFound,
    UserNotActive,
    InvalidTxDate,
    NoActiveCampaigns,
    DuplicateTransaction,
    InvalidRetailer,
    InactiveRetailer,
    NoRewardFound,
    InvalidRequest,
    InvalidStatusRequested,
    MissingCampaignComponents,
    NoCampaignFound,
    InvalidToken,
    HeaderValidationError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoAccountFound => "NO_ACCOUNT_FOUND",
            ErrorCode::AccountExists => "ACCOUNT_EXISTS",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::UserNotActive => "USER_NOT_ACTIVE",
            ErrorCode::InvalidTxDate => "INVALID_TX_DATE",
            ErrorCode::NoActiveCampaigns => "NO_ACTIVE_CAMPAIGNS",
            ErrorCode::DuplicateTransaction => "DUPLICATE_TRANSACTION",
            ErrorCode::InvalidRetailer => "INVALID_RETAILER",
            ErrorCode::InactiveRetailer => "INACTIVE_RETAILER",
            ErrorCode::NoRewardFound => "NO_REWARD_FOUND",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InvalidStatusRequested => "INVALID_STATUS_REQUESTED",
            ErrorCode::MissingCampaignComponents => "MISSING_CAMPAIGN_COMPONENTS",
            ErrorCode::NoCampaignFound => "NO_CAMPAIGN_FOUND",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::HeaderValidationError => "HEADER_VALIDATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::NoAccountFound
            | ErrorCode::UserNotFound
            | ErrorCode::NoActiveCampaigns
            | ErrorCode::InactiveRetailer
            | ErrorCode::NoRewardFound
            | ErrorCode::InvalidRequest
            | ErrorCode::NoCampaignFound => StatusCode::NOT_FOUND,
            ErrorCode::AccountExists
            | ErrorCode::UserNotActive
            | ErrorCode::DuplicateTransaction
            | ErrorCode::InvalidStatusRequested
            | ErrorCode::MissingCampaignComponents => StatusCode::CONFLICT,
            ErrorCode::InvalidTxDate | ErrorCode::HeaderValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidRetailer => StatusCode::FORBIDDEN,
            ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn display_message(&self) -> &'static str {
        match self {
            ErrorCode::NoAccountFound => "Account not found for provided credentials.",
            ErrorCode::AccountExists => "It appears this account already exists.",
            ErrorCode::UserNotFound => "Unknown User.",
            ErrorCode::UserNotActive => "User Account not Active.",
            ErrorCode::InvalidTxDate => "Transaction dated before user join.",
            ErrorCode::NoActiveCampaigns => "No active campaigns found for retailer.",
            ErrorCode::DuplicateTransaction => "Duplicate Transaction.",
            ErrorCode::InvalidRetailer => "Requested retailer is invalid.",
            ErrorCode::InactiveRetailer => "Retailer is in an inactive state.",
            ErrorCode::NoRewardFound => "Reward not found.",
            ErrorCode::InvalidRequest => "Request is invalid",
            ErrorCode::InvalidStatusRequested => {
                "The requested status change could not be performed."
            }
            ErrorCode::MissingCampaignComponents => "the provided campaign could not be made active",
            ErrorCode::NoCampaignFound => "Campaign not found for provided slug.",
            ErrorCode::InvalidToken => "Supplied token is invalid.",
            ErrorCode::HeaderValidationError => "Submitted headers are missing or invalid.",
            ErrorCode::InternalError => {
                "An unexpected system error occurred, please try again later."
            }
        }
    }

    fn fields(&self) -> Option<Vec<String>> {
        match self {
            ErrorCode::AccountExists => Some(vec!["email".to_string()]),
            ErrorCode::HeaderValidationError => Some(vec!["bpl-user-channel".to_string()]),
            _ => None,
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize, PartialEq)]
pub struct ErrorBody {
    pub display_message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaigns: Option<Vec<String>>,
}

impl ErrorBody {
    fn from_code(code: ErrorCode) -> Self {
        Self {
            display_message: code.display_message().to_string(),
            code: code.as_str().to_string(),
            fields: code.fields(),
            campaigns: None,
        }
    }
}

/// Application-wide error type.
///
/// Business rule violations travel as [`AppError::Code`]. Infrastructure
/// failures (database, serialization, bad stored configuration) become a
/// generic `INTERNAL_ERROR` response and are logged with their detail.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A documented business error.
    #[error("{}", .0.display_message())]
    Code(ErrorCode),

    /// Payload parsed but one or more fields are missing or invalid.
    ///
    /// Returns HTTP 422 with the offending field names.
    #[error("Submitted fields are missing or invalid: {0:?}")]
    FieldValidation(Vec<String>),

    /// Body is not valid JSON.
    #[error("Malformed request")]
    MalformedRequest,

    /// Several campaign checks failed at once, each naming its campaign slugs.
    #[error("Campaign checks failed")]
    Campaigns {
        status: StatusCode,
        errors: Vec<(ErrorCode, Vec<String>)>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Retailer or reward configuration stored in the database is unusable.
    #[error("Invalid stored configuration: {0}")]
    Configuration(String),

    /// An outbound HTTP call made by a task did not succeed.
    #[error("Outbound request failed: {0}")]
    Outbound(String),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Outbound(err.to_string())
    }
}

impl From<ErrorCode> for AppError {
    fn from(code: ErrorCode) -> Self {
        AppError::Code(code)
    }
}

impl AppError {
    /// Business code carried by this error, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AppError::Code(code) => Some(*code),
            _ => None,
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Status Code Mapping
///
/// - `Code` → the status attached to the error code
/// - `FieldValidation` → 422 Unprocessable Entity
/// - `MalformedRequest` → 400 Bad Request
/// - `Campaigns` → the status chosen by the campaign service, with a list body
/// - everything else → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Code(code) => (code.status(), Json(ErrorBody::from_code(code))).into_response(),
            AppError::FieldValidation(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorBody {
                    display_message: "Submitted fields are missing or invalid.".to_string(),
                    code: "FIELD_VALIDATION_ERROR".to_string(),
                    fields: Some(fields),
                    campaigns: None,
                }),
            )
                .into_response(),
            AppError::MalformedRequest => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    display_message: "Malformed request.".to_string(),
                    code: "MALFORMED_REQUEST".to_string(),
                    fields: None,
                    campaigns: None,
                }),
            )
                .into_response(),
            AppError::Campaigns { status, errors } => {
                let body: Vec<ErrorBody> = errors
                    .into_iter()
                    .map(|(code, campaigns)| ErrorBody {
                        campaigns: Some(campaigns),
                        ..ErrorBody::from_code(code)
                    })
                    .collect();
                (status, Json(body)).into_response()
            }
            other => {
                tracing::error!(error = %other, "Unexpected System Error");
                let code = ErrorCode::InternalError;
                (code.status(), Json(ErrorBody::from_code(code))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_exists_names_the_email_field() {
        let body = ErrorBody::from_code(ErrorCode::AccountExists);
        assert_eq!(body.code, "ACCOUNT_EXISTS");
        assert_eq!(body.fields, Some(vec!["email".to_string()]));
        assert_eq!(ErrorCode::AccountExists.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn status_codes_follow_the_error_table() {
        assert_eq!(ErrorCode::InvalidRetailer.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::InvalidTxDate.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::InvalidRequest.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::MissingCampaignComponents.status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn infrastructure_errors_hide_their_detail() {
        let response = AppError::Configuration("bad yaml".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = AppError::FieldValidation(vec!["id".into()]).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn error_body_omits_empty_optional_lists() {
        let json = serde_json::to_value(ErrorBody::from_code(ErrorCode::UserNotFound)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"display_message": "Unknown User.", "code": "USER_NOT_FOUND"})
        );
    }
}
