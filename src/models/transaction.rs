//! Transaction data models and API request types.
//!
//! This module defines:
//! - `Transaction`: a purchase or refund reported by a retailer
//! - `CreateTransactionRequest`: request body of the transactions API
//! - `TransactionEarn`: what each campaign awarded for a transaction

use crate::{
    error::AppError,
    models::campaign::LoyaltyType,
    payload::{FieldReader, FromPayload},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

/// Represents a transaction record from the database.
///
/// Amounts are stored in pence; a negative amount is a refund.
/// Duplicates are stored too, with `processed` left NULL.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub account_holder_id: i64,
    pub retailer_id: i64,
    pub transaction_id: String,
    pub amount: i64,
    pub mid: String,
    pub datetime: DateTime<Utc>,
    pub payment_transaction_id: Option<String>,
    pub processed: Option<bool>,
}

impl Transaction {
    pub fn is_refund(&self) -> bool {
        self.amount < 0
    }
}

/// Request to process a transaction.
///
/// # JSON Example
///
/// ```json
/// {
///   "id": "BPL1234567890",
///   "transaction_id": "payment-0001",
///   "transaction_total": 1250,
///   "datetime": 1700000000.0,
///   "MID": "mid-1",
///   "loyalty_id": "9f2b5c3e-7a43-4a57-8a38-2ad83f8cb8e4"
/// }
/// ```
///
/// # Validation
///
/// - String fields are trimmed and must not be empty
/// - `transaction_total` must be an integer number of pence
/// - `datetime` is a unix timestamp in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTransactionRequest {
    pub transaction_id: String,
    pub payment_transaction_id: String,
    pub amount: i64,
    pub datetime: DateTime<Utc>,
    pub mid: String,
    pub account_holder_uuid: Uuid,
}

impl FromPayload for CreateTransactionRequest {
    fn from_payload(value: &Value) -> Result<Self, AppError> {
        let mut reader = FieldReader::new(value)?;
        let transaction_id = reader.bounded_string("id", 128);
        let payment_transaction_id = reader.bounded_string("transaction_id", 128);
        let amount = reader.strict_int("transaction_total");
        let datetime = reader.number("datetime").and_then(timestamp_to_utc);
        if datetime.is_none() {
            reader.fail("datetime");
        }
        let mid = reader.bounded_string("MID", 128);
        let account_holder_uuid = reader.uuid("loyalty_id");

        let built = (|| {
            Some(Self {
                transaction_id: transaction_id?,
                payment_transaction_id: payment_transaction_id?,
                amount: amount?,
                datetime: datetime?,
                mid: mid?,
                account_holder_uuid: account_holder_uuid?,
            })
        })();
        reader.finish(built)
    }
}

impl CreateTransactionRequest {
    /// Payload echoed into the TX_IMPORT activity.
    pub fn to_activity_data(&self) -> Value {
        json!({
            "transaction_id": self.transaction_id,
            "payment_transaction_id": self.payment_transaction_id,
            "amount": self.amount,
            "transaction_datetime": self.datetime,
            "mid": self.mid,
            "account_holder_uuid": self.account_holder_uuid,
        })
    }
}

fn timestamp_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

/// Earn recorded against a transaction for one campaign.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionEarn {
    pub id: i64,
    pub transaction_id: i64,
    pub loyalty_type: LoyaltyType,
    pub earn_amount: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> Value {
        json!({
            "id": " tx-1 ",
            "transaction_id": "payment-1",
            "transaction_total": 1250,
            "datetime": 1_700_000_000.5,
            "MID": "mid-1",
            "loyalty_id": "9f2b5c3e-7a43-4a57-8a38-2ad83f8cb8e4",
        })
    }

    #[test]
    fn reads_aliased_fields() {
        let request = CreateTransactionRequest::from_payload(&body()).unwrap();
        assert_eq!(request.transaction_id, "tx-1");
        assert_eq!(request.payment_transaction_id, "payment-1");
        assert_eq!(request.amount, 1250);
        assert_eq!(request.mid, "mid-1");
        assert_eq!(request.datetime.timestamp(), 1_700_000_000);
        assert_eq!(request.datetime.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn float_totals_are_rejected() {
        let mut body = body();
        body["transaction_total"] = json!(12.5);
        body["loyalty_id"] = json!("not-a-uuid");
        match CreateTransactionRequest::from_payload(&body).unwrap_err() {
            AppError::FieldValidation(fields) => {
                assert_eq!(fields, vec!["transaction_total", "loyalty_id"])
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn negative_totals_are_refunds() {
        let mut body = body();
        body["transaction_total"] = json!(-500);
        let request = CreateTransactionRequest::from_payload(&body).unwrap();
        assert_eq!(request.amount, -500);
    }
}
