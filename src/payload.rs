//! Request body extraction with field-level validation errors.
//!
//! Bodies are first parsed as JSON (failure is `MALFORMED_REQUEST`), then each
//! request type reads its fields through a [`FieldReader`] which records every
//! failing field name so the client receives them all in one
//! `FIELD_VALIDATION_ERROR` response.

use crate::error::AppError;
use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Request types that can be built from a parsed JSON body.
pub trait FromPayload: Sized {
    fn from_payload(value: &Value) -> Result<Self, AppError>;
}

/// Axum extractor running [`FromPayload`] on the request body.
#[derive(Debug)]
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    S: Send + Sync,
    T: FromPayload,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|_| AppError::MalformedRequest)?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|_| AppError::MalformedRequest)?;
        T::from_payload(&value).map(Payload)
    }
}

/// Reads fields out of a JSON object, collecting the names of invalid ones.
pub struct FieldReader<'a> {
    object: &'a Map<String, Value>,
    errors: Vec<String>,
}

impl<'a> FieldReader<'a> {
    pub fn new(value: &'a Value) -> Result<Self, AppError> {
        match value {
            Value::Object(object) => Ok(Self {
                object,
                errors: Vec::new(),
            }),
            _ => Err(AppError::FieldValidation(vec!["__root__".to_string()])),
        }
    }

    pub fn raw(&self, key: &str) -> Option<&'a Value> {
        self.object.get(key).filter(|v| !v.is_null())
    }

    pub fn fail(&mut self, key: &str) {
        if !self.errors.iter().any(|e| e == key) {
            self.errors.push(key.to_string());
        }
    }

    /// Required string, whitespace-trimmed, at least one character.
    pub fn string(&mut self, key: &str) -> Option<String> {
        self.bounded_string(key, usize::MAX)
    }

    /// Required trimmed string of 1..=`max` characters.
    pub fn bounded_string(&mut self, key: &str, max: usize) -> Option<String> {
        match self.raw(key).and_then(Value::as_str).map(str::trim) {
            Some(s) if !s.is_empty() && s.chars().count() <= max => Some(s.to_string()),
            _ => {
                self.fail(key);
                None
            }
        }
    }

    /// String that may be absent or null, but must be a string when present.
    pub fn optional_string(&mut self, key: &str) -> Option<String> {
        match self.raw(key) {
            None => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(_) => {
                self.fail(key);
                None
            }
        }
    }

    /// Required integer; floats and numeric strings are rejected.
    pub fn strict_int(&mut self, key: &str) -> Option<i64> {
        match self.raw(key) {
            Some(Value::Number(n)) if n.is_i64() => n.as_i64(),
            _ => {
                self.fail(key);
                None
            }
        }
    }

    /// Required number, integer or float.
    pub fn number(&mut self, key: &str) -> Option<f64> {
        match self.raw(key) {
            Some(Value::Number(n)) => n.as_f64(),
            _ => {
                self.fail(key);
                None
            }
        }
    }

    pub fn uuid(&mut self, key: &str) -> Option<Uuid> {
        let parsed = self
            .raw(key)
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s.trim()).ok());
        if parsed.is_none() {
            self.fail(key);
        }
        parsed
    }

    /// Required field deserialized with serde.
    pub fn parse<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let parsed = self
            .raw(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        if parsed.is_none() {
            self.fail(key);
        }
        parsed
    }

    /// Optional field deserialized with serde, falling back to `T::default()`.
    pub fn parse_or_default<T: DeserializeOwned + Default>(&mut self, key: &str) -> Option<T> {
        match self.raw(key) {
            None => Some(T::default()),
            Some(_) => self.parse(key),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Return the built value, or every recorded field error.
    pub fn finish<T>(self, built: Option<T>) -> Result<T, AppError> {
        match built {
            Some(value) if self.errors.is_empty() => Ok(value),
            _ => Err(AppError::FieldValidation(self.errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_every_invalid_field() {
        let body = json!({"id": "  ", "amount": 10.5, "mid": "mid-1"});
        let mut reader = FieldReader::new(&body).unwrap();
        let id = reader.string("id");
        let amount = reader.strict_int("amount");
        let mid = reader.string("mid");
        assert_eq!(mid.as_deref(), Some("mid-1"));

        let err = reader
            .finish(id.zip(amount))
            .expect_err("id and amount are invalid");
        match err {
            AppError::FieldValidation(fields) => assert_eq!(fields, vec!["id", "amount"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn strings_are_trimmed_and_bounded() {
        let body = json!({"name": "  Jane  ", "long": "abcdef"});
        let mut reader = FieldReader::new(&body).unwrap();
        assert_eq!(reader.string("name").as_deref(), Some("Jane"));
        assert_eq!(reader.bounded_string("long", 5), None);
        assert!(reader.has_errors());
    }

    #[test]
    fn optional_fields_tolerate_absence_but_not_wrong_types() {
        let body = json!({"present": 7});
        let mut reader = FieldReader::new(&body).unwrap();
        assert_eq!(reader.optional_string("missing"), None);
        assert!(!reader.has_errors());
        assert_eq!(reader.optional_string("present"), None);
        assert!(reader.has_errors());
    }

    #[test]
    fn non_object_bodies_are_rejected() {
        assert!(matches!(
            FieldReader::new(&json!([1, 2])),
            Err(AppError::FieldValidation(_))
        ));
    }
}
