//! Queue message types.
//!
//! The wire record published by the report producer:
//!
//! ```json
//! {"s3_bucket": "reports", "s3_key": "2024/q1.csv", "recipient_email": "a@x.com"}
//! ```
//!
//! Decoding and validation are separate steps. A body that is not a JSON
//! object fails to decode; an object with a missing or empty field fails
//! validation. Unknown fields are ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire name of the storage bucket field.
pub const FIELD_BUCKET: &str = "s3_bucket";

/// Wire name of the storage key field.
pub const FIELD_KEY: &str = "s3_key";

/// Wire name of the recipient field.
pub const FIELD_RECIPIENT: &str = "recipient_email";

/// The body is not well-formed structured data.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// One or more required fields are absent or empty.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("missing required fields: {}", .missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<&'static str>,
}

/// A decoded but not yet validated report message.
///
/// Fields are optional here so that a missing field is reported by
/// [`ReportMessage::validate`] with its name instead of as a generic
/// deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportMessage {
    #[serde(default, rename = "s3_bucket")]
    pub storage_bucket: Option<String>,
    #[serde(default, rename = "s3_key")]
    pub storage_key: Option<String>,
    #[serde(default, rename = "recipient_email")]
    pub recipient_email: Option<String>,
}

/// A validated request to email one stored report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    #[serde(rename = "s3_bucket")]
    pub storage_bucket: String,
    #[serde(rename = "s3_key")]
    pub storage_key: String,
    #[serde(rename = "recipient_email")]
    pub recipient_email: String,
}

impl ReportMessage {
    /// Parse a delivery body.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;

        let kind = match &value {
            serde_json::Value::Object(_) => None,
            serde_json::Value::Null => Some("null"),
            serde_json::Value::Bool(_) => Some("boolean"),
            serde_json::Value::Number(_) => Some("number"),
            serde_json::Value::String(_) => Some("string"),
            serde_json::Value::Array(_) => Some("array"),
        };
        if let Some(kind) = kind {
            return Err(DecodeError::NotAnObject(kind));
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Check that every required field is present and non-empty.
    ///
    /// All missing fields are reported, not only the first.
    pub fn validate(self) -> Result<ReportRequest, ValidationError> {
        let mut missing = Vec::new();

        let storage_bucket = present(self.storage_bucket, FIELD_BUCKET, &mut missing);
        let storage_key = present(self.storage_key, FIELD_KEY, &mut missing);
        let recipient_email = present(self.recipient_email, FIELD_RECIPIENT, &mut missing);

        match (storage_bucket, storage_key, recipient_email) {
            (Some(storage_bucket), Some(storage_key), Some(recipient_email)) => Ok(ReportRequest {
                storage_bucket,
                storage_key,
                recipient_email,
            }),
            _ => Err(ValidationError { missing }),
        }
    }
}

fn present(
    value: Option<String>,
    name: &'static str,
    missing: &mut Vec<&'static str>,
) -> Option<String> {
    match value {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            missing.push(name);
            None
        }
    }
}

impl ReportRequest {
    pub fn new(
        storage_bucket: impl Into<String>,
        storage_key: impl Into<String>,
        recipient_email: impl Into<String>,
    ) -> Self {
        Self {
            storage_bucket: storage_bucket.into(),
            storage_key: storage_key.into(),
            recipient_email: recipient_email.into(),
        }
    }
}
