//! Trigger event payloads
//!
//! Both event kinds arrive as a JSON document with a `Records` array, in the
//! shape emitted by S3 bucket notifications and SQS deliveries. Only the
//! fields the pipeline reads are modeled; everything else is ignored.

use recsink_common::types::{ObjectRef, RawRow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DecodeError, FetchError};

/// Blob storage upload notification batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNotificationEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<ObjectNotificationRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNotificationRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Object {
    /// Percent-encoded, with `+` standing for a space
    pub key: String,
}

impl ObjectNotificationRecord {
    pub fn new(bucket: impl Into<String>, encoded_key: impl Into<String>) -> Self {
        Self {
            s3: S3Entity {
                bucket: S3Bucket { name: bucket.into() },
                object: S3Object {
                    key: encoded_key.into(),
                },
            },
        }
    }

    /// Resolve the notification to a bucket and decoded key.
    pub fn object_ref(&self) -> Result<ObjectRef, FetchError> {
        let key = decode_object_key(&self.s3.object.key)?;
        Ok(ObjectRef::new(self.s3.bucket.name.clone(), key))
    }
}

impl ObjectNotificationEvent {
    pub fn from_refs<I, B, K>(refs: I) -> Self
    where
        I: IntoIterator<Item = (B, K)>,
        B: Into<String>,
        K: Into<String>,
    {
        Self {
            records: refs
                .into_iter()
                .map(|(bucket, key)| ObjectNotificationRecord::new(bucket, key))
                .collect(),
        }
    }
}

/// Decode an object key as delivered in notifications.
///
/// `+` is replaced by a space before percent-decoding, so a literal plus
/// arrives as `%2B`. A `%` not followed by two hex digits is rejected rather
/// than passed through.
pub fn decode_object_key(encoded: &str) -> Result<String, FetchError> {
    let invalid = || FetchError::InvalidKey {
        key: encoded.to_string(),
    };

    if !has_valid_escapes(encoded) {
        return Err(invalid());
    }

    let spaced = encoded.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|_| invalid())
}

fn has_valid_escapes(encoded: &str) -> bool {
    let bytes = encoded.as_bytes();
    bytes.iter().enumerate().all(|(i, &b)| {
        b != b'%'
            || bytes
                .get(i + 1..i + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit))
    })
}

/// Queue delivery batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessageEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(rename = "messageId", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub body: String,
}

impl QueueMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            message_id: None,
            body: body.into(),
        }
    }

    pub fn with_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Decode the body as a JSON object into a row.
    pub fn decode(&self) -> Result<RawRow, DecodeError> {
        decode_message_body(&self.body)
    }
}

impl QueueMessageEvent {
    pub fn from_bodies<I, S>(bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: bodies.into_iter().map(QueueMessage::new).collect(),
        }
    }
}

/// Turn a message body into a row.
///
/// Strings are taken as-is, `null` means absent, and other scalars or nested
/// values keep their JSON text.
pub fn decode_message_body(body: &str) -> Result<RawRow, DecodeError> {
    let value: Value = serde_json::from_str(body)?;
    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(DecodeError::NotAnObject {
                found: json_kind(&other),
            })
        },
    };

    Ok(fields
        .into_iter()
        .filter_map(|(column, value)| match value {
            Value::Null => None,
            Value::String(s) => Some((column, s)),
            other => Some((column, other.to_string())),
        })
        .collect())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
