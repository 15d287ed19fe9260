//! Change events pushed by the remote store.
//!
//! The provider delivers JSON payloads shaped like
//! `{"eventType": "INSERT" | "UPDATE" | "DELETE", "new": {...}, "old": {...}}`.
//! [`RawChange::decode`] turns one into a typed [`ChangeEvent`]; anything that
//! does not fit is reported as a [`DecodeError`] and the reconciler drops it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::Entity;
use crate::error::ErrorCode;

/// A decoded change for one entity table.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<E> {
    Insert(E),
    Update(E),
    Delete { id: String },
}

impl<E: Entity> ChangeEvent<E> {
    /// Id of the record the event is about.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Insert(record) | Self::Update(record) => record.id(),
            Self::Delete { id } => id,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert(_) => ChangeKind::Insert,
            Self::Update(_) => ChangeKind::Update,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Why a payload could not be turned into a [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown event type '{0}'")]
    UnknownEventType(String),
    #[error("{0:?} event carries no `new` record")]
    MissingRecord(ChangeKind),
    #[error("delete event carries no `old.id`")]
    MissingId,
    #[error("record does not match the table schema: {0}")]
    InvalidRecord(String),
    #[error("payload is not a change object: {0}")]
    InvalidPayload(String),
}

impl DecodeError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownEventType(_)
            | Self::MissingRecord(_)
            | Self::MissingId
            | Self::InvalidRecord(_)
            | Self::InvalidPayload(_) => ErrorCode::MalformedChange,
        }
    }
}

/// Wire form of a change event, as delivered by the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

impl RawChange {
    /// Parse a raw JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidPayload`] if the value is not an object
    /// with an `eventType` string.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        serde_json::from_value(value).map_err(|err| DecodeError::InvalidPayload(err.to_string()))
    }

    /// Encode a typed event the way the provider would send it.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidRecord`] if the record fails to serialize.
    pub fn encode<E: Entity>(event: &ChangeEvent<E>) -> Result<Self, DecodeError> {
        let to_value =
            |record: &E| serde_json::to_value(record).map_err(|e| DecodeError::InvalidRecord(e.to_string()));
        Ok(match event {
            ChangeEvent::Insert(record) => Self {
                event_type: "INSERT".to_string(),
                new: Some(to_value(record)?),
                old: None,
            },
            ChangeEvent::Update(record) => Self {
                event_type: "UPDATE".to_string(),
                new: Some(to_value(record)?),
                old: Some(serde_json::json!({ "id": record.id() })),
            },
            ChangeEvent::Delete { id } => Self {
                event_type: "DELETE".to_string(),
                new: Some(serde_json::json!({})),
                old: Some(serde_json::json!({ "id": id })),
            },
        })
    }

    /// Decode into a typed event.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] describing the first problem found.
    pub fn decode<E: Entity>(&self) -> Result<ChangeEvent<E>, DecodeError> {
        let kind = match self.event_type.trim().to_ascii_uppercase().as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            other => return Err(DecodeError::UnknownEventType(other.to_string())),
        };

        match kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let new = self
                    .new
                    .as_ref()
                    .filter(|value| value.as_object().is_some_and(|obj| !obj.is_empty()))
                    .ok_or(DecodeError::MissingRecord(kind))?;
                let record: E = serde_json::from_value(new.clone())
                    .map_err(|err| DecodeError::InvalidRecord(err.to_string()))?;
                if record.id().is_empty() {
                    return Err(DecodeError::InvalidRecord("empty id".to_string()));
                }
                Ok(if kind == ChangeKind::Insert {
                    ChangeEvent::Insert(record)
                } else {
                    ChangeEvent::Update(record)
                })
            }
            ChangeKind::Delete => {
                let id = self
                    .old
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .ok_or(DecodeError::MissingId)?;
                Ok(ChangeEvent::Delete { id: id.to_string() })
            }
        }
    }
}
